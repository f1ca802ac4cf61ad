#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::envelope::{open_envelope, open_incoming, pack_outgoing};
    use crate::keys::{generate_ephemeral_keypair, IdentityKeyPair};
    use crate::payload::PlaintextPayload;
    use crate::signing::{recover_public_key, sign_message, verify_signature};

    fn identity() -> impl Strategy<Value = IdentityKeyPair> {
        any::<[u8; 32]>().prop_filter_map("scalar out of range", |seed| {
            IdentityKeyPair::from_secret_bytes(&seed).ok()
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn test_envelope_round_trip(
            alice in identity(),
            bob in identity(),
            message in ".*",
        ) {
            let env = pack_outgoing(&message, &alice, generate_ephemeral_keypair(), bob.public_key()).unwrap();
            let opened = open_envelope(&env, &bob).unwrap();

            prop_assert_eq!(opened.sender, *alice.public_key());
            prop_assert_eq!(opened.message, message);
        }

        #[test]
        fn test_non_recipient_rejection(
            alice in identity(),
            bob in identity(),
            carol in identity(),
            message in ".*",
        ) {
            prop_assume!(bob.public_key() != carol.public_key());
            let env = pack_outgoing(&message, &alice, generate_ephemeral_keypair(), bob.public_key()).unwrap();

            let err = open_envelope(&env, &carol).unwrap_err();
            prop_assert!(err.is_not_for_us());
        }

        #[test]
        fn test_index_determinism(alice in identity(), bob in identity()) {
            let env = pack_outgoing("x", &alice, generate_ephemeral_keypair(), bob.public_key()).unwrap();
            let receiver = bob.shared_secret(&env.ephemeral_pubkey);

            prop_assert_eq!(receiver.search_index(), env.search_index);
            prop_assert!(open_incoming(&env.ciphertext, &env.iv, &receiver).is_ok());
        }

        #[test]
        fn test_payload_parsing(
            alice in identity(),
            head in ".*",
            tail in ".*",
        ) {
            // Messages may themselves contain the separator
            let message = format!("{head}: {tail}");
            let payload = PlaintextPayload::new(sign_message(message.as_bytes(), alice.secret_key()), message.clone());
            let decoded = PlaintextPayload::decode(&payload.encode()).unwrap();

            prop_assert_eq!(decoded.message, message);
            prop_assert_eq!(decoded.signature, payload.signature);
        }

        #[test]
        fn test_signature_binding(
            alice in identity(),
            message in ".+",
            suffix in ".+",
        ) {
            let sig = sign_message(message.as_bytes(), alice.secret_key()).to_hex();
            let altered = format!("{message}{suffix}");

            prop_assert!(verify_signature(message.as_bytes(), &sig, &alice.public_key_hex()));
            prop_assert!(!verify_signature(altered.as_bytes(), &sig, &alice.public_key_hex()));
            if let Ok(recovered) = recover_public_key(altered.as_bytes(), &sig) {
                prop_assert_ne!(recovered, *alice.public_key());
            }
        }
    }
}
