//! Output formatting for CLI results
//!
//! Three output formats are supported:
//! - Table: Human-readable tables (default)
//! - JSON: Structured JSON for scripting and automation
//! - Quiet: Minimal output, exit codes only

use std::str::FromStr;

use chrono::{DateTime, Utc};
use comfy_table::{presets::UTF8_FULL, Table};
use serde::Serialize;

use dank_core::contacts::{Contact, Message};
use dank_core::directory::truncate_address;
use dank_core::messenger::{RetryReport, SendReceipt};
use dank_core::reconcile::ScanReport;
use dank_core::store::OutboxRecord;
use dank_core::timeline::TimelineEvent;

use crate::ExitCode;

/// Output format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format for scripting
    Json,
    /// Minimal output - exit codes only
    Quiet,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            "quiet" => Ok(Self::Quiet),
            _ => Err(format!("Unknown output format: {s}")),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::Json => write!(f, "json"),
            Self::Quiet => write!(f, "quiet"),
        }
    }
}

/// Standard JSON response wrapper for consistent schema
#[derive(Serialize)]
pub struct JsonResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// RFC 3339 timestamp
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl<T: Serialize> JsonResponse<T> {
    pub fn success_with_command(data: T, command: &str) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: Utc::now().to_rfc3339(),
            command: Some(command.to_string()),
        }
    }
}

impl JsonResponse<()> {
    pub fn error(message: &str) -> JsonResponse<()> {
        JsonResponse {
            success: false,
            data: None,
            error: Some(message.to_string()),
            timestamp: Utc::now().to_rfc3339(),
            command: None,
        }
    }
}

/// Identity details shown by `init` and `whoami`
#[derive(Debug, Clone, Serialize)]
pub struct IdentityInfo {
    pub public_key: String,
    pub address: String,
    /// Name under which the local directory knows this key, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub key_path: String,
}

/// Formats output for different modes
pub struct OutputFormatter {
    format: OutputFormat,
    verbose: bool,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat, verbose: bool) -> Self {
        Self { format, verbose }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn is_quiet(&self) -> bool {
        self.format == OutputFormat::Quiet
    }

    pub fn format_identity(&self, info: &IdentityInfo) -> String {
        match self.format {
            OutputFormat::Table => {
                let mut table = property_table();
                table.add_row(vec!["Public Key", &info.public_key]);
                table.add_row(vec!["Address", &info.address]);
                table.add_row(vec!["Name", info.display_name.as_deref().unwrap_or("-")]);
                table.add_row(vec!["Key File", &info.key_path]);
                table.to_string()
            }
            OutputFormat::Json => self.to_json_response(info, "identity"),
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn format_send(&self, receipt: &SendReceipt) -> String {
        let output = SendOutput {
            send_id: &receipt.send_id,
            recipient: &receipt.recipient,
            status: receipt.status.as_str(),
        };
        match self.format {
            OutputFormat::Table => format!(
                "Sent to {} ({})",
                truncate_address(&receipt.recipient),
                receipt.status.as_str()
            ),
            OutputFormat::Json => self.to_json_response(&output, "send"),
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn format_retry(&self, report: &RetryReport) -> String {
        let output = RetryOutput {
            republished: report.republished,
            failed: report
                .failed
                .iter()
                .map(|(send_id, error)| FailedSend { send_id, error })
                .collect(),
        };
        match self.format {
            OutputFormat::Table => {
                let mut out = format!("Republished {} message(s)", report.republished);
                if !report.failed.is_empty() {
                    let mut table = Table::new();
                    table.load_preset(UTF8_FULL);
                    table.set_header(vec!["Send ID", "Error"]);
                    for (send_id, error) in &report.failed {
                        table.add_row(vec![short_id(send_id), error.clone()]);
                    }
                    out.push_str(&format!(", {} still undelivered:\n{}", report.failed.len(), table));
                }
                out
            }
            OutputFormat::Json => self.to_json_response(&output, "retry"),
            OutputFormat::Quiet => String::new(),
        }
    }

    /// New messages found by one scan, followed by the cycle counters in
    /// verbose mode
    pub fn format_scan(&self, report: &ScanReport) -> String {
        let events = &report.inbound;
        match self.format {
            OutputFormat::Table => {
                let mut out = if events.is_empty() {
                    "No new messages.".to_string()
                } else {
                    events.iter().map(|e| self.format_event(e)).collect::<Vec<_>>().join("\n")
                };
                if self.verbose {
                    out.push_str(&format!(
                        "\n\nscanned {} key(s) in {} page(s): {} verified, {} rejected, {} invalid",
                        report.candidates, report.pages, report.verified, report.rejected, report.invalid_keys
                    ));
                }
                out
            }
            OutputFormat::Json => {
                let output = ScanOutput {
                    candidates: report.candidates,
                    verified: report.verified,
                    rejected: report.rejected,
                    new_messages: events.iter().map(EventOutput::from).collect(),
                    watermark: report.watermark.map(|w| w.to_rfc3339()),
                };
                self.to_json_response(&output, "scan")
            }
            OutputFormat::Quiet => String::new(),
        }
    }

    /// One line per message, for `scan` and `watch`
    pub fn format_event(&self, event: &TimelineEvent) -> String {
        match self.format {
            OutputFormat::Table => format_line(&event.display_name, &event.message),
            OutputFormat::Json => self.to_json(&EventOutput::from(event)),
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn format_contacts(&self, contacts: &[Contact]) -> String {
        match self.format {
            OutputFormat::Table => {
                if contacts.is_empty() {
                    return "No conversations yet.".to_string();
                }
                let mut table = Table::new();
                table.load_preset(UTF8_FULL);
                table.set_header(vec!["Contact", "Messages", "Unread", "Last Activity", "Last Message"]);
                for c in contacts {
                    let last = c.messages.last();
                    table.add_row(vec![
                        c.display_name.clone(),
                        c.messages.len().to_string(),
                        c.unread_count().to_string(),
                        c.last_activity().map(format_time).unwrap_or_else(|| "-".to_string()),
                        last.map(|m| preview(&m.text)).unwrap_or_default(),
                    ]);
                }
                let mut out = table.to_string();
                if self.verbose {
                    for c in contacts {
                        out.push_str(&format!("\n\n== {} ({})\n", c.display_name, c.public_key));
                        let lines: Vec<_> = c.messages.iter().map(|m| format_line(&c.display_name, m)).collect();
                        out.push_str(&lines.join("\n"));
                    }
                }
                out
            }
            OutputFormat::Json => self.to_json_response(&contacts, "contacts"),
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn format_outbox(&self, records: &[OutboxRecord]) -> String {
        match self.format {
            OutputFormat::Table => {
                if records.is_empty() {
                    return "Outbox is empty.".to_string();
                }
                let mut table = Table::new();
                table.load_preset(UTF8_FULL);
                table.set_header(vec!["Send ID", "Recipient", "Sent At", "Status", "Attempts", "Text"]);
                for r in records {
                    table.add_row(vec![
                        short_id(&r.send_id),
                        truncate_address(&r.recipient),
                        format_time(r.sent_at),
                        r.status.as_str().to_string(),
                        r.attempts.to_string(),
                        preview(&r.text),
                    ]);
                }
                table.to_string()
            }
            OutputFormat::Json => {
                let output: Vec<_> = records.iter().map(OutboxOutput::from).collect();
                self.to_json_response(&output, "outbox")
            }
            OutputFormat::Quiet => String::new(),
        }
    }

    /// Format error with exit code context
    pub fn format_error_with_code(&self, error: &anyhow::Error, code: ExitCode) -> String {
        match self.format {
            OutputFormat::Json => {
                let response = JsonResponse::<()>::error(&format!("{error:#}"));
                let mut output = serde_json::to_value(&response).unwrap_or_default();
                output["exit_code"] = serde_json::json!(code as i32);
                output["exit_code_name"] = serde_json::json!(code.name());
                serde_json::to_string_pretty(&output).unwrap_or_else(|_| format!("{error:#}"))
            }
            _ => format!("Error: {error:#}"),
        }
    }

    /// Print a progress line to stderr (suppressed in quiet and JSON modes)
    pub fn progress(&self, message: &str) {
        if self.format == OutputFormat::Table {
            eprintln!("{message}");
        }
    }

    /// Print a warning to stderr (suppressed in quiet mode)
    pub fn warning(&self, message: &str) {
        if !self.is_quiet() {
            eprintln!("Warning: {message}");
        }
    }

    /// Print `text` to stdout unless it is empty
    pub fn print(&self, text: &str) {
        if !text.is_empty() {
            println!("{text}");
        }
    }

    fn to_json<T: Serialize>(&self, value: &T) -> String {
        serde_json::to_string(value).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
    }

    fn to_json_response<T: Serialize>(&self, value: &T, command: &str) -> String {
        let response = JsonResponse::success_with_command(value, command);
        serde_json::to_string_pretty(&response).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
    }
}

fn property_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Property", "Value"]);
    table
}

fn format_time(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn format_line(counterparty: &str, message: &Message) -> String {
    let who = if message.from_me { "me" } else { counterparty };
    let marker = if message.unread { "*" } else { " " };
    format!("{marker} [{}] {who}: {}", format_time(message.time), message.text)
}

fn short_id(send_id: &str) -> String {
    send_id.chars().take(12).collect()
}

fn preview(text: &str) -> String {
    const MAX: usize = 40;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        let cut: String = text.chars().take(MAX - 3).collect();
        format!("{cut}...")
    }
}

// JSON output structures

#[derive(Serialize)]
struct SendOutput<'a> {
    send_id: &'a str,
    recipient: &'a str,
    status: &'a str,
}

#[derive(Serialize)]
struct FailedSend<'a> {
    send_id: &'a str,
    error: &'a str,
}

#[derive(Serialize)]
struct RetryOutput<'a> {
    republished: usize,
    failed: Vec<FailedSend<'a>>,
}

#[derive(Serialize)]
struct EventOutput<'a> {
    contact: &'a str,
    display_name: &'a str,
    from_me: bool,
    text: &'a str,
    time: String,
}

impl<'a> From<&'a TimelineEvent> for EventOutput<'a> {
    fn from(event: &'a TimelineEvent) -> Self {
        Self {
            contact: &event.contact,
            display_name: &event.display_name,
            from_me: event.message.from_me,
            text: &event.message.text,
            time: event.message.time.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
struct ScanOutput<'a> {
    candidates: usize,
    verified: usize,
    rejected: usize,
    new_messages: Vec<EventOutput<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    watermark: Option<String>,
}

#[derive(Serialize)]
struct OutboxOutput<'a> {
    send_id: &'a str,
    recipient: &'a str,
    text: &'a str,
    sent_at: String,
    status: &'a str,
    attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error: Option<&'a str>,
}

impl<'a> From<&'a OutboxRecord> for OutboxOutput<'a> {
    fn from(r: &'a OutboxRecord) -> Self {
        Self {
            send_id: &r.send_id,
            recipient: &r.recipient,
            text: &r.text,
            sent_at: r.sent_at.to_rfc3339(),
            status: r.status.as_str(),
            attempts: r.attempts,
            last_error: r.last_error.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use dank_core::store::DeliveryStatus;

    fn message(from_me: bool, text: &str) -> Message {
        Message {
            from_me,
            text: text.to_string(),
            time: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            unread: !from_me,
        }
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("TABLE".parse::<OutputFormat>().unwrap(), OutputFormat::Table);
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("xml".parse::<OutputFormat>().is_err());
        assert_eq!(OutputFormat::Quiet.to_string(), "quiet");
    }

    #[test]
    fn test_quiet_prints_nothing() {
        let f = OutputFormatter::new(OutputFormat::Quiet, true);
        assert!(f.format_contacts(&[]).is_empty());
        assert!(f.format_retry(&RetryReport::default()).is_empty());
    }

    #[test]
    fn test_event_line() {
        let f = OutputFormatter::new(OutputFormat::Table, false);
        let event = TimelineEvent {
            contact: "ab".repeat(64),
            display_name: "alice".to_string(),
            message: message(false, "hello"),
        };
        assert_eq!(f.format_event(&event), "* [2024-05-01 12:00:00 UTC] alice: hello");

        let mine = TimelineEvent {
            message: message(true, "hi"),
            ..event
        };
        assert_eq!(f.format_event(&mine), "  [2024-05-01 12:00:00 UTC] me: hi");
    }

    #[test]
    fn test_scan_prints_report_inbound() {
        let empty = ScanReport::default();
        let table = OutputFormatter::new(OutputFormat::Table, false);
        assert_eq!(table.format_scan(&empty), "No new messages.");

        let report = ScanReport {
            verified: 1,
            new_messages: 1,
            inbound: vec![TimelineEvent {
                contact: "ab".repeat(64),
                display_name: "alice".to_string(),
                message: message(false, "hello"),
            }],
            ..ScanReport::default()
        };
        assert_eq!(table.format_scan(&report), "* [2024-05-01 12:00:00 UTC] alice: hello");

        let json = OutputFormatter::new(OutputFormat::Json, false).format_scan(&report);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["data"]["new_messages"].as_array().unwrap().len(), 1);
        assert_eq!(value["data"]["verified"], 1);
    }

    #[test]
    fn test_send_json_schema() {
        let f = OutputFormatter::new(OutputFormat::Json, false);
        let receipt = SendReceipt {
            send_id: "11".repeat(32),
            recipient: "ab".repeat(64),
            status: DeliveryStatus::Published,
        };
        let value: serde_json::Value = serde_json::from_str(&f.format_send(&receipt)).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["command"], "send");
        assert_eq!(value["data"]["status"], "published");
    }

    #[test]
    fn test_contacts_table_and_json() {
        let contact = Contact {
            public_key: "ab".repeat(64),
            display_name: "alice".to_string(),
            messages: vec![message(false, "hello")],
        };

        let table = OutputFormatter::new(OutputFormat::Table, false).format_contacts(&[contact.clone()]);
        assert!(table.contains("alice"));
        assert!(table.contains("hello"));

        let json = OutputFormatter::new(OutputFormat::Json, false).format_contacts(&[contact]);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["data"][0]["messages"][0]["unread"], true);
    }

    #[test]
    fn test_preview_truncates() {
        assert_eq!(preview("short"), "short");
        let long = "x".repeat(100);
        assert_eq!(preview(&long).chars().count(), 40);
        assert!(preview(&long).ends_with("..."));
    }

    #[test]
    fn test_error_json_carries_exit_code() {
        let f = OutputFormatter::new(OutputFormat::Json, false);
        let err = anyhow::anyhow!("boom");
        let value: serde_json::Value =
            serde_json::from_str(&f.format_error_with_code(&err, ExitCode::RelayUnreachable)).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["exit_code"], 4);
        assert_eq!(value["exit_code_name"], "RELAY_UNREACHABLE");
    }
}
