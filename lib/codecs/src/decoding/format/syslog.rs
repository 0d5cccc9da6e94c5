use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::debug;

use super::decode_priority;
use crate::error::NormalizeError;
use crate::record::{DEFAULT_FACILITY, LogRecord, Severity, UNKNOWN};

/// RFC5424 uses a single dash for "no value".
const NILVALUE: &str = "-";

// <PRI>VERSION TIMESTAMP HOST APP PROCID MSGID [SD] MSG
static STRUCTURED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?s)^<([0-9]{1,10})>([0-9]{1,2}) +(\S+) +(\S+) +(\S+) +(\S+) +(\S+)(?: +(-|(?:\[(?:[^\]\\]|\\.)*\])+))?(?: +(.*))?$"#,
    )
    .expect("structured syslog pattern is valid")
});

// <PRI>Mon DD HH:MM:SS HOST APP[PID]: MSG
static LEGACY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?s)^<([0-9]{1,10})>([A-Z][a-z]{2} +[0-9]{1,2} [0-9]{2}:[0-9]{2}:[0-9]{2}) +(\S+) +([^\s\[:]+)(?:\[([0-9]+)\])?:(?: +(.*))?$"#,
    )
    .expect("legacy syslog pattern is valid")
});

/// Turns one raw syslog message into a `LogRecord`.
///
/// This never fails. The payload is decoded lossily, so a stray invalid byte
/// only replaces that byte. Formats are tried in order: RFC5424-like,
/// RFC3164-like, then a plain whitespace split. Binary input that is not text
/// at all still yields a record, with `error` severity and the decoded bytes
/// as message.
///
/// The record is always stamped with the current time, the timestamp embedded
/// in the header is not interpreted.
pub fn normalize(raw: &[u8]) -> LogRecord {
    let text = String::from_utf8_lossy(raw);
    let line = text.trim();

    match parse(line) {
        Ok(record) => record,
        Err(err) => {
            debug!(
                message = "syslog message is not text, keep it as is",
                %err,
                len = raw.len()
            );

            LogRecord::new(UNKNOWN, UNKNOWN, DEFAULT_FACILITY, Severity::Error, line)
        }
    }
}

fn parse(line: &str) -> Result<LogRecord, NormalizeError> {
    if let Some(offset) = line.find('\0') {
        return Err(NormalizeError::Binary { offset });
    }

    let record = parse_structured(line)
        .or_else(|| parse_legacy(line))
        .unwrap_or_else(|| split_fallback(line));

    Ok(record)
}

fn parse_structured(line: &str) -> Option<LogRecord> {
    let captures = STRUCTURED.captures(line)?;
    let (facility, severity) = priority(&captures)?;

    let mut record = LogRecord::new(
        or_unknown(&captures[4]),
        or_unknown(&captures[5]),
        facility,
        severity,
        captures.get(9).map_or("", |m| m.as_str()),
    );
    record.structured_data = captures
        .get(8)
        .map(|m| m.as_str())
        .filter(|sd| *sd != NILVALUE)
        .map(str::to_owned);

    Some(record)
}

fn parse_legacy(line: &str) -> Option<LogRecord> {
    let captures = LEGACY.captures(line)?;
    let (facility, severity) = priority(&captures)?;

    Some(LogRecord::new(
        &captures[3],
        &captures[4],
        facility,
        severity,
        captures.get(6).map_or("", |m| m.as_str()),
    ))
}

/// Keeps the whole line as message, since nothing is known about its layout.
fn split_fallback(line: &str) -> LogRecord {
    let mut tokens = line.split_whitespace();

    let host = tokens.nth(2).unwrap_or(UNKNOWN);
    let app = tokens
        .nth(1)
        .and_then(|token| token.split('[').next())
        .filter(|app| !app.is_empty())
        .unwrap_or(UNKNOWN);

    LogRecord::new(host, app, DEFAULT_FACILITY, Severity::Info, line)
}

// A priority too large for u32 means the header is not what it looks like.
fn priority(captures: &Captures<'_>) -> Option<(u32, Severity)> {
    captures[1].parse::<u32>().ok().map(decode_priority)
}

fn or_unknown(value: &str) -> &str {
    if value == NILVALUE { UNKNOWN } else { value }
}
