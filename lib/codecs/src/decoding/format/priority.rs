use crate::record::Severity;

/// Splits a syslog PRIORITY value into its facility and named severity.
///
/// Every input is valid: `priority / 8` is the facility and `priority % 8`
/// picks one of the eight severities.
#[inline]
pub fn decode_priority(priority: u32) -> (u32, Severity) {
    (priority >> 3, Severity::from_code(priority))
}
