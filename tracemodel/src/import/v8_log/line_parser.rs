//! v8.log field splitting and number parsing.
//!
//! Lines are comma separated. A field may be double-quoted, in which case it
//! can hold commas and `""` stands for a literal quote.

use regex::Regex;
use std::sync::OnceLock;

fn field_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"^"((?:[^"]|"")*)"|^([^,]*)"#).expect("v8 log field regex compiles"))
}

/// Splits one log line into its fields, unquoting quoted ones.
pub fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut rest = line;
    loop {
        let Some(caps) = field_re().captures(rest) else {
            break;
        };
        let field = match (caps.get(1), caps.get(2)) {
            (Some(quoted), _) => quoted.as_str().replace("\"\"", "\""),
            (None, Some(plain)) => plain.as_str().to_string(),
            (None, None) => String::new(),
        };
        fields.push(field);
        let consumed = caps.get(0).map_or(0, |m| m.end());
        match rest[consumed..].strip_prefix(',') {
            Some(next) => rest = next,
            None => break,
        }
    }
    fields
}

/// Decimal, or hex with a `0x` prefix.
pub fn parse_int(field: &str) -> Option<i64> {
    let field = field.trim();
    match field.strip_prefix("0x") {
        Some(hex) => i64::from_str_radix(hex, 16).ok(),
        None => field.parse().ok(),
    }
}

/// Code address: decimal, or hex with a `0x` prefix.
pub fn parse_address(field: &str) -> Option<u64> {
    let field = field.trim();
    match field.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => field.parse().ok(),
    }
}

/// Stack frame address; always hex, the `0x` prefix is optional.
fn parse_frame(field: &str) -> Option<u64> {
    let field = field.trim();
    u64::from_str_radix(field.strip_prefix("0x").unwrap_or(field), 16).ok()
}

/// Resolves the stack of a `tick` line into absolute addresses, innermost
/// frame first.
///
/// `+off`/`-off` frames are hex offsets from the previous frame (the pc for
/// the first one). `overflow` markers are skipped.
pub fn parse_stack(pc: u64, frames: &[String]) -> Option<Vec<u64>> {
    let mut stack = Vec::with_capacity(frames.len());
    let mut previous = pc;
    for frame in frames.iter().map(|f| f.trim()).filter(|f| !f.is_empty()) {
        let address = if let Some(offset) = frame.strip_prefix('+') {
            previous.wrapping_add(parse_frame(offset)?)
        } else if let Some(offset) = frame.strip_prefix('-') {
            previous.wrapping_sub(parse_frame(offset)?)
        } else if frame.starts_with('o') {
            continue;
        } else {
            parse_frame(frame)?
        };
        stack.push(address);
        previous = address;
    }
    Some(stack)
}
