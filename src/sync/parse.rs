use log::warn;
use serde_json::Value;

use crate::models::{RawPayload, Reading};

/// Splits `text` on every `sep` that sits outside string literals and
/// nested objects/arrays.
fn split_top_level(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut start = 0;

    for (index, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => depth = depth.saturating_sub(1),
            _ if ch == sep && depth == 0 => {
                parts.push(&text[start..index]);
                start = index + ch.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

/// Splits a `key:value` field on its first top-level `:`.
fn split_field(field: &str) -> Option<(&str, &str)> {
    let mut parts = split_top_level(field, ':').into_iter();
    let key = parts.next()?;
    // Re-join on the original text so values containing top-level ':' survive.
    let value = field.get(key.len() + 1..)?;
    Some((key, value))
}

fn decode_key(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.starts_with('"') {
        serde_json::from_str::<String>(raw).ok()
    } else if raw.is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}

/// JSON strings lose their quotes; numbers and booleans keep their literal
/// text; nested values are kept verbatim. `null` yields no value.
fn decode_value(raw: &str) -> Result<Option<String>, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("missing value".to_string());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Null) => Ok(None),
        Ok(Value::String(text)) => Ok(Some(text)),
        Ok(Value::Number(_)) | Ok(Value::Bool(_)) => Ok(Some(raw.to_string())),
        Ok(Value::Array(_)) | Ok(Value::Object(_)) => Ok(Some(raw.to_string())),
        Err(err) => Err(err.to_string()),
    }
}

/// Parses a flat `"key":value,...` payload into ordered pairs. Malformed
/// fields are skipped with a warning; the rest of the payload still counts.
pub fn parse_reading(payload: &RawPayload) -> Reading {
    let mut reading = Reading::default();
    let body = payload.as_str().trim();
    let body = body
        .strip_prefix('{')
        .and_then(|rest| rest.strip_suffix('}'))
        .unwrap_or(body);
    if body.trim().is_empty() {
        return reading;
    }

    for field in split_top_level(body, ',') {
        if field.trim().is_empty() {
            continue;
        }
        let Some((raw_key, raw_value)) = split_field(field) else {
            warn!("Skipping malformed payload field '{}': no key/value separator", field.trim());
            continue;
        };
        let Some(key) = decode_key(raw_key) else {
            warn!("Skipping payload field with unreadable key '{}'", raw_key.trim());
            continue;
        };
        match decode_value(raw_value) {
            Ok(Some(value)) => reading.push(key, value),
            Ok(None) => {}
            Err(err) => warn!("Skipping payload field '{key}': {err}"),
        }
    }

    reading
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(reading: &Reading) -> Vec<(&str, &str)> {
        reading
            .fields
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }

    #[test]
    fn parses_strings_and_numbers_in_order() {
        let reading = parse_reading(&r#""WS1":"5","OT1":"72","tempf":68.5,"rain":false"#.into());
        assert_eq!(
            pairs(&reading),
            vec![("WS1", "5"), ("OT1", "72"), ("tempf", "68.5"), ("rain", "false")]
        );
    }

    #[test]
    fn keeps_colons_and_commas_inside_strings() {
        let reading = parse_reading(
            &r#""date":"2026-10-18T17:35:00.000Z","tz":"America/New_York","note":"a, b""#.into(),
        );
        assert_eq!(
            pairs(&reading),
            vec![
                ("date", "2026-10-18T17:35:00.000Z"),
                ("tz", "America/New_York"),
                ("note", "a, b"),
            ]
        );
    }

    #[test]
    fn nested_values_stay_verbatim() {
        let reading = parse_reading(&r#""loc":{"lat":1,"lon":2},"T1":"1""#.into());
        assert_eq!(pairs(&reading), vec![("loc", r#"{"lat":1,"lon":2}"#), ("T1", "1")]);
    }

    #[test]
    fn malformed_fields_are_skipped_without_losing_the_rest() {
        let reading = parse_reading(&r#""T1":"68.5","broken","T2":,"T3":nope,"T4":"1""#.into());
        assert_eq!(pairs(&reading), vec![("T1", "68.5"), ("T4", "1")]);
    }

    #[test]
    fn null_values_are_dropped() {
        let reading = parse_reading(&r#""T1":null,"T2":"2""#.into());
        assert_eq!(pairs(&reading), vec![("T2", "2")]);
    }

    #[test]
    fn braces_are_optional_and_empty_payloads_are_empty() {
        assert_eq!(pairs(&parse_reading(&r#"{"T1":"1"}"#.into())), vec![("T1", "1")]);
        assert!(parse_reading(&"".into()).is_empty());
        assert!(parse_reading(&"{}".into()).is_empty());
    }
}
