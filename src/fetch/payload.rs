use serde_json::Value;

use super::FetchError;
use crate::models::RawPayload;

/// Unwraps a `[{ ... }]` response into the bare object body.
///
/// The station API answers with a one-element array. Downstream parsing works
/// on the flat `"key":value,...` text between the object braces, so both the
/// array brackets and the braces are removed.
pub fn unwrap_single_reading(body: &str) -> Result<RawPayload, FetchError> {
    let readings: Vec<Value> = serde_json::from_str(body)
        .map_err(|err| FetchError::Shape(format!("body is not a JSON array: {err}")))?;

    match readings.as_slice() {
        [Value::Object(_)] => {}
        [_] => {
            return Err(FetchError::Shape(
                "array element is not an object".to_string(),
            ))
        }
        other => {
            return Err(FetchError::Shape(format!(
                "expected exactly one reading, got {}",
                other.len()
            )))
        }
    }

    let inner = body
        .trim()
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .map(str::trim)
        .and_then(|object| object.strip_prefix('{'))
        .and_then(|rest| rest.strip_suffix('}'))
        .ok_or_else(|| FetchError::Shape("could not locate object body".to_string()))?;

    Ok(RawPayload(inner.trim().to_string()))
}
