//! Turns a raw backend reply into the text shown to the user.
//!
//! Success bodies are classified into a small set of shapes and each shape has
//! exactly one way of producing text. Error bodies go through a separate,
//! ordered list of places a human-readable message may live.

use serde_json::{Map, Value};

use crate::error::{ClientError, ClientResult};

/// Object fields probed, in priority order, for the reply text.
const REPLY_FIELDS: [&str; 3] = ["data", "message", "response"];

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// JSON object carrying a usable `data` field.
    Data(Value),
    /// JSON object without `data` but with a usable `message` field.
    Message(Value),
    /// JSON object whose only usable field is `response`.
    Response(Value),
    /// JSON object with none of the known fields.
    Object(Map<String, Value>),
    /// JSON that is not an object (bare string, number, array, ...).
    Scalar(Value),
    /// Anything that does not parse as JSON.
    Text(String),
}

impl Reply {
    pub fn classify(body: &str) -> Self {
        let parsed: Value = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(_) => return Reply::Text(body.to_string()),
        };

        let Value::Object(map) = parsed else {
            return Reply::Scalar(parsed);
        };

        for field in REPLY_FIELDS {
            if let Some(value) = map.get(field).filter(|v| is_truthy(v)) {
                let value = value.clone();
                return match field {
                    "data" => Reply::Data(value),
                    "message" => Reply::Message(value),
                    _ => Reply::Response(value),
                };
            }
        }
        Reply::Object(map)
    }

    pub fn into_text(self) -> String {
        match self {
            Reply::Data(v) | Reply::Message(v) | Reply::Response(v) | Reply::Scalar(v) => value_text(v),
            Reply::Object(map) => Value::Object(map).to_string(),
            Reply::Text(text) => text,
        }
    }
}

/// Converts a finished backend exchange into reply text or an error.
pub fn normalize(status: u16, body: &str) -> ClientResult<String> {
    if !(200..300).contains(&status) {
        return Err(ClientError::Backend {
            status,
            message: error_message(status, body),
        });
    }
    if body.trim().is_empty() {
        return Err(ClientError::EmptyResponse);
    }
    Ok(Reply::classify(body).into_text())
}

/// Picks the most specific human message out of an error body.
pub fn error_message(status: u16, body: &str) -> String {
    let extracted = serde_json::from_str::<Value>(body).ok().and_then(|json| {
        let candidates = [
            json.pointer("/detail/0/msg"),
            json.get("message"),
            json.get("error"),
        ];
        candidates
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .find(|s| !s.trim().is_empty())
            .map(str::to_string)
    });

    match extracted {
        Some(message) => message,
        None if body.trim().is_empty() => format!("backend returned status {status}"),
        None => body.to_string(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn value_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}
