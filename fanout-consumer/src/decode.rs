//! Decoding of order payloads.
//!
//! Bodies are JSON objects with `order_id`, `customer_id` and `amount`. When an
//! SQS queue is subscribed to an SNS topic without raw message delivery, the
//! order arrives wrapped in an SNS notification envelope; [`decode`] unwraps it.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DecodedOrder {
    pub order_id: String,
    pub customer_id: String,
    pub amount: Decimal,
}

/// Why a body could not be decoded. None of these are retryable.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DecodeError {
    #[error("body is not a well-formed JSON object: {0}")]
    Malformed(String),
    #[error("required field `{0}` is missing")]
    MissingField(&'static str),
    #[error("field `{field}` has the wrong type: {reason}")]
    TypeMismatch { field: &'static str, reason: String },
}

impl DecodeError {
    /// Stable, machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::MissingField(_) => "missing_field",
            Self::TypeMismatch { .. } => "type_mismatch",
        }
    }
}

const REQUIRED_FIELDS: [&str; 3] = ["order_id", "customer_id", "amount"];

/// Parses a message body into a [`DecodedOrder`].
pub fn decode(body: &[u8]) -> Result<DecodedOrder, DecodeError> {
    let fields = parse_object(body)?;
    let fields = match sns_message(&fields) {
        Some(inner) => parse_object(inner.as_bytes())?,
        None => fields,
    };

    for field in REQUIRED_FIELDS {
        if fields.get(field).map_or(true, Value::is_null) {
            return Err(DecodeError::MissingField(field));
        }
    }

    Ok(DecodedOrder {
        order_id: string_field(&fields, "order_id")?,
        customer_id: string_field(&fields, "customer_id")?,
        amount: amount_field(&fields)?,
    })
}

fn parse_object(body: &[u8]) -> Result<Map<String, Value>, DecodeError> {
    match serde_json::from_slice(body) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(other) => Err(DecodeError::Malformed(format!(
            "expected an object, found {}",
            json_type(&other)
        ))),
        Err(e) => Err(DecodeError::Malformed(e.to_string())),
    }
}

/// The inner message of an SNS notification envelope, if `fields` is one.
fn sns_message(fields: &Map<String, Value>) -> Option<&str> {
    if fields.get("Type")?.as_str()? != "Notification" {
        return None;
    }
    fields.get("Message")?.as_str()
}

fn string_field(fields: &Map<String, Value>, field: &'static str) -> Result<String, DecodeError> {
    match &fields[field] {
        Value::String(s) => Ok(s.clone()),
        other => Err(DecodeError::TypeMismatch {
            field,
            reason: format!("expected a string, found {}", json_type(other)),
        }),
    }
}

fn amount_field(fields: &Map<String, Value>) -> Result<Decimal, DecodeError> {
    let (text, found) = match &fields["amount"] {
        Value::Number(n) => (n.to_string(), "number"),
        Value::String(s) => (s.clone(), "string"),
        other => {
            return Err(DecodeError::TypeMismatch {
                field: "amount",
                reason: format!("expected a decimal, found {}", json_type(other)),
            })
        }
    };

    // Numbers keep their original digits, so nothing is rounded on the way in.
    Decimal::from_str_exact(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|e| DecodeError::TypeMismatch {
            field: "amount",
            reason: format!("{found} {text:?} is not a decimal: {e}"),
        })
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
