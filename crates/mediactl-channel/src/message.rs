use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ChannelError, RejectionKind, Result};

/// Request written to the engine: `{id, method, internal, data?}`.
#[derive(Debug, Serialize)]
pub struct RequestMessage<'a> {
    pub id: u32,
    pub method: &'a str,
    pub internal: &'a Value,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub data: &'a Value,
}

/// Notification written to the engine over the payload channel:
/// `{event, internal, data?}`, followed by one payload frame.
#[derive(Debug, Serialize)]
pub struct NotifyMessage<'a> {
    pub event: &'a str,
    pub internal: &'a Value,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub data: &'a Value,
}

/// Unsolicited message from the engine addressed to one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Id of the entity the notification targets.
    pub target_id: String,
    /// Event name.
    pub event: String,
    /// Event body, `Null` when absent.
    pub data: Value,
    /// Binary frame that followed the notification on the payload channel.
    pub payload: Option<Bytes>,
}

impl Notification {
    /// Decode `{event, data}` into an adjacently tagged event enum.
    ///
    /// Event enums are declared with `#[serde(tag = "event", content = "data")]`;
    /// an event name the enum does not know is returned as an error so the
    /// caller can log and drop it.
    pub fn parse_event<T: DeserializeOwned>(&self) -> Result<T> {
        let mut object = serde_json::Map::with_capacity(2);
        object.insert("event".to_string(), Value::String(self.event.clone()));
        if !self.data.is_null() {
            object.insert("data".to_string(), self.data.clone());
        }
        Ok(serde_json::from_value(Value::Object(object))?)
    }
}

/// Result of a request as carried by its response.
#[derive(Debug, PartialEq)]
pub enum Outcome {
    Accepted(Value),
    Rejected { kind: RejectionKind, reason: String },
    Neither,
}

impl Outcome {
    /// Turn the outcome into the value handed to the caller.
    pub fn into_result(self, id: u32) -> Result<Value> {
        match self {
            Outcome::Accepted(data) => Ok(data),
            Outcome::Rejected { kind, reason } => Err(ChannelError::Rejected { kind, reason }),
            Outcome::Neither => Err(ChannelError::NoResponse(id)),
        }
    }
}

/// A JSON message received from the engine, decoded once at the boundary.
#[derive(Debug, PartialEq)]
pub enum Incoming {
    Response { id: u32, outcome: Outcome },
    Notification(Notification),
    /// Valid JSON that is neither a response nor a notification.
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    id: Option<u32>,
    accepted: Option<bool>,
    error: Option<String>,
    reason: Option<String>,
    target_id: Option<Value>,
    event: Option<String>,
    #[serde(default)]
    data: Value,
}

impl Incoming {
    /// Decode a JSON payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let raw: RawMessage = serde_json::from_slice(payload)?;

        if let Some(id) = raw.id {
            let outcome = if raw.accepted == Some(true) {
                Outcome::Accepted(raw.data)
            } else if let Some(tag) = raw.error {
                Outcome::Rejected {
                    kind: RejectionKind::from_tag(&tag),
                    reason: raw.reason.unwrap_or_default(),
                }
            } else {
                Outcome::Neither
            };
            return Ok(Incoming::Response { id, outcome });
        }

        let target_id = match raw.target_id {
            Some(Value::String(id)) => Some(id),
            Some(Value::Number(id)) => Some(id.to_string()),
            _ => None,
        };

        match (target_id, raw.event) {
            (Some(target_id), Some(event)) => Ok(Incoming::Notification(Notification {
                target_id,
                event,
                data: raw.data,
                payload: None,
            })),
            _ => Ok(Incoming::Unknown),
        }
    }
}
