//! Classification of inbound wire frames.

use serde_json::Value;
use thiserror::Error;

use crate::types::Reply;

/// A frame that failed to classify.
#[derive(Debug, Error)]
pub enum ClassifyError {
    /// The frame was not valid JSON or not an object.
    #[error("malformed frame: {0}")]
    Malformed(String),
    /// An event frame lacked `data.namespace`.
    #[error("event frame missing data.namespace")]
    MissingNamespace,
}

/// An inbound frame, sorted by kind.
#[derive(Clone, Debug)]
pub enum Inbound {
    /// An `event` / `state_changed` frame; the namespace has been split off
    /// and the remaining payload kept verbatim.
    Event {
        /// Remote namespace the event originated in.
        namespace: String,
        /// Event payload minus the namespace key.
        payload: Value,
    },
    /// Anything else: a reply to a previously sent request, matched by
    /// `response_id` (or unsolicited, in which case it is dropped upstream).
    Reply(Reply),
}

impl Inbound {
    /// Classify one received text frame.
    pub fn classify(text: &str) -> Result<Self, ClassifyError> {
        let mut value: Value =
            serde_json::from_str(text).map_err(|e| ClassifyError::Malformed(e.to_string()))?;

        let is_event = matches!(
            value.get("response_type").and_then(Value::as_str),
            Some("event" | "state_changed")
        );

        if is_event {
            let namespace = value
                .get_mut("data")
                .and_then(Value::as_object_mut)
                .and_then(|data| data.remove("namespace"))
                .and_then(|ns| ns.as_str().map(ToString::to_string))
                .ok_or(ClassifyError::MissingNamespace)?;
            let payload = value
                .get_mut("data")
                .map(Value::take)
                .unwrap_or(Value::Null);
            return Ok(Self::Event { namespace, payload });
        }

        let reply: Reply = serde_json::from_value(value)
            .map_err(|e| ClassifyError::Malformed(e.to_string()))?;
        Ok(Self::Reply(reply))
    }
}
