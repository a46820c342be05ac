use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    basic_elements::args::Args,
    constants::{VALUE_CHANGED_EVENT, VALUE_REMOVED_EVENT},
    error::EventError,
};

/// Event as delivered by the chain: a name tag and an Args-encoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub name: String,
    pub payload: Vec<u8>,
}

impl RawEvent {
    pub fn new(name: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    pub fn value_changed(key: &str, value: &str) -> Result<Self> {
        let mut payload = Args::new();
        payload.add_string(key)?.add_string(value)?;
        Ok(Self::new(VALUE_CHANGED_EVENT, payload.into_bytes()))
    }

    pub fn value_removed(key: &str) -> Result<Self> {
        let mut payload = Args::new();
        payload.add_string(key)?;
        Ok(Self::new(VALUE_REMOVED_EVENT, payload.into_bytes()))
    }

    /// Parses the data of an emitted contract event: the tag as the first Args
    /// string, followed by the payload.
    pub fn from_event_data(data: &[u8]) -> Result<Self> {
        let mut args = Args::from_bytes(data.to_vec());
        let name = args.next_string().context("Failed to read event tag")?;
        Ok(Self::new(name, args.remaining_bytes().to_vec()))
    }

    pub fn to_event_data(&self) -> Result<Vec<u8>> {
        let mut args = Args::new();
        args.add_string(&self.name)?;
        let mut data = args.into_bytes();
        data.extend_from_slice(&self.payload);
        Ok(data)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueChanged {
    pub key: String,
    pub value: String,
}

impl ValueChanged {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut args = Args::from_bytes(payload.to_vec());
        let key = args.next_string().context("Failed to read key")?;
        let value = args.next_string().context("Failed to read value")?;
        Ok(Self { key, value })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRemoved {
    pub key: String,
}

impl ValueRemoved {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut args = Args::from_bytes(payload.to_vec());
        let key = args.next_string().context("Failed to read key")?;
        Ok(Self { key })
    }
}

/// A decoded Blueprint contract notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum BlueprintEvent {
    ValueChanged(ValueChanged),
    ValueRemoved(ValueRemoved),
}

impl BlueprintEvent {
    pub fn decode(raw: &RawEvent) -> Result<Self, EventError> {
        let malformed = |source| EventError::MalformedPayload {
            tag: raw.name.clone(),
            source,
        };

        match raw.name.as_str() {
            VALUE_CHANGED_EVENT => ValueChanged::decode(&raw.payload)
                .map(BlueprintEvent::ValueChanged)
                .map_err(malformed),
            VALUE_REMOVED_EVENT => ValueRemoved::decode(&raw.payload)
                .map(BlueprintEvent::ValueRemoved)
                .map_err(malformed),
            _ => Err(EventError::UnknownEvent {
                tag: raw.name.clone(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BlueprintEvent::ValueChanged(_) => VALUE_CHANGED_EVENT,
            BlueprintEvent::ValueRemoved(_) => VALUE_REMOVED_EVENT,
        }
    }
}

/// Position and outcome of an execution event on the chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventDetails {
    pub event_id: String,
    pub event_period: u64,
    pub event_thread: u32,
    pub event_index: u64,
    pub operation_id: Option<String>,
    pub event_data: String,
    pub is_failure: bool,
    pub status: i32,
    pub call_stack: Vec<String>,
}
