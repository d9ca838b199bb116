use crate::error::SyncError;
use crate::models::{PollPayload, RemoteStatus};
use log::debug;
use serde::Deserialize;
use serde_json::Value;

// Incremental change to one poll. Present fields are current; absent ones are untouched.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PollDelta {
    #[serde(alias = "pollMsgId")]
    pub id: String,
    #[serde(flatten)]
    pub fields: PollPayload,
}

// A complete record pushed for a poll this client has not seen before
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewPollAnnouncement {
    #[serde(alias = "pollMsgId")]
    pub id: String,
    #[serde(alias = "pollData")]
    pub record: PollPayload,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Delta(PollDelta),
    NewPoll(NewPollAnnouncement),
    // Kept as a raw value; shape is checked when it is reconciled
    Snapshot(Value),
    RemoteStatus(RemoteStatus),
    // The remote side announced something we couldn't use; a full pull will pick it up
    RefreshHint,
}

impl InboundEvent {
    // Decode a named push event. Returns `Ok(None)` for events this engine doesn't consume.
    pub fn from_wire(event: &str, data: Value) -> Result<Option<Self>, SyncError> {
        match event {
            "poll_update_to_gui" => serde_json::from_value(data)
                .map(|delta| Some(InboundEvent::Delta(delta)))
                .map_err(|e| SyncError::MalformedPayload(format!("poll delta: {}", e))),
            "new_poll_sent" => match serde_json::from_value::<NewPollAnnouncement>(data) {
                Ok(announcement) => Ok(Some(InboundEvent::NewPoll(announcement))),
                Err(e) => {
                    debug!("Unusable new poll announcement ({}), asking for a refresh", e);
                    Ok(Some(InboundEvent::RefreshHint))
                }
            },
            "initial_poll_data" => Ok(Some(InboundEvent::Snapshot(data))),
            "client_status" => match data.as_str() {
                Some(label) => Ok(Some(InboundEvent::RemoteStatus(RemoteStatus::parse(label)))),
                None => Err(SyncError::MalformedPayload(format!(
                    "client_status is not a string: {}",
                    data
                ))),
            },
            other => {
                debug!("Ignoring push event '{}'", other);
                Ok(None)
            }
        }
    }
}
