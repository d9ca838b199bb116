pub mod event;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// Selection limit applied when a payload doesn't say
pub const DEFAULT_SELECTABLE_COUNT: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollRecord {
    pub id: String,
    pub question: String,
    pub options: Vec<String>,
    pub results: BTreeMap<String, u64>,
    pub voters: BTreeMap<String, BTreeSet<String>>,
    // 0 means a voter may pick any number of options
    pub selectable_count: u32,
    // Creation time, milliseconds since epoch
    pub timestamp: i64,
    pub chat_id: Option<String>,
    pub option_hashes: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

// Poll fields as they arrive from the remote service. Every field is optional
// so the same shape serves full records and partial deltas
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollPayload {
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub options: Option<Vec<String>>,
    #[serde(default)]
    pub results: Option<BTreeMap<String, u64>>,
    #[serde(default)]
    pub voters: Option<BTreeMap<String, BTreeSet<String>>>,
    #[serde(default)]
    pub selectable_count: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_millis")]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub option_hashes: Option<BTreeMap<String, String>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

// Timestamps show up as integer or fractional milliseconds; anything else is treated as absent
fn deserialize_millis<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64))))
}

impl PollPayload {
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

impl PollRecord {
    // Build a complete record, filling anything the payload lacks with defaults
    pub fn from_payload(id: impl Into<String>, payload: PollPayload, default_timestamp: i64) -> Self {
        Self {
            id: id.into(),
            question: payload.question.unwrap_or_default(),
            options: payload.options.unwrap_or_default(),
            results: payload.results.unwrap_or_default(),
            voters: payload.voters.unwrap_or_default(),
            selectable_count: payload.selectable_count.unwrap_or(DEFAULT_SELECTABLE_COUNT),
            timestamp: payload.timestamp.unwrap_or(default_timestamp),
            chat_id: payload.chat_id,
            option_hashes: payload.option_hashes.unwrap_or_default(),
            extra: payload.extra,
        }
    }

    pub fn allows_multiple(&self) -> bool {
        self.selectable_count != 1
    }

    pub fn total_votes(&self) -> u64 {
        self.results.values().sum()
    }

    // Map a voter's option references back to option texts, in option order
    pub fn selections(&self, voter: &str) -> Vec<&str> {
        let Some(refs) = self.voters.get(voter) else {
            return Vec::new();
        };
        let chosen: BTreeSet<&str> = refs
            .iter()
            .map(|r| self.option_hashes.get(r).map(String::as_str).unwrap_or(r.as_str()))
            .collect();
        self.options
            .iter()
            .map(String::as_str)
            .filter(|text| chosen.contains(text))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    // Consecutive failed attempts since the last successful connect
    pub failed_attempts: u32,
    // Set once a configured attempt cap has been reached. Retrying continues regardless.
    pub retries_exhausted: bool,
}

// Readiness of the remote poll-taking client, as the remote service reports it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    Ready,
    QrPending,
    Disconnected,
    LoggedOut,
    Unknown(String),
}

impl RemoteStatus {
    pub fn parse(label: &str) -> Self {
        match label {
            "ready" => RemoteStatus::Ready,
            "qr_pending" => RemoteStatus::QrPending,
            "disconnected" | "auth_failure" => RemoteStatus::Disconnected,
            "logged_out" => RemoteStatus::LoggedOut,
            other => RemoteStatus::Unknown(other.to_string()),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, RemoteStatus::Ready)
    }
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteStatus::Ready => f.write_str("ready"),
            RemoteStatus::QrPending => f.write_str("qr_pending"),
            RemoteStatus::Disconnected => f.write_str("disconnected"),
            RemoteStatus::LoggedOut => f.write_str("logged_out"),
            RemoteStatus::Unknown(label) => write!(f, "unknown ({})", label),
        }
    }
}
