use crate::error::SyncError;
use crate::models::RemoteStatus;
use crate::remote::PollSource;
use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
struct PollDataResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    polls: Option<Value>,
    #[serde(default)]
    message: Option<String>,
}

pub struct HttpPollSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPollSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

#[async_trait]
impl PollSource for HttpPollSource {
    async fn fetch_status(&self) -> Result<RemoteStatus, SyncError> {
        let response: StatusResponse = self
            .client
            .get(self.url("status"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(RemoteStatus::parse(&response.status))
    }

    async fn fetch_polls(&self) -> Result<Value, SyncError> {
        let response: PollDataResponse = self
            .client
            .get(self.url("get-all-poll-data"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        into_polls(response)
    }
}

fn into_polls(response: PollDataResponse) -> Result<Value, SyncError> {
    if !response.success {
        return Err(SyncError::RefreshFailed(
            response
                .message
                .unwrap_or_else(|| "remote service reported failure".to_string()),
        ));
    }
    match response.polls {
        Some(polls) => Ok(polls),
        None => {
            debug!("Poll data response had no 'polls' field");
            Ok(Value::Object(Map::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> PollDataResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn unsuccessful_response_is_a_failed_refresh() {
        let err = into_polls(parse(json!({ "success": false, "message": "not ready" }))).unwrap_err();
        assert!(matches!(err, SyncError::RefreshFailed(ref m) if m == "not ready"));
    }

    #[test]
    fn polls_are_passed_through() {
        let polls = into_polls(parse(json!({ "success": true, "polls": { "P1": { "question": "Q?" } } }))).unwrap();
        assert_eq!(polls["P1"]["question"], "Q?");

        let empty = into_polls(parse(json!({ "success": true }))).unwrap();
        assert_eq!(empty, json!({}));
    }

    #[test]
    fn base_url_is_normalised() {
        let source = HttpPollSource::new("http://localhost:3000/", Duration::from_secs(1)).unwrap();
        assert_eq!(source.url("status"), "http://localhost:3000/status");
    }
}
