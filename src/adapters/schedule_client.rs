//! REST client for the upstream scheduling service.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::config::UpstreamConfig;
use crate::error::{RelayError, Result};
use crate::sync::{MeetingSource, SnapshotRecord};

const PAGE_SIZE: &str = "300";

#[derive(Debug, Deserialize)]
struct MeetingListResponse {
    #[serde(default)]
    meetings: Vec<Value>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Clone)]
pub struct ScheduleClient {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl ScheduleClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    fn meetings_url(&self) -> String {
        format!("{}/users/me/meetings", self.base_url)
    }
}

#[async_trait]
impl MeetingSource for ScheduleClient {
    /// Fetch every meeting in the window, following pagination
    #[instrument(skip(self))]
    async fn fetch(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<SnapshotRecord>> {
        let from = from.to_rfc3339_opts(SecondsFormat::Secs, true);
        let to = to.to_rfc3339_opts(SecondsFormat::Secs, true);

        let mut records = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.http.get(self.meetings_url()).query(&[
                ("type", "upcoming"),
                ("from", from.as_str()),
                ("to", to.as_str()),
                ("page_size", PAGE_SIZE),
            ]);
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }
            if let Some(ref page) = page_token {
                request = request.query(&[("next_page_token", page.as_str())]);
            }

            let resp = request.send().await?;
            let status = resp.status();
            if status == StatusCode::UNAUTHORIZED {
                return Err(RelayError::Upstream("scheduling service rejected the token".to_string()));
            }
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(RelayError::Upstream(format!("HTTP {}: {}", status.as_u16(), body)));
            }

            let body: MeetingListResponse = resp.json().await?;
            records.extend(body.meetings.iter().map(SnapshotRecord::from_json));

            page_token = body.next_page_token.filter(|t| !t.is_empty());
            if page_token.is_none() {
                break;
            }
        }

        debug!(count = records.len(), "Fetched upstream meetings");
        Ok(records)
    }
}
