//! HTTP client for the MAX Bot API

use super::error::DeliveryError;
use super::types::{CallbackAnswer, NewMessageBody, UpdateList, SUBSCRIBED_TYPES};
use crate::db::UserId;
use crate::replies::OutgoingMessage;
use crate::runtime::Transport;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, RequestBuilder};
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://platform-api.max.ru";

/// Timeout of ordinary API calls
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Slack on top of the long-poll wait before the request is abandoned
const POLL_GRACE: Duration = Duration::from_secs(15);

pub struct MaxClient {
    client: Client,
    base_url: String,
    token: String,
}

impl MaxClient {
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DeliveryError::unknown(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header("Authorization", &self.token)
    }

    /// Send a request and classify any failure; returns the response body
    async fn execute(&self, builder: RequestBuilder) -> Result<String, DeliveryError> {
        let response = self
            .authorized(builder)
            .send()
            .await
            .map_err(|e| DeliveryError::from_reqwest(&e))?;

        let status = response.status();
        let retry_after = retry_after(response.headers());
        let body = response
            .text()
            .await
            .map_err(|e| DeliveryError::network(format!("Failed to read response: {e}")))?;

        if status.is_success() {
            return Ok(body);
        }

        let err = DeliveryError::from_status(status, &body);
        Err(match retry_after {
            Some(wait) => err.with_retry_after(wait),
            None => err,
        })
    }

    /// Long-poll for updates after `marker`, waiting up to `wait` server-side
    pub async fn get_updates(
        &self,
        marker: Option<i64>,
        wait: Duration,
    ) -> Result<UpdateList, DeliveryError> {
        let mut query = vec![
            ("timeout", wait.as_secs().to_string()),
            ("types", SUBSCRIBED_TYPES.to_string()),
        ];
        if let Some(marker) = marker {
            query.push(("marker", marker.to_string()));
        }

        let body = self
            .execute(
                self.client
                    .get(self.url("/updates"))
                    .query(&query)
                    .timeout(wait + POLL_GRACE),
            )
            .await?;

        serde_json::from_str(&body)
            .map_err(|e| DeliveryError::invalid_request(format!("Malformed updates: {e}")))
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[async_trait]
impl Transport for MaxClient {
    async fn send_message(
        &self,
        user_id: UserId,
        message: &OutgoingMessage,
    ) -> Result<(), DeliveryError> {
        let body = NewMessageBody::from(message);
        self.execute(
            self.client
                .post(self.url("/messages"))
                .query(&[("user_id", user_id)])
                .json(&body),
        )
        .await
        .map(drop)
    }

    async fn answer_callback(&self, callback_id: &str) -> Result<(), DeliveryError> {
        let body = CallbackAnswer {
            notification: String::new(),
        };
        self.execute(
            self.client
                .post(self.url("/answers"))
                .query(&[("callback_id", callback_id)])
                .json(&body),
        )
        .await
        .map(drop)
    }
}
