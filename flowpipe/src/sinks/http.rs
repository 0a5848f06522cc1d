//! Network sink
//!
//! Every unit becomes one `POST` to the configured endpoint:
//! - object mode: the record as an `application/json` body
//! - byte mode: the chunk decoded as JSON if possible, otherwise the raw
//!   chunk as a `text/plain` body
//!
//! The Ack is given only after the response body has been read, so the
//! upstream link stays full while a request is in flight. A response
//! status >= 400 is logged, not failed. Transport errors fail the unit.

use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::BoxError;
use crate::stage::{Sink, StageConfig, StageFuture};
use crate::unit::{DataUnit, Mode};

pub struct HttpSink {
    config: StageConfig,
    client: reqwest::Client,
    url: String,
    timeout: Option<Duration>,
}

impl HttpSink {
    pub fn new(client: reqwest::Client, url: impl Into<String>, mode: Mode) -> Self {
        Self {
            config: StageConfig::new("http", mode),
            client,
            url: url.into(),
            timeout: None,
        }
    }

    /// Per-request timeout; unbounded by default
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.config.high_water_mark = high_water_mark;
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    fn request(&self, unit: &DataUnit) -> reqwest::RequestBuilder {
        let request = self.client.post(&self.url);
        let request = match unit {
            DataUnit::Record(record) => request.json(record),
            DataUnit::Bytes(chunk) => match unit.decode() {
                Ok(record) => request.json(&record),
                Err(e) => {
                    debug!(stage = %self.config.name, error = %e, "sending chunk as text");
                    request
                        .header(CONTENT_TYPE, "text/plain")
                        .body(String::from_utf8_lossy(chunk).into_owned())
                }
            },
        };
        match self.timeout {
            Some(timeout) => request.timeout(timeout),
            None => request,
        }
    }
}

impl Sink for HttpSink {
    fn config(&self) -> &StageConfig {
        &self.config
    }

    fn consume(&mut self, unit: DataUnit) -> StageFuture<'_, Result<(), BoxError>> {
        let request = self.request(&unit);
        Box::pin(async move {
            let response = request.send().await?;
            let status = response.status();
            let body = response.bytes().await?;

            if status.as_u16() < 400 {
                info!(stage = %self.config.name, url = %self.url, status = status.as_u16(), "response");
            } else {
                warn!(
                    stage = %self.config.name,
                    url = %self.url,
                    status = status.as_u16(),
                    body = %String::from_utf8_lossy(&body),
                    "non-success response"
                );
            }
            Ok(())
        })
    }
}
