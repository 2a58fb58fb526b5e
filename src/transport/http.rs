// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! HTTP request/response transport.
//!
//! Each outbound frame is one POST. The response body is either a single
//! JSON frame or a `text/event-stream` whose `data:` lines carry frames.
//! There is no persistent session, so servers cannot push notifications.

use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::TransportError;
use super::framing::{is_event_stream_content_type, SseDecoder};
use super::{report_closed, EventSender, TransportEvent, TransportSettings};
use crate::config::ServerConfig;

/// Stateless POST-per-frame transport.
pub struct HttpTransport {
    url: String,
    poster: Poster,
}

impl HttpTransport {
    pub fn open(
        config: &ServerConfig,
        settings: &TransportSettings,
        events: EventSender,
    ) -> Result<Self, TransportError> {
        let url = config
            .url()
            .ok_or_else(|| TransportError::Connect(format!("server '{}' has no url", config.id)))?;
        let client = build_client(settings)?;
        let headers = build_headers(config)?;

        debug!(server = %config.id, url = %url, "HTTP transport ready");
        Ok(Self {
            url: url.to_string(),
            poster: Poster {
                server: config.id.clone(),
                client,
                headers,
                events,
                cancel: CancellationToken::new(),
            },
        })
    }

    /// POST the frame in the background; replies arrive as events.
    pub fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        self.poster.post(self.url.clone(), frame)
    }

    pub fn close(&self) {
        self.poster.cancel.cancel();
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Shared POST machinery for the HTTP and SSE transports.
#[derive(Clone)]
pub(crate) struct Poster {
    pub server: String,
    pub client: reqwest::Client,
    pub headers: HeaderMap,
    pub events: EventSender,
    pub cancel: CancellationToken,
}

impl Poster {
    /// Spawn one POST. The caller's deadline never cancels the request once
    /// it is on the wire; only `close` does.
    pub fn post(&self, url: String, frame: Vec<u8>) -> Result<(), TransportError> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::Closed("HTTP transport closed".into()));
        }

        let poster = self.clone();
        tokio::spawn(async move {
            let cancel = poster.cancel.clone();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                result = poster.exchange(&url, frame) => {
                    if let Err(e) = result {
                        warn!(server = %poster.server, url = %url, "POST failed: {}", e);
                        report_closed(&poster.events, &poster.cancel, e).await;
                    }
                }
            }
        });
        Ok(())
    }

    async fn exchange(&self, url: &str, frame: Vec<u8>) -> Result<(), TransportError> {
        let response = self
            .client
            .post(url)
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json, text/event-stream")
            .body(frame)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: truncate(&body, 200),
            });
        }

        let event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(is_event_stream_content_type);

        if event_stream {
            let mut decoder = SseDecoder::new();
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                for event in decoder.push(&chunk) {
                    self.forward(event.is_message().then_some(event.data)).await;
                }
            }
            if let Some(event) = decoder.finish() {
                self.forward(event.is_message().then_some(event.data)).await;
            }
        } else {
            // 202/204 acknowledge notifications with an empty body.
            let body = response.bytes().await?;
            if !body.iter().all(u8::is_ascii_whitespace) {
                let _ = self.events.send(TransportEvent::Frame(body.to_vec())).await;
            }
        }
        Ok(())
    }

    async fn forward(&self, data: Option<String>) {
        if let Some(data) = data.filter(|d| !d.trim().is_empty()) {
            let _ = self.events.send(TransportEvent::Frame(data.into_bytes())).await;
        }
    }
}

pub(crate) fn build_client(settings: &TransportSettings) -> Result<reqwest::Client, TransportError> {
    reqwest::Client::builder()
        .connect_timeout(settings.connect_timeout)
        .user_agent(concat!("toolbridge/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| TransportError::Connect(e.to_string()))
}

pub(crate) fn build_headers(config: &ServerConfig) -> Result<HeaderMap, TransportError> {
    let mut headers = HeaderMap::new();
    for (key, value) in config.expanded_headers() {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| TransportError::Connect(format!("invalid header name '{}': {}", key, e)))?;
        let value = HeaderValue::from_str(&value)
            .map_err(|e| TransportError::Connect(format!("invalid value for header '{}': {}", key, e)))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
