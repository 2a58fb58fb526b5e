// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Server-Sent-Events transport.
//!
//! Inbound frames arrive on a long-lived `GET` event stream; outbound frames
//! are POSTed to the endpoint the stream announces in its `endpoint` event,
//! or to the configured URL when none is announced. The stream reconnects on
//! its own, independently of the POST path, up to `sse_stream_retries`
//! consecutive times before reporting a transport failure.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::RwLock;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::TransportError;
use super::framing::SseDecoder;
use super::http::{build_client, build_headers, Poster};
use super::{report_closed, EventSender, TransportEvent, TransportSettings};
use crate::config::ServerConfig;

/// How long `open` waits for the `endpoint` event before falling back to the
/// configured URL.
const ENDPOINT_GRACE: Duration = Duration::from_secs(1);

/// Base delay between stream reconnect attempts.
const STREAM_RETRY_DELAY: Duration = Duration::from_millis(200);

/// An open SSE session.
pub struct SseTransport {
    post_url: Arc<RwLock<String>>,
    poster: Poster,
}

impl SseTransport {
    /// Open the event stream and start its reader task.
    pub async fn open(
        config: &ServerConfig,
        settings: &TransportSettings,
        events: EventSender,
    ) -> Result<Self, TransportError> {
        let url = config
            .url()
            .ok_or_else(|| TransportError::Connect(format!("server '{}' has no url", config.id)))?;
        let stream_url =
            reqwest::Url::parse(url).map_err(|e| TransportError::Connect(e.to_string()))?;
        let client = build_client(settings)?;
        let headers = build_headers(config)?;
        let cancel = CancellationToken::new();

        let stream = StreamSession {
            server: config.id.clone(),
            client: client.clone(),
            headers: headers.clone(),
            url: stream_url.clone(),
        };
        let response = tokio::time::timeout(settings.connect_timeout, stream.connect())
            .await
            .map_err(|_| {
                TransportError::Connect(format!(
                    "timed out after {}ms",
                    settings.connect_timeout.as_millis()
                ))
            })??;

        info!(server = %config.id, url = %url, "SSE stream open");

        let post_url = Arc::new(RwLock::new(url.to_string()));
        let (endpoint_tx, mut endpoint_rx) = watch::channel(false);

        tokio::spawn(run_stream(
            stream,
            response,
            Arc::clone(&post_url),
            endpoint_tx,
            events.clone(),
            cancel.clone(),
            settings.sse_stream_retries,
        ));

        // Give the server a moment to announce its POST endpoint.
        let grace = ENDPOINT_GRACE.min(settings.connect_timeout);
        let announced = tokio::time::timeout(grace, endpoint_rx.wait_for(|ready| *ready)).await;
        if announced.is_err() {
            debug!(server = %config.id, "No endpoint event; posting to stream URL");
        }

        Ok(Self {
            post_url,
            poster: Poster {
                server: config.id.clone(),
                client,
                headers,
                events,
                cancel,
            },
        })
    }

    /// POST a frame to the announced endpoint.
    pub fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        let url = self.post_url.read().clone();
        self.poster.post(url, frame)
    }

    pub fn close(&self) {
        self.poster.cancel.cancel();
    }

    /// Where outbound frames currently go.
    pub fn post_url(&self) -> String {
        self.post_url.read().clone()
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.poster.cancel.cancel();
    }
}

struct StreamSession {
    server: String,
    client: reqwest::Client,
    headers: reqwest::header::HeaderMap,
    url: reqwest::Url,
}

impl StreamSession {
    async fn connect(&self) -> Result<reqwest::Response, TransportError> {
        let response = self
            .client
            .get(self.url.clone())
            .headers(self.headers.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: String::new(),
            });
        }
        Ok(response)
    }
}

async fn run_stream(
    session: StreamSession,
    first: reqwest::Response,
    post_url: Arc<RwLock<String>>,
    endpoint_tx: watch::Sender<bool>,
    events: EventSender,
    cancel: CancellationToken,
    max_retries: u32,
) {
    let mut response = Some(first);
    let mut failures: u32 = 0;

    loop {
        let outcome = match response.take() {
            Some(current) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    outcome = pump(&session, current, &post_url, &endpoint_tx, &events) => outcome,
                }
            }
            None => match tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                result = session.connect() => result,
            } {
                Ok(next) => {
                    info!(server = %session.server, "SSE stream reconnected");
                    response = Some(next);
                    continue;
                }
                Err(e) => StreamOutcome {
                    delivered: false,
                    error: e,
                },
            },
        };

        if cancel.is_cancelled() {
            return;
        }
        if outcome.delivered {
            failures = 0;
        }
        failures += 1;
        if failures > max_retries {
            warn!(server = %session.server, "SSE stream gave up after {} attempts: {}", max_retries, outcome.error);
            report_closed(&events, &cancel, outcome.error).await;
            return;
        }

        debug!(server = %session.server, attempt = failures, "SSE stream dropped: {}", outcome.error);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(STREAM_RETRY_DELAY * failures) => {}
        }
    }
}

struct StreamOutcome {
    /// Whether any event arrived before the stream ended.
    delivered: bool,
    error: TransportError,
}

async fn pump(
    session: &StreamSession,
    response: reqwest::Response,
    post_url: &RwLock<String>,
    endpoint_tx: &watch::Sender<bool>,
    events: &EventSender,
) -> StreamOutcome {
    let mut decoder = SseDecoder::new();
    let mut stream = response.bytes_stream();
    let mut delivered = false;

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                return StreamOutcome {
                    delivered,
                    error: e.into(),
                }
            }
        };
        for event in decoder.push(&chunk) {
            delivered = true;
            match event.event.as_deref() {
                Some("endpoint") => match session.url.join(event.data.trim()) {
                    Ok(endpoint) => {
                        debug!(server = %session.server, endpoint = %endpoint, "SSE endpoint announced");
                        *post_url.write() = endpoint.to_string();
                        endpoint_tx.send_replace(true);
                    }
                    Err(e) => warn!(server = %session.server, "Bad endpoint '{}': {}", event.data, e),
                },
                None | Some("message") => {
                    if !event.data.trim().is_empty()
                        && events
                            .send(TransportEvent::Frame(event.data.into_bytes()))
                            .await
                            .is_err()
                    {
                        return StreamOutcome {
                            delivered,
                            error: TransportError::Closed("event receiver dropped".into()),
                        };
                    }
                }
                Some(other) => debug!(server = %session.server, "Ignoring SSE event '{}'", other),
            }
        }
    }

    StreamOutcome {
        delivered,
        error: TransportError::StreamEnded("event stream closed".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = ServerConfig::sse("sse", format!("http://{}/sse", addr));
        let (tx, _rx) = crate::transport::event_channel();
        let result = SseTransport::open(&config, &TransportSettings::default(), tx).await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
    }

    #[test]
    fn test_endpoint_resolution() {
        let base = reqwest::Url::parse("http://127.0.0.1:9000/sse").unwrap();
        assert_eq!(
            base.join("/messages?sessionId=1").unwrap().as_str(),
            "http://127.0.0.1:9000/messages?sessionId=1"
        );
        assert_eq!(
            base.join("http://other:1/post").unwrap().as_str(),
            "http://other:1/post"
        );
    }
}
