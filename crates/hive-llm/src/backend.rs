//! One LLM backend: HTTP operations, health state, and in-flight
//! accounting.
//!
//! A backend is any endpoint accepting `POST {base_url}/generate` and
//! answering `GET {base_url}/version` (health probe) and
//! `GET {base_url}/models` (catalog). Streamed responses arrive as
//! newline-delimited JSON objects and must terminate with `done:true`;
//! a stream that ends without the marker counts as a transport error
//! and is retried.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::debug;

use hive_types::LlmRequestId;

use crate::config::BackendConfig;
use crate::error::LlmError;
use crate::request::{LlmEvent, LlmRequest};

/// Consecutive successful probes needed to re-promote a backend.
const PROBES_TO_RECOVER: u32 = 2;

/// The final result of one generation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationOutcome {
    /// Full concatenated response text.
    pub text: String,
    /// Tokens generated, when reported.
    pub tokens: u64,
}

/// One NDJSON chunk from a `/generate` response.
#[derive(Debug, Deserialize)]
struct GenerateChunk {
    /// Partial (or full) response text.
    #[serde(default)]
    response: String,
    /// Terminal marker.
    #[serde(default)]
    done: bool,
    /// Tokens generated, reported on the terminal chunk.
    #[serde(default)]
    eval_count: Option<u64>,
}

/// Moving average of backend response time.
#[derive(Debug, Default)]
struct LatencyEma {
    average_ms: f64,
    samples: u64,
}

/// Live state for one configured backend.
#[derive(Debug)]
pub struct Backend {
    /// Static configuration.
    pub config: BackendConfig,
    in_flight: AtomicU32,
    healthy: AtomicBool,
    consecutive_successes: AtomicU32,
    latency: Mutex<LatencyEma>,
}

impl Backend {
    /// Wrap a backend config with fresh (healthy, idle) state.
    pub fn new(config: BackendConfig) -> Self {
        Self {
            config,
            in_flight: AtomicU32::new(0),
            healthy: AtomicBool::new(true),
            consecutive_successes: AtomicU32::new(0),
            latency: Mutex::new(LatencyEma::default()),
        }
    }

    /// Whether the selector may hand this backend another request.
    pub fn can_take(&self) -> bool {
        self.config.enabled
            && self.healthy.load(Ordering::Relaxed)
            && self.in_flight.load(Ordering::Relaxed) < self.config.max_concurrent
    }

    /// Whether the backend passes health checks and is enabled.
    pub fn is_healthy(&self) -> bool {
        self.config.enabled && self.healthy.load(Ordering::Relaxed)
    }

    /// Requests currently dispatched against this backend.
    pub fn in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Reserve an in-flight slot.
    pub fn acquire(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    /// Release an in-flight slot.
    pub fn release(&self) {
        let previous = self.in_flight.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(previous > 0, "in_flight underflow on {}", self.config.id);
        if previous == 0 {
            // Repair release-build underflow.
            self.in_flight.store(0, Ordering::Relaxed);
        }
    }

    /// Record a failed health probe: demote immediately.
    pub fn mark_probe_failure(&self) {
        self.consecutive_successes.store(0, Ordering::Relaxed);
        if self.healthy.swap(false, Ordering::Relaxed) {
            debug!(backend = self.config.id, "Backend demoted to unhealthy");
        }
    }

    /// Record a successful health probe; two in a row re-promote.
    pub fn mark_probe_success(&self) {
        let successes = self
            .consecutive_successes
            .fetch_add(1, Ordering::Relaxed)
            .saturating_add(1);
        if !self.healthy.load(Ordering::Relaxed) && successes >= PROBES_TO_RECOVER {
            self.healthy.store(true, Ordering::Relaxed);
            debug!(backend = self.config.id, "Backend re-promoted to healthy");
        }
    }

    /// Record one response latency sample.
    pub fn record_latency(&self, sample_ms: f64) {
        let mut latency = self
            .latency
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        latency.samples = latency.samples.saturating_add(1);
        if latency.samples == 1 {
            latency.average_ms = sample_ms;
        } else {
            latency.average_ms = latency.average_ms.mul_add(0.8, sample_ms * 0.2);
        }
    }

    /// Moving-average response latency in milliseconds.
    pub fn average_latency_ms(&self) -> f64 {
        self.latency
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .average_ms
    }

    /// Run one generation attempt against this backend.
    ///
    /// Streamed chunks are forwarded as [`LlmEvent::Chunk`] while they
    /// arrive; the concatenated text is returned either way.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Http`] for non-success statuses,
    /// [`LlmError::Transport`] for connection and truncation failures,
    /// and [`LlmError::MalformedResponse`] for undecodable bodies.
    pub async fn generate(
        &self,
        http: &reqwest::Client,
        request: &LlmRequest,
        model: &str,
        request_id: LlmRequestId,
        events: &mpsc::Sender<LlmEvent>,
    ) -> Result<GenerationOutcome, LlmError> {
        let url = format!("{}/generate", self.config.base_url);
        let mut body = serde_json::json!({
            "model": model,
            "prompt": request.prompt,
            "stream": request.stream,
            "options": {
                "temperature": request.params.temperature,
                "top_k": request.params.top_k,
                "top_p": request.params.top_p,
                "num_predict": request.params.max_tokens,
            },
        });
        if let Some(system) = &request.system
            && let Some(object) = body.as_object_mut()
        {
            object.insert(String::from("system"), serde_json::json!(system));
        }

        let response = http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|error| LlmError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LlmError::Http {
                status: status.as_u16(),
            });
        }

        if request.stream {
            self.consume_stream(response, request_id, events).await
        } else {
            let chunk: GenerateChunk = response
                .json()
                .await
                .map_err(|error| LlmError::MalformedResponse(error.to_string()))?;
            if !chunk.done {
                return Err(LlmError::MalformedResponse(String::from(
                    "single-shot response missing done:true",
                )));
            }
            Ok(GenerationOutcome {
                text: chunk.response,
                tokens: chunk.eval_count.unwrap_or(0),
            })
        }
    }

    /// Consume a newline-delimited JSON stream until `done:true`.
    async fn consume_stream(
        &self,
        response: reqwest::Response,
        request_id: LlmRequestId,
        events: &mpsc::Sender<LlmEvent>,
    ) -> Result<GenerationOutcome, LlmError> {
        let mut stream = response.bytes_stream();
        let mut buffer = Vec::new();
        let mut text = String::new();

        while let Some(piece) = stream.next().await {
            let piece = piece.map_err(|error| LlmError::Transport(error.to_string()))?;
            buffer.extend_from_slice(&piece);

            while let Some(newline) = buffer.iter().position(|byte| *byte == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline).collect();
                let line = core::str::from_utf8(&line)
                    .map_err(|error| LlmError::MalformedResponse(error.to_string()))?
                    .trim();
                if line.is_empty() {
                    continue;
                }
                let chunk: GenerateChunk = serde_json::from_str(line)
                    .map_err(|error| LlmError::MalformedResponse(error.to_string()))?;

                if !chunk.response.is_empty() {
                    text.push_str(&chunk.response);
                    let _ = events
                        .send(LlmEvent::Chunk {
                            request_id,
                            text: chunk.response,
                        })
                        .await;
                }
                if chunk.done {
                    return Ok(GenerationOutcome {
                        text,
                        tokens: chunk.eval_count.unwrap_or(0),
                    });
                }
            }
        }

        // The connection closed before a done:true marker arrived.
        Err(LlmError::Transport(String::from(
            "stream ended without done:true",
        )))
    }

    /// Health probe: `GET {base_url}/version`.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Transport`] or [`LlmError::Http`].
    pub async fn probe(&self, http: &reqwest::Client) -> Result<(), LlmError> {
        let url = format!("{}/version", self.config.base_url);
        let response = http
            .get(&url)
            .send()
            .await
            .map_err(|error| LlmError::Transport(error.to_string()))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(LlmError::Http {
                status: status.as_u16(),
            })
        }
    }

    /// Fetch the backend's model catalog: `GET {base_url}/models`.
    ///
    /// Accepts both `{"models": ["a", ...]}` and
    /// `{"models": [{"name": "a"}, ...]}` shapes.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Transport`], [`LlmError::Http`], or
    /// [`LlmError::MalformedResponse`].
    pub async fn models(&self, http: &reqwest::Client) -> Result<Vec<String>, LlmError> {
        let url = format!("{}/models", self.config.base_url);
        let response = http
            .get(&url)
            .send()
            .await
            .map_err(|error| LlmError::Transport(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(LlmError::Http {
                status: status.as_u16(),
            });
        }
        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|error| LlmError::MalformedResponse(error.to_string()))?;
        let models = value
            .get("models")
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| LlmError::MalformedResponse(String::from("missing models array")))?;

        Ok(models
            .iter()
            .filter_map(|entry| {
                entry.as_str().map(ToOwned::to_owned).or_else(|| {
                    entry
                        .get("name")
                        .and_then(serde_json::Value::as_str)
                        .map(ToOwned::to_owned)
                })
            })
            .collect())
    }
}
