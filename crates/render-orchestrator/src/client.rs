//! Render engine client: job submission, event stream, history retrieval.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::{Map, Value};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::Message;

use medley_common::{EngineConfig, MedleyError, MedleyResult};

/// Engine-assigned identifier of a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a wait on the event stream ended.
///
/// A dropped stream before the completion signal is not a failure: the job
/// may well have finished while we were disconnected, so the caller still
/// fetches the history and reports whatever it finds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The engine signalled the end of our job.
    Finished,
    /// The stream dropped before the signal arrived.
    Inconclusive,
}

/// A file the engine reports having written for a job step.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProducedFile {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default = "default_file_type")]
    pub file_type: String,
}

fn default_file_type() -> String {
    "output".to_string()
}

impl ProducedFile {
    /// Files written to scratch space are not part of the job's result.
    pub fn is_persistent(&self) -> bool {
        self.file_type != "temp"
    }
}

/// Files produced by a single step of the job graph, keyed by record type.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StepOutputs {
    #[serde(default)]
    pub images: Vec<ProducedFile>,
    #[serde(default)]
    pub videos: Vec<ProducedFile>,
    #[serde(default)]
    pub audio: Vec<ProducedFile>,
}

/// Everything the engine recorded about one executed job.
#[derive(Debug, Clone, Default)]
pub struct ExecutionRecord {
    pub steps: BTreeMap<String, StepOutputs>,
}

/// Seam over the render engine protocol, so orchestration and the
/// generation pipeline are testable without a live engine.
pub trait RenderClient {
    /// Submit a fully-bound job graph. Failure here is fatal; there is no
    /// retry.
    fn submit(&mut self, graph: &Map<String, Value>) -> MedleyResult<JobId>;

    /// Block until the engine signals the job finished, the stream drops,
    /// or the configured deadline passes.
    fn await_completion(&mut self, job_id: &JobId) -> MedleyResult<Completion>;

    /// Fetch the job's execution record.
    fn fetch_history(&mut self, job_id: &JobId) -> MedleyResult<ExecutionRecord>;
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct HistoryEntry {
    #[serde(default)]
    outputs: BTreeMap<String, StepOutputs>,
}

#[derive(Debug, Deserialize)]
struct EventFrame {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: EventData,
}

#[derive(Debug, Default, Deserialize)]
struct EventData {
    #[serde(default)]
    node: Option<String>,
    #[serde(default)]
    job_id: Option<String>,
}

/// Production client speaking HTTP + websocket to the render engine.
pub struct HttpRenderClient<'a> {
    cfg: &'a EngineConfig,
    http: reqwest::blocking::Client,
}

impl<'a> HttpRenderClient<'a> {
    pub fn new(cfg: &'a EngineConfig) -> Self {
        Self {
            cfg,
            http: reqwest::blocking::Client::new(),
        }
    }
}

impl RenderClient for HttpRenderClient<'_> {
    fn submit(&mut self, graph: &Map<String, Value>) -> MedleyResult<JobId> {
        let url = format!("{}/submit", self.cfg.http_base());
        let body = serde_json::json!({
            "template": graph,
            "client_id": self.cfg.client_id,
        });
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| MedleyError::upstream(format!("job submission failed: {e}")))?;
        if !response.status().is_success() {
            return Err(MedleyError::upstream(format!(
                "job submission rejected with status {}",
                response.status()
            )));
        }
        let parsed: SubmitResponse = response
            .json()
            .map_err(|e| MedleyError::upstream(format!("malformed submission response: {e}")))?;
        tracing::info!(job_id = %parsed.job_id, "Job submitted");
        Ok(JobId::new(parsed.job_id))
    }

    fn await_completion(&mut self, job_id: &JobId) -> MedleyResult<Completion> {
        let url = self.cfg.event_stream_url();
        let (mut socket, _response) = tungstenite::connect(&url)
            .map_err(|e| MedleyError::upstream(format!("event stream connect failed: {e}")))?;

        let deadline = self
            .cfg
            .event_deadline_secs
            .map(|secs| Instant::now() + Duration::from_secs(secs));
        if deadline.is_some() {
            // Poll in one-second slices so the deadline is honored even
            // when the engine goes quiet.
            if let MaybeTlsStream::Plain(stream) = socket.get_ref() {
                stream.set_read_timeout(Some(Duration::from_secs(1)))?;
            }
        }

        loop {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(MedleyError::upstream(format!(
                        "no completion signal for job {job_id} within the configured deadline"
                    )));
                }
            }
            match socket.read() {
                Ok(Message::Text(text)) => {
                    let Ok(frame) = serde_json::from_str::<EventFrame>(&text) else {
                        continue;
                    };
                    if frame.event_type == "executing"
                        && frame.data.node.is_none()
                        && frame.data.job_id.as_deref() == Some(job_id.as_str())
                    {
                        tracing::debug!(%job_id, "Engine signalled job completion");
                        return Ok(Completion::Finished);
                    }
                }
                Ok(Message::Close(_)) => {
                    tracing::warn!(%job_id, "Event stream closed before completion signal");
                    return Ok(Completion::Inconclusive);
                }
                Ok(_) => continue,
                Err(tungstenite::Error::Io(e))
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    continue;
                }
                Err(e) => {
                    tracing::warn!(%job_id, error = %e, "Event stream dropped");
                    return Ok(Completion::Inconclusive);
                }
            }
        }
    }

    fn fetch_history(&mut self, job_id: &JobId) -> MedleyResult<ExecutionRecord> {
        let url = format!("{}/history/{}", self.cfg.http_base(), job_id);
        let response = self
            .http
            .get(&url)
            .send()
            .map_err(|e| MedleyError::upstream(format!("history fetch failed: {e}")))?;
        if !response.status().is_success() {
            return Err(MedleyError::upstream(format!(
                "history fetch rejected with status {}",
                response.status()
            )));
        }
        // The history endpoint keys its payload by job id.
        let mut parsed: BTreeMap<String, HistoryEntry> = response
            .json()
            .map_err(|e| MedleyError::upstream(format!("malformed history response: {e}")))?;
        let entry = parsed
            .remove(job_id.as_str())
            .ok_or_else(|| MedleyError::not_found(format!("history for job {job_id}")))?;
        Ok(ExecutionRecord {
            steps: entry.outputs,
        })
    }
}
