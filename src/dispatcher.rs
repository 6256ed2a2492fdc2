//! Fan-out of one composed announcement to every configured audio target.
//!
//! Each target gets exactly one speak request. Requests run concurrently
//! and a failure on one target is recorded without touching the others.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{AudioTarget, Config};
use crate::error::DispatchError;

/// One speak call against the host's TTS capability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeakRequest {
    pub target: String,
    pub tts_engine: String,
    pub message: String,
    pub volume: f64,
    pub cache: bool,
    pub language: Option<String>,
    pub options: BTreeMap<String, serde_json::Value>,
    #[serde(skip)]
    pub preroll: Duration,
}

/// Anything that can render speech on a named audio target.
#[async_trait]
pub trait SpeechSink: Send + Sync {
    async fn speak(&self, request: &SpeakRequest) -> Result<(), DispatchError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetOutcome {
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TargetOutcome {
    pub fn ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchReport {
    pub outcomes: Vec<TargetOutcome>,
}

impl DispatchReport {
    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.ok()).count()
    }

    pub fn delivered(&self) -> usize {
        self.outcomes.len() - self.failures()
    }
}

/// Build the request for one target, or the reason there is none.
pub fn request_for(
    config: &Config,
    target: &AudioTarget,
    message: &str,
    volume_override: Option<f64>,
) -> Result<SpeakRequest, DispatchError> {
    let tts_engine = config
        .tts_engine_for(target)
        .ok_or_else(|| DispatchError::NoTtsEngine(target.entity_id.clone()))?;

    Ok(SpeakRequest {
        target: target.entity_id.clone(),
        tts_engine: tts_engine.to_string(),
        message: message.to_string(),
        volume: volume_override.unwrap_or(target.volume).clamp(0.0, 1.0),
        cache: target.cache,
        language: target
            .language
            .clone()
            .filter(|l| !l.trim().is_empty()),
        options: target.options.clone(),
        preroll: Duration::from_millis(target.preroll_ms),
    })
}

/// Speak `message` on every target in `config`. The report keeps target
/// order; completion order is whatever the sink produces.
pub async fn dispatch(
    message: &str,
    config: &Config,
    sink: &dyn SpeechSink,
    volume_override: Option<f64>,
) -> DispatchReport {
    if message.trim().is_empty() {
        warn!("Empty announcement, nothing dispatched");
        return DispatchReport::default();
    }

    let calls = config.targets.iter().map(|target| async move {
        let result = match request_for(config, target, message, volume_override) {
            Ok(request) => sink.speak(&request).await,
            Err(e) => Err(e),
        };
        match &result {
            Ok(()) => info!("Announced on {}", target.entity_id),
            Err(e) => warn!("Announcement on {} failed: {e}", target.entity_id),
        }
        TargetOutcome {
            target: target.entity_id.clone(),
            error: result.err().map(|e| e.to_string()),
        }
    });

    DispatchReport {
        outcomes: join_all(calls).await,
    }
}

/// Sink for dry-run mode: logs each request and reports success.
pub struct LogSpeaker;

#[async_trait]
impl SpeechSink for LogSpeaker {
    async fn speak(&self, request: &SpeakRequest) -> Result<(), DispatchError> {
        info!(
            "[dry-run] {} via {} at volume {:.2}: {}",
            request.target, request.tts_engine, request.volume, request.message
        );
        Ok(())
    }
}
