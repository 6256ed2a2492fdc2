//! Optional Ollama rewrite of a composed announcement.
//!
//! Asks a local model to make the message sound more natural. Any failure
//! (network, status, empty or oversized output) falls back to the
//! original text.

use std::time::{Duration, Instant};

use reqwest::Client;
use serde_json::json;
use tracing::{info, warn};

use crate::config::RewriteConfig;

const REWRITE_PROMPT: &str = r#"Rewrite this weather announcement so it sounds natural when spoken aloud. Keep every number, time and name exactly as written. Do not add new facts. Output ONLY the rewritten announcement, nothing else.

Announcement: {text}

Rewritten:"#;

pub struct OllamaRewriter {
    model: String,
    host: String,
    prompt: String,
    client: Client,
}

impl OllamaRewriter {
    pub fn new(config: &RewriteConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to build rewrite HTTP client with timeout: {e}");
                Client::new()
            });

        Self {
            model: config.model.clone(),
            host: config.host.trim_end_matches('/').to_string(),
            prompt: config
                .prompt
                .clone()
                .filter(|p| p.contains("{text}"))
                .unwrap_or_else(|| REWRITE_PROMPT.to_string()),
            client,
        }
    }

    /// Rewrite `text`, or return it unchanged if the model is unavailable.
    pub async fn rewrite(&self, text: &str) -> String {
        let t_start = Instant::now();
        let body = json!({
            "model": self.model,
            "prompt": self.prompt.replace("{text}", text),
            "stream": false,
            "options": {
                "temperature": 0.3,
                "num_predict": 300
            }
        });

        let url = format!("{}/api/generate", self.host);
        let resp = match self.client.post(&url).json(&body).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!("Ollama rewrite request failed: {e}");
                return text.to_string();
            }
        };

        if !resp.status().is_success() {
            warn!("Ollama rewrite returned status {}", resp.status());
            return text.to_string();
        }

        let latency_ms = t_start.elapsed().as_secs_f64() * 1000.0;
        match resp.json::<serde_json::Value>().await {
            Ok(data) => {
                let result = accept_rewrite(text, data["response"].as_str().unwrap_or(""));
                info!(
                    "Rewrote announcement {} chars → {} chars ({latency_ms:.0}ms)",
                    text.len(),
                    result.len()
                );
                result
            }
            Err(e) => {
                warn!("Failed to parse Ollama rewrite response: {e}");
                text.to_string()
            }
        }
    }
}

/// Keep the model's output only if it looks like an announcement.
fn accept_rewrite(original: &str, candidate: &str) -> String {
    let candidate = candidate.trim().trim_matches('"').trim();
    if candidate.is_empty() {
        warn!("Ollama rewrite returned empty response");
        return original.to_string();
    }
    if candidate.len() > original.len() * 2 + 40 {
        warn!("Ollama rewrite is much longer than the original, discarding");
        return original.to_string();
    }
    candidate.to_string()
}
