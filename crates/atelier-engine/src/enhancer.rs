use std::time::Duration;

use anyhow::{bail, Context, Result};
use atelier_contracts::prompt::{clean_llm_output, creative_instruction, Enhancement, PromptEnhancer};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::transport::truncate_text;

/// Prompt enhancement through a local Ollama server.
pub struct OllamaEnhancer {
    host: String,
    model: String,
    http: HttpClient,
}

impl OllamaEnhancer {
    pub fn new(host: &str, model: &str, timeout: Duration) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            host: host.trim().trim_end_matches('/').to_string(),
            model: model.trim().to_string(),
            http,
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/api/generate", self.host)
    }
}

impl PromptEnhancer for OllamaEnhancer {
    fn name(&self) -> &str {
        "ollama"
    }

    fn enhance(&self, prompt: &str, context: Option<&str>) -> Result<Enhancement> {
        let endpoint = self.endpoint();
        let body = json!({
            "model": self.model,
            "prompt": creative_instruction(prompt, context),
            "stream": false,
        });
        debug!(endpoint = %endpoint, model = %self.model, "requesting prompt enhancement");
        let response = self
            .http
            .post(&endpoint)
            .json(&body)
            .send()
            .with_context(|| format!("LLM request failed ({endpoint})"))?;
        if !response.status().is_success() {
            let code = response.status().as_u16();
            let text = response.text().unwrap_or_default();
            bail!("LLM request failed ({code}): {}", truncate_text(&text, 512));
        }
        let payload: Value = response.json().context("LLM response was not JSON")?;
        let enhancement = enhancement_from_response(&payload)?;
        info!(
            model = %self.model,
            chars = enhancement.enhanced_prompt.len(),
            "prompt enhanced"
        );
        Ok(enhancement)
    }
}

fn enhancement_from_response(payload: &Value) -> Result<Enhancement> {
    let raw = payload
        .get("response")
        .and_then(Value::as_str)
        .context("LLM response has no text")?;
    let cleaned = clean_llm_output(raw);
    if cleaned.is_empty() {
        bail!("LLM returned an empty enhancement");
    }
    Ok(Enhancement::from_text(cleaned))
}
