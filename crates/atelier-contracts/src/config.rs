use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::apps::{DEFAULT_APP_DOMAIN, IMAGE_TO_3D_APP_ID, TEXT_TO_IMAGE_APP_ID};
use crate::error::{AtelierError, AtelierResult};

pub const DEFAULT_CALLER_ID: &str = "super-user";
pub const DEFAULT_LLM_MODEL: &str = "deepseek-r1:latest";
const DEFAULT_FETCH_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_CALL_TIMEOUT_MS: u64 = 120_000;
const DEFAULT_CONTEXT_LIMIT: usize = 3;

/// How the pipeline chooses between remote apps and local placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModePolicy {
    /// Probe the text-to-image app once and fall back if it does not answer.
    #[default]
    Auto,
    Live,
    Fallback,
}

impl FromStr for ModePolicy {
    type Err = AtelierError;

    fn from_str(raw: &str) -> AtelierResult<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "live" | "remote" => Ok(Self::Live),
            "fallback" | "mock" | "offline" => Ok(Self::Fallback),
            other => Err(AtelierError::Configuration(format!(
                "unknown mode '{other}' (expected auto, live or fallback)"
            ))),
        }
    }
}

impl fmt::Display for ModePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Live => "live",
            Self::Fallback => "fallback",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub app_ids: IndexSet<String>,
    pub app_domain: String,
    pub secure_transport: bool,
    pub datastore_dir: PathBuf,
    pub memory_path: Option<PathBuf>,
    pub events_path: Option<PathBuf>,
    pub caller_id: String,
    pub mode: ModePolicy,
    pub llm_host: String,
    pub llm_model: String,
    pub fetch_timeout_ms: u64,
    pub call_timeout_ms: u64,
    pub context_limit: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            app_ids: IndexSet::new(),
            app_domain: DEFAULT_APP_DOMAIN.to_string(),
            secure_transport: true,
            datastore_dir: PathBuf::from("datastore"),
            memory_path: None,
            events_path: None,
            caller_id: DEFAULT_CALLER_ID.to_string(),
            mode: ModePolicy::Auto,
            llm_host: default_llm_host(Path::new("/.dockerenv")),
            llm_model: DEFAULT_LLM_MODEL.to_string(),
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            context_limit: DEFAULT_CONTEXT_LIMIT,
        }
        .with_required_apps()
    }
}

impl PipelineConfig {
    /// Defaults overridden by `ATELIER_*` environment variables.
    pub fn from_env() -> AtelierResult<Self> {
        Self::default().apply_overrides(non_empty_env)
    }

    /// Applies overrides from `lookup` (keyed by environment variable name).
    pub fn apply_overrides<F>(mut self, lookup: F) -> AtelierResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("ATELIER_APP_IDS") {
            self.app_ids = raw
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(domain) = lookup("ATELIER_APP_DOMAIN") {
            self.app_domain = domain;
        }
        if let Some(raw) = lookup("ATELIER_SECURE_TRANSPORT") {
            self.secure_transport = parse_bool("ATELIER_SECURE_TRANSPORT", &raw)?;
        }
        if let Some(dir) = lookup("ATELIER_DATASTORE") {
            self.datastore_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup("ATELIER_MEMORY_PATH") {
            self.memory_path = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("ATELIER_EVENTS_PATH") {
            self.events_path = Some(PathBuf::from(path));
        }
        if let Some(caller) = lookup("ATELIER_CALLER_ID") {
            self.caller_id = caller;
        }
        if let Some(raw) = lookup("ATELIER_MODE") {
            self.mode = raw.parse()?;
        }
        if let Some(host) = lookup("ATELIER_LLM_HOST") {
            self.llm_host = host.trim_end_matches('/').to_string();
        }
        if let Some(model) = lookup("ATELIER_LLM_MODEL") {
            self.llm_model = model;
        }
        if let Some(raw) = lookup("ATELIER_FETCH_TIMEOUT_MS") {
            self.fetch_timeout_ms = parse_positive("ATELIER_FETCH_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = lookup("ATELIER_CALL_TIMEOUT_MS") {
            self.call_timeout_ms = parse_positive("ATELIER_CALL_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = lookup("ATELIER_CONTEXT_LIMIT") {
            self.context_limit = parse_positive("ATELIER_CONTEXT_LIMIT", &raw)? as usize;
        }
        Ok(self.with_required_apps())
    }

    /// Adds the text-to-image and image-to-3D apps when they are missing.
    pub fn with_required_apps(mut self) -> Self {
        for required in [TEXT_TO_IMAGE_APP_ID, IMAGE_TO_3D_APP_ID] {
            if !self.app_ids.contains(required) {
                self.app_ids.insert(required.to_string());
            }
        }
        self
    }

    pub fn memory_path(&self) -> PathBuf {
        self.memory_path
            .clone()
            .unwrap_or_else(|| self.datastore_dir.join("memory.jsonl"))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

fn default_llm_host(docker_marker: &Path) -> String {
    if docker_marker.exists() {
        "http://host.docker.internal:11434".to_string()
    } else {
        "http://localhost:11434".to_string()
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_positive(key: &str, raw: &str) -> AtelierResult<u64> {
    raw.trim()
        .parse::<u64>()
        .ok()
        .filter(|value| *value > 0)
        .ok_or_else(|| AtelierError::Configuration(format!("{key} must be a positive integer")))
}

fn parse_bool(key: &str, raw: &str) -> AtelierResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AtelierError::Configuration(format!("{key} must be a boolean"))),
    }
}
