use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::codec::{ArtifactKind, ArtifactRecord};

/// Which family of generation services a pipeline instance runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceMode {
    Live,
    Fallback,
}

impl fmt::Display for ServiceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Live => "live",
            Self::Fallback => "fallback",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    TextToImage,
    ImageTo3d,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TextToImage => "text_to_image",
            Self::ImageTo3d => "image_to_3d",
        }
    }

    pub fn artifact_kind(self) -> ArtifactKind {
        match self {
            Self::TextToImage => ArtifactKind::Image,
            Self::ImageTo3d => ArtifactKind::Model,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one generation call. A missing artifact is the failure signal;
/// the reason is then under `metadata["error"]`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GenerationOutput {
    pub artifact: Option<ArtifactRecord>,
    pub metadata: Map<String, Value>,
}

impl GenerationOutput {
    pub fn produced(artifact: ArtifactRecord, metadata: Map<String, Value>) -> Self {
        Self {
            artifact: Some(artifact),
            metadata,
        }
    }

    pub fn failed(reason: impl Into<String>, mut metadata: Map<String, Value>) -> Self {
        metadata.insert("error".to_string(), Value::String(reason.into()));
        Self {
            artifact: None,
            metadata,
        }
    }

    pub fn error(&self) -> Option<&str> {
        self.metadata.get("error").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Start,
    ContextLookup,
    PromptEnhancement,
    ImageGeneration,
    ModelGeneration,
    MemoryWrite,
    Done,
    FailedAtImage,
    PartialSuccess,
}

impl PipelineStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::ContextLookup => "context_lookup",
            Self::PromptEnhancement => "prompt_enhancement",
            Self::ImageGeneration => "image_generation",
            Self::ModelGeneration => "model_generation",
            Self::MemoryWrite => "memory_write",
            Self::Done => "done",
            Self::FailedAtImage => "failed_at_image",
            Self::PartialSuccess => "partial_success",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::FailedAtImage | Self::PartialSuccess)
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub original_prompt: String,
    pub enhanced_prompt: String,
    pub image_path: Option<PathBuf>,
    pub model_path: Option<PathBuf>,
    pub success: bool,
    pub error: Option<String>,
    pub mode: ServiceMode,
    pub final_stage: PipelineStage,
    pub creation_id: Option<String>,
    pub memory_error: Option<String>,
    #[serde(default)]
    pub style_tags: Vec<String>,
    pub mood: Option<String>,
}

impl PipelineResult {
    pub fn new(original_prompt: &str, mode: ServiceMode) -> Self {
        Self {
            original_prompt: original_prompt.to_string(),
            enhanced_prompt: original_prompt.to_string(),
            image_path: None,
            model_path: None,
            success: false,
            error: None,
            mode,
            final_stage: PipelineStage::Start,
            creation_id: None,
            memory_error: None,
            style_tags: Vec::new(),
            mood: None,
        }
    }

    /// Image produced but no model.
    pub fn is_partial(&self) -> bool {
        self.success && self.image_path.is_some() && self.model_path.is_none()
    }
}
