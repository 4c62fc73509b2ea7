//! Error taxonomy shared by the codec, registry, invoker and memory layers.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced below the generation-service boundary.
///
/// Generation services convert every one of these into a missing artifact, so
/// the pipeline itself never has to match on them.
#[derive(Debug, Error)]
pub enum AtelierError {
    /// Missing or invalid configuration value.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Manifest, schema or channel could not be fetched/opened for an app.
    #[error("connectivity error for app '{app_id}': {reason}")]
    Connectivity { app_id: String, reason: String },

    /// The requested schema kind was never fetched for the app.
    #[error("{kind} schema not found for app ID: {app_id}")]
    SchemaNotFound { app_id: String, kind: String },

    /// The app has no live channel.
    #[error("connection not found for app ID: {app_id}")]
    ConnectionMissing { app_id: String },

    /// The request was sent (or attempted) but no usable response came back.
    #[error("remote execution failed for app '{app_id}'")]
    RemoteExecutionFailed {
        app_id: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Invalid base64 / binary payload.
    #[error("malformed encoding: {0}")]
    MalformedEncoding(String),

    /// Artifact could not be written.
    #[error("failed to persist {}", .path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The response carried no field the capability knows how to read.
    #[error("no {capability} data in response (fields: {fields:?})")]
    NoArtifactInResponse {
        capability: String,
        fields: Vec<String>,
    },

    /// Memory store read/write failure.
    #[error("memory store error: {0}")]
    Memory(String),
}

pub type AtelierResult<T> = std::result::Result<T, AtelierError>;

impl AtelierError {
    pub fn remote(app_id: &str, source: impl Into<anyhow::Error>) -> Self {
        let source: anyhow::Error = source.into();
        Self::RemoteExecutionFailed {
            app_id: app_id.to_string(),
            source: source.into(),
        }
    }

    /// Full cause chain on one line, for result/metadata fields.
    pub fn chain_text(&self) -> String {
        let mut parts = vec![self.to_string()];
        let mut cause = std::error::Error::source(self);
        while let Some(err) = cause {
            let text = err.to_string();
            if parts.last().map(|last| last != &text).unwrap_or(true) {
                parts.push(text);
            }
            cause = err.source();
        }
        parts.join(": ")
    }
}
