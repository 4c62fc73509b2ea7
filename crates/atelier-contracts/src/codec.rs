use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AtelierError, AtelierResult};

pub const IMAGES_BUCKET: &str = "images";
pub const MODELS_BUCKET: &str = "models";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Image,
    Model,
}

impl ArtifactKind {
    pub fn bucket(self) -> &'static str {
        match self {
            Self::Image => IMAGES_BUCKET,
            Self::Model => MODELS_BUCKET,
        }
    }

    pub fn file_prefix(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Model => "model",
        }
    }

    pub fn default_extension(self) -> &'static str {
        match self {
            Self::Image => "png",
            Self::Model => "glb",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_prefix())
    }
}

/// Bytes written to the datastore. Immutable once returned by [`ResourceCodec::persist`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRecord {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub bytes: Vec<u8>,
}

/// Base64 transport encoding plus the `images/` and `models/` buckets of a datastore.
#[derive(Debug, Clone)]
pub struct ResourceCodec {
    base_dir: PathBuf,
}

impl ResourceCodec {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn bucket_dir(&self, kind: ArtifactKind) -> PathBuf {
        self.base_dir.join(kind.bucket())
    }

    pub fn encode(data: &[u8]) -> String {
        BASE64.encode(data)
    }

    /// Accepts plain base64 or a `data:<mime>;base64,` URL.
    pub fn decode(text: &str) -> AtelierResult<Vec<u8>> {
        let trimmed = text.trim();
        let payload = match trimmed.strip_prefix("data:") {
            Some(rest) => rest
                .split_once(";base64,")
                .map(|(_, data)| data)
                .ok_or_else(|| {
                    AtelierError::MalformedEncoding("data URL is not base64 encoded".to_string())
                })?,
            None => trimmed,
        };
        BASE64
            .decode(payload.as_bytes())
            .map_err(|err| AtelierError::MalformedEncoding(err.to_string()))
    }

    pub fn persist(
        &self,
        data: &[u8],
        kind: ArtifactKind,
        suggested_name: Option<&str>,
    ) -> AtelierResult<ArtifactRecord> {
        let file_name = match suggested_name {
            Some(name) => validate_file_name(name)?,
            None => generated_file_name(kind),
        };
        let dir = self.bucket_dir(kind);
        let path = dir.join(file_name);

        if kind == ArtifactKind::Image && data.len() < 100 {
            warn!(bytes = data.len(), "image payload is unusually small");
        }
        std::fs::create_dir_all(&dir).map_err(|source| AtelierError::Persistence {
            path: dir.clone(),
            source,
        })?;
        std::fs::write(&path, data).map_err(|source| AtelierError::Persistence {
            path: path.clone(),
            source,
        })?;
        info!(kind = %kind, path = %path.display(), bytes = data.len(), "artifact persisted");

        Ok(ArtifactRecord {
            kind,
            path,
            bytes: data.to_vec(),
        })
    }

    /// `Ok(None)` when nothing exists at `path`.
    pub fn load(&self, path: &Path) -> AtelierResult<Option<Vec<u8>>> {
        match std::fs::read(path) {
            Ok(bytes) => {
                debug!(path = %path.display(), bytes = bytes.len(), "artifact loaded");
                Ok(Some(bytes))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "artifact not found");
                Ok(None)
            }
            Err(source) => Err(AtelierError::Persistence {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

fn generated_file_name(kind: ArtifactKind) -> String {
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}.{}",
        kind.file_prefix(),
        stamp,
        &suffix[..8],
        kind.default_extension()
    )
}

fn validate_file_name(name: &str) -> AtelierResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed == "."
        || trimmed == ".."
        || trimmed.contains('/')
        || trimmed.contains('\\')
    {
        return Err(AtelierError::Configuration(format!(
            "artifact name '{name}' must be a bare file name"
        )));
    }
    Ok(trimmed.to_string())
}
