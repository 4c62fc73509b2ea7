use std::io::Cursor;

use anyhow::{Context, Result};
use atelier_contracts::codec::{ArtifactKind, ArtifactRecord, ResourceCodec};
use atelier_contracts::runs::{Capability, GenerationOutput};
use image::{ImageFormat, Rgb, RgbImage};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use super::{GenerationInput, GenerationService};

const PLACEHOLDER_SIZE: u32 = 256;

/// Network-free text-to-image: a solid PNG coloured by the prompt hash.
pub struct FallbackImageService {
    codec: ResourceCodec,
}

impl FallbackImageService {
    pub fn new(codec: ResourceCodec) -> Self {
        Self { codec }
    }

    fn render(&self, prompt: &str) -> Result<ArtifactRecord> {
        let (r, g, b) = color_from_prompt(prompt);
        let image = RgbImage::from_pixel(PLACEHOLDER_SIZE, PLACEHOLDER_SIZE, Rgb([r, g, b]));
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .context("failed to encode placeholder PNG")?;
        Ok(self.codec.persist(&bytes, ArtifactKind::Image, None)?)
    }
}

impl GenerationService for FallbackImageService {
    fn name(&self) -> &str {
        "fallback-text-to-image"
    }

    fn capability(&self) -> Capability {
        Capability::TextToImage
    }

    fn generate(&self, input: GenerationInput<'_>) -> GenerationOutput {
        let mut metadata = Map::new();
        metadata.insert("service".to_string(), json!(self.name()));
        metadata.insert("fallback".to_string(), json!(true));
        let GenerationInput::Prompt(prompt) = input else {
            return GenerationOutput::failed(
                format!("{} does not accept {} input", self.capability(), input.label()),
                metadata,
            );
        };
        metadata.insert("prompt".to_string(), json!(prompt));
        metadata.insert("format".to_string(), json!("png"));
        metadata.insert("width".to_string(), json!(PLACEHOLDER_SIZE));
        metadata.insert("height".to_string(), json!(PLACEHOLDER_SIZE));

        match self.render(prompt) {
            Ok(artifact) => {
                info!(path = %artifact.path.display(), "placeholder image written");
                GenerationOutput::produced(artifact, metadata)
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "placeholder image failed");
                GenerationOutput::failed(format!("{err:#}"), metadata)
            }
        }
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"prompt": {"type": "string"}},
            "required": ["prompt"],
        })
    }
}

/// Network-free image-to-3D: a JSON document standing in for a model.
pub struct FallbackModelService {
    codec: ResourceCodec,
}

impl FallbackModelService {
    pub fn new(codec: ResourceCodec) -> Self {
        Self { codec }
    }

    fn describe(&self, image: &[u8]) -> Result<ArtifactRecord> {
        let placeholder = json!({
            "fallback": true,
            "model_type": "cube",
            "description": format!("Placeholder cube derived from a {}-byte source image", image.len()),
            "source_image_sha256": hex::encode(Sha256::digest(image)),
        });
        let bytes =
            serde_json::to_vec_pretty(&placeholder).context("failed to serialize placeholder model")?;
        Ok(self.codec.persist(&bytes, ArtifactKind::Model, None)?)
    }
}

impl GenerationService for FallbackModelService {
    fn name(&self) -> &str {
        "fallback-image-to-3d"
    }

    fn capability(&self) -> Capability {
        Capability::ImageTo3d
    }

    fn generate(&self, input: GenerationInput<'_>) -> GenerationOutput {
        let mut metadata = Map::new();
        metadata.insert("service".to_string(), json!(self.name()));
        metadata.insert("fallback".to_string(), json!(true));
        let GenerationInput::Image(image) = input else {
            return GenerationOutput::failed(
                format!("{} does not accept {} input", self.capability(), input.label()),
                metadata,
            );
        };
        metadata.insert("format".to_string(), json!("glb-placeholder"));
        metadata.insert("encoding".to_string(), json!("json"));
        metadata.insert("model_type".to_string(), json!("cube"));

        match self.describe(image) {
            Ok(artifact) => {
                info!(path = %artifact.path.display(), "placeholder model written");
                GenerationOutput::produced(artifact, metadata)
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "placeholder model failed");
                GenerationOutput::failed(format!("{err:#}"), metadata)
            }
        }
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"image": {"type": "string", "contentEncoding": "base64"}},
            "required": ["image"],
        })
    }
}

fn color_from_prompt(prompt: &str) -> (u8, u8, u8) {
    let digest = Sha256::digest(prompt.as_bytes());
    (digest[0], digest[1], digest[2])
}
