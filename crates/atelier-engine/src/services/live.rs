use std::sync::Arc;

use atelier_contracts::apps::{SchemaKind, IMAGE_TO_3D_APP_ID, TEXT_TO_IMAGE_APP_ID};
use atelier_contracts::codec::{ArtifactRecord, ResourceCodec};
use atelier_contracts::error::{AtelierError, AtelierResult};
use atelier_contracts::runs::{Capability, GenerationOutput};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use super::extract::extract_artifact;
use super::{GenerationInput, GenerationService};
use crate::invoker::RemoteInvoker;

/// Generation backed by a remote app reached through the invoker.
pub struct RemoteGenerationService {
    name: String,
    capability: Capability,
    app_id: String,
    caller_id: String,
    invoker: Arc<RemoteInvoker>,
    codec: ResourceCodec,
}

impl RemoteGenerationService {
    pub fn new(
        capability: Capability,
        app_id: impl Into<String>,
        invoker: Arc<RemoteInvoker>,
        codec: ResourceCodec,
        caller_id: &str,
    ) -> Self {
        let name = match capability {
            Capability::TextToImage => "remote-text-to-image",
            Capability::ImageTo3d => "remote-image-to-3d",
        };
        Self {
            name: name.to_string(),
            capability,
            app_id: app_id.into(),
            caller_id: caller_id.to_string(),
            invoker,
            codec,
        }
    }

    pub fn text_to_image(invoker: Arc<RemoteInvoker>, codec: ResourceCodec, caller_id: &str) -> Self {
        Self::new(
            Capability::TextToImage,
            TEXT_TO_IMAGE_APP_ID,
            invoker,
            codec,
            caller_id,
        )
    }

    pub fn image_to_3d(invoker: Arc<RemoteInvoker>, codec: ResourceCodec, caller_id: &str) -> Self {
        Self::new(
            Capability::ImageTo3d,
            IMAGE_TO_3D_APP_ID,
            invoker,
            codec,
            caller_id,
        )
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    fn request_body(&self, input: GenerationInput<'_>) -> AtelierResult<Value> {
        match (self.capability, input) {
            (Capability::TextToImage, GenerationInput::Prompt(prompt)) => {
                Ok(json!({"prompt": prompt}))
            }
            (Capability::ImageTo3d, GenerationInput::Image(bytes)) => {
                Ok(json!({"image": ResourceCodec::encode(bytes)}))
            }
            (capability, other) => Err(AtelierError::Configuration(format!(
                "{capability} does not accept {} input",
                other.label()
            ))),
        }
    }

    fn run(
        &self,
        input: GenerationInput<'_>,
        metadata: &mut Map<String, Value>,
    ) -> AtelierResult<ArtifactRecord> {
        let body = self.request_body(input)?;
        let response = self.invoker.call(&self.app_id, &body, &self.caller_id)?;
        metadata.insert("response_fields".to_string(), json!(response.field_names()));
        let bytes = extract_artifact(&response, self.capability)?;
        self.codec
            .persist(&bytes, self.capability.artifact_kind(), None)
    }
}

impl GenerationService for RemoteGenerationService {
    fn name(&self) -> &str {
        &self.name
    }

    fn capability(&self) -> Capability {
        self.capability
    }

    fn generate(&self, input: GenerationInput<'_>) -> GenerationOutput {
        let mut metadata = Map::new();
        metadata.insert("service".to_string(), json!(self.name));
        metadata.insert("app_id".to_string(), json!(self.app_id));
        metadata.insert("fallback".to_string(), json!(false));
        if let GenerationInput::Prompt(prompt) = input {
            metadata.insert("prompt".to_string(), json!(prompt));
        }

        match self.run(input, &mut metadata) {
            Ok(artifact) => {
                metadata.insert(
                    "format".to_string(),
                    json!(self.capability.artifact_kind().default_extension()),
                );
                metadata.insert("bytes".to_string(), json!(artifact.bytes.len()));
                info!(
                    service = %self.name,
                    path = %artifact.path.display(),
                    "remote generation succeeded"
                );
                GenerationOutput::produced(artifact, metadata)
            }
            Err(err) => {
                let reason = err.chain_text();
                warn!(service = %self.name, app_id = %self.app_id, error = %reason, "remote generation failed");
                GenerationOutput::failed(reason, metadata)
            }
        }
    }

    fn input_schema(&self) -> Value {
        self.invoker
            .registry()
            .schema(&self.app_id, SchemaKind::Input)
            .cloned()
            .unwrap_or_else(|_| json!({}))
    }

    fn is_available(&self) -> bool {
        self.invoker.registry().is_available(&self.app_id)
    }
}

#[cfg(test)]
mod tests {
    use atelier_contracts::codec::ArtifactKind;

    use super::*;
    use crate::registry::AppRegistry;
    use crate::test_support::FakeTransport;

    const DOMAIN: &str = "test.local";

    fn service_with(
        capability: Capability,
        output_schema: Value,
        reply: Result<Value, String>,
        resource: Option<(&str, &[u8])>,
        datastore: &std::path::Path,
    ) -> RemoteGenerationService {
        let mut transport = FakeTransport::new().with_app(
            "app-x.test.local",
            json!({"name": "X"}),
            json!({"properties": {"prompt": {"type": "string"}}}),
            output_schema,
            reply,
        );
        if let Some((url, bytes)) = resource {
            transport = transport.with_resource(url, bytes);
        }
        let registry = AppRegistry::initialize(["app-x"], DOMAIN, true, Arc::new(transport));
        RemoteGenerationService::new(
            capability,
            "app-x",
            Arc::new(RemoteInvoker::new(Arc::new(registry))),
            ResourceCodec::new(datastore),
            "super-user",
        )
    }

    #[test]
    fn resource_reply_is_persisted_as_image() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let service = service_with(
            Capability::TextToImage,
            json!({"properties": {"result": {"format": "resource"}}}),
            Ok(json!({"result": "reid-1"})),
            Some(("https://app-x.test.local/resource?reid=reid-1", b"png-data")),
            temp.path(),
        );

        let output = service.generate(GenerationInput::Prompt("a red fox"));
        let artifact = output
            .artifact
            .ok_or_else(|| anyhow::anyhow!("expected an artifact"))?;
        assert_eq!(artifact.kind, ArtifactKind::Image);
        assert_eq!(artifact.bytes, b"png-data");
        assert!(artifact.path.starts_with(temp.path().join("images")));
        assert_eq!(output.metadata["prompt"], json!("a red fox"));
        Ok(())
    }

    #[test]
    fn base64_model_reply_is_persisted_as_model() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let service = service_with(
            Capability::ImageTo3d,
            json!({"properties": {}}),
            Ok(json!({"model": ResourceCodec::encode(b"glTF-binary")})),
            None,
            temp.path(),
        );

        let output = service.generate(GenerationInput::Image(b"png-data"));
        let artifact = output
            .artifact
            .ok_or_else(|| anyhow::anyhow!("expected an artifact"))?;
        assert_eq!(artifact.kind, ArtifactKind::Model);
        assert!(artifact.path.starts_with(temp.path().join("models")));
        Ok(())
    }

    #[test]
    fn failures_become_missing_artifacts() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let service = service_with(
            Capability::TextToImage,
            json!({"properties": {}}),
            Ok(json!({})),
            None,
            temp.path(),
        );
        let output = service.generate(GenerationInput::Prompt("a red fox"));
        assert!(output.artifact.is_none());
        assert!(output.error().unwrap_or("").contains("no text_to_image data"));

        let output = service.generate(GenerationInput::Image(b"wrong input"));
        assert!(output.artifact.is_none());
        assert!(output.error().unwrap_or("").contains("does not accept image input"));
        Ok(())
    }

    #[test]
    fn remote_error_and_missing_connection_are_reported() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let service = service_with(
            Capability::TextToImage,
            json!({"properties": {}}),
            Err("gpu unavailable".to_string()),
            None,
            temp.path(),
        );
        let output = service.generate(GenerationInput::Prompt("a red fox"));
        assert!(output.error().unwrap_or("").contains("gpu unavailable"));

        let registry = AppRegistry::initialize(
            Vec::<String>::new(),
            DOMAIN,
            true,
            Arc::new(FakeTransport::new()),
        );
        let disconnected = RemoteGenerationService::text_to_image(
            Arc::new(RemoteInvoker::new(Arc::new(registry))),
            ResourceCodec::new(temp.path()),
            "super-user",
        );
        let output = disconnected.generate(GenerationInput::Prompt("a red fox"));
        assert!(output.error().unwrap_or("").starts_with("connection not found for app ID"));
        assert_eq!(disconnected.input_schema(), json!({}));
        Ok(())
    }

    #[test]
    fn input_schema_comes_from_registry() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let service = service_with(
            Capability::TextToImage,
            json!({"properties": {}}),
            Ok(json!({})),
            None,
            temp.path(),
        );
        assert_eq!(
            service.input_schema(),
            json!({"properties": {"prompt": {"type": "string"}}})
        );
        Ok(())
    }
}
