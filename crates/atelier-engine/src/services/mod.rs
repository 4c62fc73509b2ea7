pub mod extract;
pub mod fallback;
pub mod live;

use std::sync::Arc;

use atelier_contracts::codec::ResourceCodec;
use atelier_contracts::config::ModePolicy;
use atelier_contracts::error::{AtelierError, AtelierResult};
use atelier_contracts::runs::{Capability, GenerationOutput, ServiceMode};
use serde_json::Value;
use tracing::{info, warn};

pub use fallback::{FallbackImageService, FallbackModelService};
pub use live::RemoteGenerationService;

use crate::invoker::RemoteInvoker;

#[derive(Debug, Clone, Copy)]
pub enum GenerationInput<'a> {
    Prompt(&'a str),
    Image(&'a [u8]),
}

impl GenerationInput<'_> {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Prompt(_) => "prompt",
            Self::Image(_) => "image",
        }
    }
}

/// One generation capability. `generate` never fails: a missing artifact in
/// the output is the failure signal.
pub trait GenerationService: Send + Sync {
    fn name(&self) -> &str;
    fn capability(&self) -> Capability;
    fn generate(&self, input: GenerationInput<'_>) -> GenerationOutput;
    /// Request schema; an empty object when it cannot be determined.
    fn input_schema(&self) -> Value;
    /// Whether the backing app can be called at all.
    fn is_available(&self) -> bool {
        true
    }
}

/// The image and model services of one pipeline, with the mode they share.
pub struct ServiceSet {
    mode: ServiceMode,
    image: Box<dyn GenerationService>,
    model: Box<dyn GenerationService>,
}

impl ServiceSet {
    pub fn new(
        mode: ServiceMode,
        image: Box<dyn GenerationService>,
        model: Box<dyn GenerationService>,
    ) -> Self {
        Self { mode, image, model }
    }

    pub fn live(invoker: Arc<RemoteInvoker>, codec: ResourceCodec, caller_id: &str) -> Self {
        Self::new(
            ServiceMode::Live,
            Box::new(RemoteGenerationService::text_to_image(
                Arc::clone(&invoker),
                codec.clone(),
                caller_id,
            )),
            Box::new(RemoteGenerationService::image_to_3d(invoker, codec, caller_id)),
        )
    }

    pub fn fallback(codec: ResourceCodec) -> Self {
        Self::new(
            ServiceMode::Fallback,
            Box::new(FallbackImageService::new(codec.clone())),
            Box::new(FallbackModelService::new(codec)),
        )
    }

    /// Picks live or fallback services once. `Auto` keeps the live set only
    /// when both services are available and the image service reports a
    /// non-empty input schema.
    pub fn choose(
        policy: ModePolicy,
        live: Option<ServiceSet>,
        fallback: ServiceSet,
    ) -> AtelierResult<Self> {
        match (policy, live) {
            (ModePolicy::Fallback, _) => {
                info!("fallback services forced by configuration");
                Ok(fallback)
            }
            (ModePolicy::Live, Some(live)) => Ok(live),
            (ModePolicy::Live, None) => Err(AtelierError::Configuration(
                "live mode requires a connected app registry".to_string(),
            )),
            (ModePolicy::Auto, Some(live)) if live.probe() => {
                info!(service = live.image.name(), "live services selected");
                Ok(live)
            }
            (ModePolicy::Auto, _) => {
                warn!("required apps unavailable; using fallback services");
                Ok(fallback)
            }
        }
    }

    pub fn select(
        policy: ModePolicy,
        invoker: Option<Arc<RemoteInvoker>>,
        codec: ResourceCodec,
        caller_id: &str,
    ) -> AtelierResult<Self> {
        let live = invoker.map(|invoker| Self::live(invoker, codec.clone(), caller_id));
        Self::choose(policy, live, Self::fallback(codec))
    }

    fn probe(&self) -> bool {
        if !self.image.is_available() || !self.model.is_available() {
            return false;
        }
        matches!(self.image.input_schema(), Value::Object(map) if !map.is_empty())
    }

    pub fn mode(&self) -> ServiceMode {
        self.mode
    }

    pub fn image(&self) -> &dyn GenerationService {
        self.image.as_ref()
    }

    pub fn model(&self) -> &dyn GenerationService {
        self.model.as_ref()
    }
}
