pub mod enhancer;
pub mod invoker;
pub mod pipeline;
pub mod registry;
pub mod services;
pub mod transport;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use anyhow::{Context, Result};
use atelier_contracts::codec::ResourceCodec;
use atelier_contracts::config::{ModePolicy, PipelineConfig};
use atelier_contracts::events::RunJournal;
use atelier_contracts::memory::JsonlMemoryStore;
use tracing::info;

pub use enhancer::OllamaEnhancer;
pub use invoker::{FieldValue, RemoteInvoker, ResponseBody};
pub use pipeline::CreativePipeline;
pub use registry::{AppRegistry, AppStatus};
pub use services::{GenerationInput, GenerationService, ServiceSet};
pub use transport::{AppChannel, AppTransport, HttpAppTransport};

pub fn connect_registry(config: &PipelineConfig) -> Result<AppRegistry> {
    let transport = HttpAppTransport::new(config.fetch_timeout(), config.call_timeout())?;
    Ok(AppRegistry::from_config(config, Arc::new(transport)))
}

/// Wires the production pipeline: remote apps unless `Fallback` is forced,
/// the Ollama enhancer, the JSON-lines memory and the optional run journal.
pub fn build_pipeline(config: &PipelineConfig) -> Result<CreativePipeline> {
    let codec = ResourceCodec::new(&config.datastore_dir);
    let invoker = match config.mode {
        ModePolicy::Fallback => None,
        ModePolicy::Auto | ModePolicy::Live => {
            Some(Arc::new(RemoteInvoker::new(Arc::new(connect_registry(config)?))))
        }
    };
    let services = ServiceSet::select(config.mode, invoker, codec, &config.caller_id)
        .context("failed to select generation services")?;

    let enhancer = OllamaEnhancer::new(&config.llm_host, &config.llm_model, config.call_timeout())?;
    let memory = Arc::new(JsonlMemoryStore::new(config.memory_path()));
    let mut pipeline = CreativePipeline::new(services, Box::new(enhancer), memory)
        .with_context_limit(config.context_limit);
    if let Some(events_path) = &config.events_path {
        pipeline = pipeline.with_journal(RunJournal::new(events_path));
    }
    info!(
        mode = %pipeline.mode(),
        datastore = %config.datastore_dir.display(),
        "pipeline ready"
    );
    Ok(pipeline)
}
