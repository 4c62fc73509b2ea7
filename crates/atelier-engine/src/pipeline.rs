use std::sync::Arc;

use atelier_contracts::events::{
    EventPayload, RunJournal, ARTIFACT_CREATED, CONTEXT_RESOLVED, GENERATION_FAILED,
    MEMORY_WRITE_FAILED, MEMORY_WRITTEN, PIPELINE_FINISHED, PIPELINE_STARTED, PROMPT_ENHANCED,
    STAGE_ENTERED,
};
use atelier_contracts::memory::{MemoryStore, NewCreation};
use atelier_contracts::prompt::{Enhancement, PromptEnhancer};
use atelier_contracts::runs::{GenerationOutput, PipelineResult, PipelineStage, ServiceMode};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::services::{GenerationInput, GenerationService, ServiceSet};

const DEFAULT_CONTEXT_LIMIT: usize = 3;

/// Prompt to enhanced description, image, model and memory record.
///
/// One `process` call runs its stages strictly in order. The pipeline is
/// shareable across threads; concurrent runs only meet in the registry
/// channels and the memory store.
pub struct CreativePipeline {
    services: ServiceSet,
    enhancer: Box<dyn PromptEnhancer>,
    memory: Arc<dyn MemoryStore>,
    journal: Option<RunJournal>,
    context_limit: usize,
}

struct Run<'a> {
    id: String,
    journal: Option<&'a RunJournal>,
    result: PipelineResult,
}

impl Run<'_> {
    fn emit(&self, event_type: &str, payload: Value) {
        let Some(journal) = self.journal else {
            return;
        };
        let payload: EventPayload = match payload {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        if let Err(err) = journal.emit(&self.id, event_type, payload) {
            warn!(run_id = %self.id, event_type, error = %format!("{err:#}"), "failed to record run event");
        }
    }

    fn enter(&mut self, stage: PipelineStage) {
        self.result.final_stage = stage;
        debug!(run_id = %self.id, stage = %stage, "stage entered");
        self.emit(STAGE_ENTERED, json!({"stage": stage}));
    }

    fn generation_failed(&self, stage: PipelineStage, output: &GenerationOutput) {
        warn!(
            run_id = %self.id,
            stage = %stage,
            error = output.error().unwrap_or(""),
            "generation produced no artifact"
        );
        self.emit(
            GENERATION_FAILED,
            json!({"stage": stage, "metadata": output.metadata}),
        );
    }

    fn finish(self, stage: PipelineStage) -> PipelineResult {
        let mut result = self.result;
        result.final_stage = stage;
        info!(
            run_id = %self.id,
            stage = %stage,
            success = result.success,
            mode = %result.mode,
            "pipeline finished"
        );
        if let Some(journal) = self.journal {
            let payload = match serde_json::to_value(&result) {
                Ok(Value::Object(map)) => map,
                _ => Map::new(),
            };
            if let Err(err) = journal.emit(&self.id, PIPELINE_FINISHED, payload) {
                warn!(run_id = %self.id, error = %format!("{err:#}"), "failed to record run event");
            }
        }
        result
    }
}

impl CreativePipeline {
    pub fn new(
        services: ServiceSet,
        enhancer: Box<dyn PromptEnhancer>,
        memory: Arc<dyn MemoryStore>,
    ) -> Self {
        Self {
            services,
            enhancer,
            memory,
            journal: None,
            context_limit: DEFAULT_CONTEXT_LIMIT,
        }
    }

    pub fn with_journal(mut self, journal: RunJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_context_limit(mut self, limit: usize) -> Self {
        self.context_limit = limit.max(1);
        self
    }

    pub fn mode(&self) -> ServiceMode {
        self.services.mode()
    }

    pub fn services(&self) -> &ServiceSet {
        &self.services
    }

    pub fn memory(&self) -> &dyn MemoryStore {
        self.memory.as_ref()
    }

    pub fn process(&self, prompt: &str, reference_query: Option<&str>) -> PipelineResult {
        let mut run = Run {
            id: Uuid::new_v4().to_string(),
            journal: self.journal.as_ref(),
            result: PipelineResult::new(prompt, self.mode()),
        };
        let reference_query = reference_query
            .map(str::trim)
            .filter(|query| !query.is_empty());
        info!(
            run_id = %run.id,
            mode = %self.mode(),
            reference = reference_query.unwrap_or(""),
            "pipeline started"
        );
        run.emit(
            PIPELINE_STARTED,
            json!({
                "prompt": prompt,
                "reference_query": reference_query,
                "mode": self.mode(),
            }),
        );

        let context = match reference_query {
            Some(query) => {
                run.enter(PipelineStage::ContextLookup);
                Some(self.lookup_context(&run, query))
            }
            None => None,
        };

        run.enter(PipelineStage::PromptEnhancement);
        let enhancement = self.enhance(&run, prompt, context.as_deref());
        run.result.enhanced_prompt = enhancement.enhanced_prompt.clone();
        run.result.style_tags = enhancement.style_tags.clone();
        run.result.mood = Some(enhancement.mood.clone());
        run.emit(
            PROMPT_ENHANCED,
            json!({
                "enhanced_prompt": enhancement.enhanced_prompt,
                "style_tags": enhancement.style_tags,
                "mood": enhancement.mood,
            }),
        );

        run.enter(PipelineStage::ImageGeneration);
        let image_output = self
            .services
            .image()
            .generate(GenerationInput::Prompt(&enhancement.enhanced_prompt));
        let Some(image) = image_output.artifact.as_ref() else {
            run.generation_failed(PipelineStage::ImageGeneration, &image_output);
            run.result.success = false;
            run.result.error = Some(failure_reason(self.services.image(), &image_output));
            return run.finish(PipelineStage::FailedAtImage);
        };
        run.result.image_path = Some(image.path.clone());
        run.emit(
            ARTIFACT_CREATED,
            json!({"kind": image.kind, "path": image.path.display().to_string()}),
        );

        run.enter(PipelineStage::ModelGeneration);
        let model_output = self
            .services
            .model()
            .generate(GenerationInput::Image(&image.bytes));
        let Some(model) = model_output.artifact.as_ref() else {
            run.generation_failed(PipelineStage::ModelGeneration, &model_output);
            run.result.success = true;
            run.result.error = Some(failure_reason(self.services.model(), &model_output));
            return run.finish(PipelineStage::PartialSuccess);
        };
        run.result.model_path = Some(model.path.clone());
        run.result.success = true;
        run.emit(
            ARTIFACT_CREATED,
            json!({"kind": model.kind, "path": model.path.display().to_string()}),
        );

        run.enter(PipelineStage::MemoryWrite);
        let creation = NewCreation {
            user_prompt: prompt.to_string(),
            enhanced_prompt: enhancement.enhanced_prompt.clone(),
            image_path: Some(image.path.display().to_string()),
            model_path: Some(model.path.display().to_string()),
            metadata: creation_metadata(&run, &enhancement, &image_output, &model_output),
            tags: enhancement.style_tags.clone(),
        };
        match self.memory.store_creation(creation) {
            Ok(record) => {
                run.emit(MEMORY_WRITTEN, json!({"creation_id": record.id}));
                run.result.creation_id = Some(record.id);
            }
            Err(err) => {
                let reason = err.chain_text();
                warn!(run_id = %run.id, error = %reason, "memory write failed");
                run.emit(MEMORY_WRITE_FAILED, json!({"error": reason}));
                run.result.memory_error = Some(reason);
            }
        }

        run.finish(PipelineStage::Done)
    }

    fn lookup_context(&self, run: &Run<'_>, query: &str) -> String {
        let context = match self.memory.context_for(Some(query), self.context_limit) {
            Ok(context) => context,
            Err(err) => {
                warn!(run_id = %run.id, error = %err.chain_text(), "memory context lookup failed");
                String::new()
            }
        };
        let matches = context.lines().count();
        debug!(run_id = %run.id, query, matches, "context resolved");
        run.emit(CONTEXT_RESOLVED, json!({"query": query, "matches": matches}));
        context
    }

    fn enhance(&self, run: &Run<'_>, prompt: &str, context: Option<&str>) -> Enhancement {
        match self.enhancer.enhance(prompt, context) {
            Ok(enhancement) if !enhancement.enhanced_prompt.trim().is_empty() => enhancement,
            Ok(_) => {
                warn!(run_id = %run.id, enhancer = self.enhancer.name(), "empty enhancement; using original prompt");
                Enhancement::unchanged(prompt)
            }
            Err(err) => {
                warn!(
                    run_id = %run.id,
                    enhancer = self.enhancer.name(),
                    error = %format!("{err:#}"),
                    "prompt enhancement failed; using original prompt"
                );
                Enhancement::unchanged(prompt)
            }
        }
    }
}

fn failure_reason(service: &dyn GenerationService, output: &GenerationOutput) -> String {
    match output.error() {
        Some(reason) => reason.to_string(),
        None => format!("{} produced no artifact", service.name()),
    }
}

fn creation_metadata(
    run: &Run<'_>,
    enhancement: &Enhancement,
    image_output: &GenerationOutput,
    model_output: &GenerationOutput,
) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("run_id".to_string(), json!(run.id));
    metadata.insert("mode".to_string(), json!(run.result.mode));
    metadata.insert("mood".to_string(), json!(enhancement.mood));
    metadata.insert("style_tags".to_string(), json!(enhancement.style_tags));
    metadata.insert("image".to_string(), Value::Object(image_output.metadata.clone()));
    metadata.insert("model".to_string(), Value::Object(model_output.metadata.clone()));
    metadata
}
