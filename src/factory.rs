use std::sync::Arc;
use std::time::Instant;

use crate::dispatch::TextGenerator;
use crate::dispatch::keys::KeyPool;
use crate::error::DatafactError;
use crate::fanout::{self, PIPELINE_MAX_CONCURRENCY};
use crate::pipeline::{self, GenerationTask, PipelineConfig};
use crate::tools::factory::{FactoryRequest, FactoryResponse};

/// Runs one generate→parse pipeline per persona with bounded concurrency.
///
/// Request-level problems (validation, empty key pool) fail the whole call
/// before any task starts. Per-task failures end up in `errors` and leave
/// an empty slot in `results`.
pub struct FactoryExecutor<G> {
    generator: Arc<G>,
    default_model: String,
    max_concurrency: usize,
}

impl<G: TextGenerator> FactoryExecutor<G> {
    pub fn new(generator: Arc<G>, default_model: impl Into<String>) -> Self {
        Self {
            generator,
            default_model: default_model.into(),
            max_concurrency: PIPELINE_MAX_CONCURRENCY,
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub async fn execute(&self, req: FactoryRequest) -> Result<FactoryResponse, DatafactError> {
        req.validate()?;
        let keys = Arc::new(KeyPool::parse(&req.gemini_api_key)?);

        let config = Arc::new(PipelineConfig {
            model: req.model_or(&self.default_model).to_string(),
            parser_system_prompt: req.system_prompt_parser,
            parser_user_prompt: req.user_prompt_parser,
        });

        let form_text = req.form_text.filter(|t| !t.is_empty());
        let tasks: Vec<GenerationTask> = req
            .system_prompt_factory
            .into_iter()
            .enumerate()
            .map(|(index, persona_prompt)| GenerationTask {
                index,
                persona_prompt,
                user_prompt_template: req.user_prompt_factory.clone(),
                form_text: form_text.clone(),
            })
            .collect();

        let total = tasks.len();
        let start = Instant::now();
        tracing::info!(
            tasks = total,
            keys = keys.len(),
            model = config.model,
            "factory run starting"
        );

        let generator = self.generator.clone();
        let outcome = fanout::run_all(
            tasks,
            self.max_concurrency,
            "Task",
            move |_, task: GenerationTask| {
                let generator = generator.clone();
                let keys = keys.clone();
                let config = config.clone();
                async move { pipeline::run(&*generator, &task, &keys, &config).await }
            },
        )
        .await;

        tracing::info!(
            tasks = total,
            success = outcome.success_count,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "factory run finished"
        );

        Ok(FactoryResponse {
            total_processed: total,
            success_count: outcome.success_count,
            results: outcome
                .results
                .into_iter()
                .map(Option::unwrap_or_default)
                .collect(),
            errors: outcome.errors,
        })
    }
}
