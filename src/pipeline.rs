use crate::dispatch::TextGenerator;
use crate::dispatch::keys::KeyPool;
use crate::error::{DatafactError, Stage};

/// Marker in the generation prompt that is replaced by the form text.
/// Matches what the orchestration tool's templates already contain.
pub const FORM_PLACEHOLDER: &str = "{{ $json.form }}";

/// One persona's worth of work. Built at request start, consumed once.
#[derive(Debug, Clone)]
pub struct GenerationTask {
    pub index: usize,
    pub persona_prompt: String,
    pub user_prompt_template: String,
    pub form_text: Option<String>,
}

impl GenerationTask {
    /// The generation-stage user prompt with the form text substituted in.
    /// Without form text the template is sent as is, marker included.
    pub fn user_prompt(&self) -> String {
        match self.form_text.as_deref().filter(|t| !t.is_empty()) {
            Some(form) => self.user_prompt_template.replace(FORM_PLACEHOLDER, form),
            None => self.user_prompt_template.clone(),
        }
    }
}

/// Settings shared by every task of one factory request.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub model: String,
    pub parser_system_prompt: String,
    pub parser_user_prompt: String,
}

impl PipelineConfig {
    /// Parse-stage input: generated text followed by the parser instructions.
    pub fn parser_input(&self, generated: &str) -> String {
        format!("{}\n\n{}", generated.trim(), self.parser_user_prompt.trim())
    }
}

/// Generate with the persona, then normalize the output with the parser
/// prompt. A generate failure stops the task before the parse call.
pub async fn run<G: TextGenerator>(
    generator: &G,
    task: &GenerationTask,
    keys: &KeyPool,
    config: &PipelineConfig,
) -> Result<String, DatafactError> {
    let wrap = |stage: Stage| {
        move |e: DatafactError| DatafactError::Stage {
            index: task.index,
            stage,
            source: Box::new(e),
        }
    };

    let generated = generator
        .generate(
            &config.model,
            keys.next(),
            &task.persona_prompt,
            &task.user_prompt(),
        )
        .await
        .map_err(wrap(Stage::Generate))?;

    tracing::debug!(
        index = task.index,
        chars = generated.len(),
        "generate stage done"
    );

    let parsed = generator
        .generate(
            &config.model,
            keys.next(),
            &config.parser_system_prompt,
            &config.parser_input(&generated),
        )
        .await
        .map_err(wrap(Stage::Parse))?;

    Ok(parsed.trim().to_string())
}
