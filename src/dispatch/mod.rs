pub mod gemini;
pub mod keys;

use std::future::Future;

use crate::error::DatafactError;

/// Anything that can turn a (system, user) prompt pair into text.
///
/// `GeminiClient` is the production implementation; the pipeline only sees
/// this trait so tests can script upstream behavior without a network.
pub trait TextGenerator: Send + Sync + 'static {
    fn generate(
        &self,
        model: &str,
        api_key: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> impl Future<Output = Result<String, DatafactError>> + Send;
}
