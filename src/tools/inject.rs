use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DatafactError;

/// Body of `POST /inject`.
///
/// `saves` and `answers` are left as raw JSON: orchestration flows often
/// send them as JSON-encoded strings rather than nested values.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct InjectRequest {
    pub form_url: String,
    pub saves: Option<Value>,
    pub answers: Option<Value>,
}

impl InjectRequest {
    pub fn validate(&self) -> Result<(), DatafactError> {
        if self.form_url.trim().is_empty() {
            return Err(DatafactError::Validation(
                "form_url is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Decode a value that is either the JSON itself or a string holding it.
/// A missing or null value decodes to `T::default()`.
pub fn parse_flexible<T>(raw: Option<&Value>) -> Result<T, serde_json::Error>
where
    T: DeserializeOwned + Default,
{
    match raw {
        None | Some(Value::Null) => Ok(T::default()),
        Some(Value::String(encoded)) => serde_json::from_str(encoded),
        Some(other) => T::deserialize(other),
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InjectResult {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub details: Vec<String>,
}
