use serde::{Deserialize, Serialize};

use crate::error::DatafactError;

/// Body of `POST /pipeline/run`. Field names match what existing
/// orchestration flows already send.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FactoryRequest {
    /// One persona (system prompt) per generation task.
    pub system_prompt_factory: Vec<String>,
    /// Generation user prompt; `{{ $json.form }}` is replaced by `form_text`.
    pub user_prompt_factory: String,
    pub system_prompt_parser: String,
    /// Appended after the generated text for the parse stage.
    pub user_prompt_parser: String,
    pub form_text: Option<String>,
    /// One or more keys separated by `;`, rotated across calls.
    pub gemini_api_key: String,
    pub model: Option<String>,
    /// Accepted for older clients, not used.
    pub spreadsheet_id: Option<String>,
}

impl FactoryRequest {
    /// Reject requests missing anything a task needs. Runs before any
    /// upstream call so a bad request costs nothing.
    pub fn validate(&self) -> Result<(), DatafactError> {
        if self.gemini_api_key.trim().is_empty() {
            return Err(DatafactError::Validation(
                "gemini_api_key is required".to_string(),
            ));
        }
        if self.system_prompt_factory.is_empty() {
            return Err(DatafactError::Validation(
                "system_prompt_factory must be a non-empty array".to_string(),
            ));
        }
        let required = [
            ("user_prompt_factory", &self.user_prompt_factory),
            ("system_prompt_parser", &self.system_prompt_parser),
            ("user_prompt_parser", &self.user_prompt_parser),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(DatafactError::Validation(format!("{name} is required")));
            }
        }
        Ok(())
    }

    pub fn model_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.model
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(fallback)
    }
}

/// `results` always has one slot per persona, in persona order; failed
/// tasks leave an empty string and an entry in `errors`.
#[derive(Debug, Serialize, Deserialize)]
pub struct FactoryResponse {
    pub total_processed: usize,
    pub success_count: usize,
    pub results: Vec<String>,
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_MODEL;

    fn valid() -> FactoryRequest {
        FactoryRequest {
            system_prompt_factory: vec!["p1".to_string()],
            user_prompt_factory: "u".to_string(),
            system_prompt_parser: "s".to_string(),
            user_prompt_parser: "f".to_string(),
            gemini_api_key: "k".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn valid_request_passes() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn each_required_field_is_checked() {
        let cases: [(&str, fn(&mut FactoryRequest)); 5] = [
            ("gemini_api_key", |r| r.gemini_api_key.clear()),
            ("system_prompt_factory", |r| r.system_prompt_factory.clear()),
            ("user_prompt_factory", |r| r.user_prompt_factory = " ".to_string()),
            ("system_prompt_parser", |r| r.system_prompt_parser.clear()),
            ("user_prompt_parser", |r| r.user_prompt_parser.clear()),
        ];
        for (field, break_it) in cases {
            let mut req = valid();
            break_it(&mut req);
            let err = req.validate().unwrap_err();
            assert!(matches!(err, DatafactError::Validation(_)));
            assert!(err.to_string().contains(field), "{field}: {err}");
        }
    }

    #[test]
    fn model_defaults_when_blank() {
        let mut req = valid();
        assert_eq!(req.model_or(DEFAULT_MODEL), "gemini-2.5-flash");
        req.model = Some("  ".to_string());
        assert_eq!(req.model_or("configured"), "configured");
        req.model = Some("gemini-2.5-pro".to_string());
        assert_eq!(req.model_or("configured"), "gemini-2.5-pro");
    }

    #[test]
    fn deserializes_wire_names_and_ignores_spreadsheet_id() {
        let req: FactoryRequest = serde_json::from_str(
            r#"{"system_prompt_factory":["a","b"],"user_prompt_factory":"u",
                "system_prompt_parser":"s","user_prompt_parser":"p",
                "gemini_api_key":"k1;k2","spreadsheet_id":"sheet"}"#,
        )
        .unwrap();
        assert_eq!(req.system_prompt_factory.len(), 2);
        assert!(req.model.is_none());
        assert!(req.validate().is_ok());
    }
}
