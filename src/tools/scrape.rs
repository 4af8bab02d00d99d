use serde::{Deserialize, Serialize};

use crate::error::DatafactError;
use crate::form::{Question, SaveState};

/// Body of `POST /scrape`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ScrapeRequest {
    pub form_url: String,
}

impl ScrapeRequest {
    pub fn validate(&self) -> Result<(), DatafactError> {
        if self.form_url.trim().is_empty() {
            return Err(DatafactError::Validation(
                "form_url is required".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScrapeResponse {
    pub description: String,
    pub questions: Vec<Question>,
    pub saves: SaveState,
    /// 1 when the form collects the respondent's signed-in email.
    pub cookie_email: u8,
}
