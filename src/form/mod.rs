pub mod inject;
pub mod scraper;
pub mod walker;

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::DatafactError;

/// One answerable field of a scraped form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    #[serde(rename = "id")]
    pub entry_id: i64,
    pub text: String,
    /// Choice labels; empty for free-text fields.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

/// Structure recovered from a form page. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormSchema {
    description: String,
    questions: Vec<Question>,
    page_count: usize,
}

impl FormSchema {
    /// Entry ids must be unique: two questions sharing one means the walk
    /// misread the structure, not that the form is odd.
    pub fn new(
        description: String,
        questions: Vec<Question>,
        page_count: usize,
    ) -> Result<Self, DatafactError> {
        let mut seen = HashSet::with_capacity(questions.len());
        for q in &questions {
            if !seen.insert(q.entry_id) {
                return Err(DatafactError::Scrape(format!(
                    "duplicate entry id {} in form structure",
                    q.entry_id
                )));
            }
        }
        Ok(Self {
            description,
            questions,
            page_count,
        })
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    /// Number of section breaks seen; the form has `page_count + 1` pages.
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn into_questions(self) -> Vec<Question> {
        self.questions
    }

    /// `"0,1,…,page_count"`: every page visited, as the form expects on submit.
    pub fn page_history(&self) -> String {
        (0..=self.page_count)
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn entry_ids(&self) -> Vec<i64> {
        self.questions.iter().map(|q| q.entry_id).collect()
    }

    /// Label → entry id for non-empty labels. Two questions with the same
    /// label collapse to the later one; positional `entry_ids` keep both.
    pub fn entry_mappings(&self) -> HashMap<String, i64> {
        self.questions
            .iter()
            .filter(|q| !q.text.is_empty())
            .map(|q| (q.text.clone(), q.entry_id))
            .collect()
    }

    pub fn save_state(&self, form_id: String, fbzx: String) -> SaveState {
        SaveState {
            form_id,
            fbzx,
            page_history: self.page_history(),
            entry_ids: self.entry_ids(),
            entry_mappings: self.entry_mappings(),
        }
    }
}

/// Everything needed to replay a submission against the same form later.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveState {
    pub form_id: String,
    pub fbzx: String,
    pub page_history: String,
    pub entry_ids: Vec<i64>,
    pub entry_mappings: HashMap<String, i64>,
}
