use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `POST /persona-filter`. `filter` may be an object or a string
/// holding one.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PersonaFilterRequest {
    pub filter: Option<Value>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PersonaFilterResponse {
    pub count: usize,
    pub data: Vec<Value>,
}
