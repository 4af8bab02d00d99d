use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use reqwest::{Client, StatusCode};
use serde_json::{Map, Value, json};

use crate::error::DatafactError;
use crate::fanout::{self, SUBMIT_MAX_CONCURRENCY};
use crate::form::SaveState;
use crate::tools::inject::{InjectRequest, InjectResult, parse_flexible};

pub const USER_AGENT: &str = "Mozilla/5.0 (DataFact Injector Bot)";
pub const ORIGIN: &str = "https://docs.google.com";

/// Turn loosely shaped answer rows into positional rows aligned with
/// `entry_ids`.
///
/// Arrays are taken as-is. An object with at least one key equal to an
/// entry id becomes a row in `entry_ids` order with `null` gaps; any other
/// object contributes its values in alphabetical key order. Other shapes
/// are dropped.
pub fn normalize_answers(raw: Vec<Value>, entry_ids: &[i64]) -> Vec<Vec<Value>> {
    raw.into_iter()
        .filter_map(|item| match item {
            Value::Array(row) => Some(row),
            Value::Object(map) => Some(row_from_object(map, entry_ids)),
            _ => None,
        })
        .collect()
}

fn row_from_object(mut map: Map<String, Value>, entry_ids: &[i64]) -> Vec<Value> {
    let id_keys: Vec<String> = entry_ids.iter().map(i64::to_string).collect();
    if id_keys.iter().any(|k| map.contains_key(k)) {
        return id_keys
            .iter()
            .map(|k| map.remove(k).unwrap_or(Value::Null))
            .collect();
    }
    let mut entries: Vec<(String, Value)> = map.into_iter().collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries.into_iter().map(|(_, v)| v).collect()
}

/// Strings go in unquoted, everything else as its JSON text.
fn render_answer(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// The `partialResponse` form field for one row: answers paired with entry
/// ids by position, extra values dropped, nulls skipped.
pub fn partial_response(row: &[Value], entry_ids: &[i64], fbzx: &str) -> String {
    let responses: Vec<Value> = row
        .iter()
        .zip(entry_ids)
        .filter(|(value, _)| !value.is_null())
        .map(|(value, id)| json!([null, id, [render_answer(value)], 0]))
        .collect();
    json!([responses, null, fbzx]).to_string()
}

/// Replays answer rows against a form's response endpoint.
pub struct FormInjector {
    client: Client,
    max_concurrency: usize,
}

struct Submission {
    client: Client,
    form_url: String,
    saves: SaveState,
}

impl FormInjector {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            max_concurrency: SUBMIT_MAX_CONCURRENCY,
        }
    }

    pub async fn inject(&self, req: InjectRequest) -> Result<InjectResult, DatafactError> {
        req.validate()?;

        let saves: SaveState = parse_flexible(req.saves.as_ref())
            .map_err(|e| DatafactError::Validation(format!("invalid saves format: {e}")))?;
        let raw_answers: Vec<Value> = parse_flexible(req.answers.as_ref())
            .map_err(|e| DatafactError::Validation(format!("invalid answers format: {e}")))?;

        let rows = normalize_answers(raw_answers, &saves.entry_ids);
        if rows.is_empty() {
            return Err(DatafactError::Validation(
                "no answers provided/parsed".to_string(),
            ));
        }
        if saves.entry_ids.is_empty() {
            return Err(DatafactError::Validation(
                "invalid saves data: entry_ids missing".to_string(),
            ));
        }

        tracing::info!(
            rows = rows.len(),
            entries = saves.entry_ids.len(),
            "form injection starting"
        );

        let submission = Arc::new(Submission {
            client: self.client.clone(),
            form_url: req.form_url,
            saves,
        });

        let outcome = fanout::run_all(rows, self.max_concurrency, "Row", move |_, row| {
            let submission = submission.clone();
            async move { submission.submit(&row).await }
        })
        .await;

        Ok(InjectResult {
            total: outcome.total(),
            success: outcome.success_count,
            failed: outcome.failed_count(),
            details: outcome.errors,
        })
    }
}

impl Submission {
    async fn submit(&self, row: &[Value]) -> Result<(), DatafactError> {
        let saves = &self.saves;
        let partial = partial_response(row, &saves.entry_ids, &saves.fbzx);
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default()
            .to_string();

        let fields = [
            ("fvv", "1"),
            ("partialResponse", partial.as_str()),
            ("pageHistory", saves.page_history.as_str()),
            ("fbzx", saves.fbzx.as_str()),
            ("submissionTimestamp", timestamp.as_str()),
        ];

        let response = self
            .client
            .post(&self.form_url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::ORIGIN, ORIGIN)
            .form(&fields)
            .send()
            .await?;

        let status = response.status();
        // Drain so the connection goes back to the pool.
        let _ = response.bytes().await;

        if status != StatusCode::OK {
            return Err(DatafactError::Upstream {
                provider: "form".to_string(),
                message: format!("HTTP status {}", status.as_u16()),
                status: Some(status.as_u16()),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arrays_kept_positionally() {
        let rows = normalize_answers(vec![json!(["Budi", 20])], &[1, 2]);
        assert_eq!(rows, vec![vec![json!("Budi"), json!(20)]]);
    }

    #[test]
    fn objects_keyed_by_entry_id_align_with_gaps() {
        let rows = normalize_answers(vec![json!({"22": "b", "unrelated": "x"})], &[11, 22, 33]);
        assert_eq!(rows, vec![vec![Value::Null, json!("b"), Value::Null]]);
    }

    #[test]
    fn objects_with_label_keys_use_sorted_order() {
        let rows = normalize_answers(
            vec![json!({"2_Usia": 20, "1_Nama": "Budi", "3_Kota": "Bandung"})],
            &[11, 22, 33],
        );
        assert_eq!(rows, vec![vec![json!("Budi"), json!(20), json!("Bandung")]]);
    }

    #[test]
    fn scalar_rows_dropped() {
        let rows = normalize_answers(vec![json!("x"), json!(5), json!(null)], &[1]);
        assert!(rows.is_empty());
    }

    #[test]
    fn partial_response_skips_nulls_and_extra_values() {
        let row = vec![json!("Budi"), Value::Null, json!(20), json!("extra")];
        let partial = partial_response(&row, &[11, 22, 33], "-7");
        let parsed: Value = serde_json::from_str(&partial).unwrap();
        assert_eq!(
            parsed,
            json!([[[null, 11, ["Budi"], 0], [null, 33, ["20"], 0]], null, "-7"])
        );
    }

    #[test]
    fn booleans_render_as_text() {
        assert_eq!(render_answer(&json!(true)), "true");
        assert_eq!(render_answer(&json!(2.5)), "2.5");
        assert_eq!(render_answer(&json!("plain")), "plain");
    }
}
