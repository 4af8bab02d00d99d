//! Persona lookup against the PostgREST gateway.
//!
//! Callers send a loose filter object; only known columns are honoured and
//! values of the wrong shape are dropped rather than rejected, so a flow
//! that sends extra fields keeps working.

use std::collections::BTreeMap;

use reqwest::Client;
use serde_json::{Map, Value};

use crate::config::SupabaseConfig;
use crate::error::DatafactError;
use crate::tools::persona::{PersonaFilterRequest, PersonaFilterResponse};

const PROVIDER: &str = "persona store";

/// Range-filterable columns, addressed as `<column>_min` / `<column>_max`.
pub const NUMERIC_COLUMNS: &[&str] = &[
    "usia",
    "jumlah_anak",
    "penghasilan_bulanan",
    "quality_score",
    "slang_level",
    "tingkat_ekstrovert",
    "tingkat_kepercayaan_opini",
    "usage_count",
];

pub const BOOLEAN_COLUMNS: &[&str] = &["is_active", "eligible_basic", "eligible_pro"];

pub const STRING_COLUMNS: &[&str] = &[
    "nama",
    "jenis_kelamin",
    "status_pernikahan",
    "domisili_provinsi",
    "domisili_kota",
    "tipe_tinggal",
    "pendidikan_terakhir",
    "jurusan_pendidikan",
    "pekerjaan",
    "industri_pekerjaan",
    "status_pekerjaan",
    "aktivitas_harian",
    "gaya_hidup",
    "kebiasaan_belanja",
    "jam_online_utama",
    "tech_comfort_level",
    "kepribadian_mbti",
    "gaya_komunikasi",
    "nada_jawaban_default",
    "bahasa_utama",
    "panjang_jawaban_preferensi",
];

/// Accept `null`, an object, or a string holding an object.
pub fn normalize_filter(raw: Option<&Value>) -> Result<Map<String, Value>, DatafactError> {
    match raw {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(Map::new()),
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s.trim()) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(DatafactError::Validation(
                "filter string must hold a JSON object".to_string(),
            )),
            Err(e) => Err(DatafactError::Validation(format!(
                "filter string is not valid JSON: {e}"
            ))),
        },
        Some(_) => Err(DatafactError::Validation(
            "filter must be an object or a JSON string".to_string(),
        )),
    }
}

#[derive(Debug, Default)]
struct ColumnFilter {
    min: Option<i64>,
    max: Option<i64>,
    equals: Option<bool>,
    one_of: Vec<String>,
}

fn numeric_bound(key: &str) -> Option<(&'static str, bool)> {
    NUMERIC_COLUMNS.iter().find_map(|col| {
        let suffix = key.strip_prefix(*col)?;
        match suffix {
            "_min" => Some((*col, true)),
            "_max" => Some((*col, false)),
            _ => None,
        }
    })
}

fn to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn to_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn to_strings(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::String(s) => Some(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => None,
    }
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// PostgREST query parameters for a normalized filter. Columns come out in
/// sorted order so the same filter always yields the same query.
pub fn build_query(
    filter: &Map<String, Value>,
    limit: Option<i64>,
    offset: Option<i64>,
) -> Result<Vec<(String, String)>, DatafactError> {
    let mut columns: BTreeMap<&str, ColumnFilter> = BTreeMap::new();

    for (raw_key, value) in filter {
        let key = raw_key.trim();
        if key.is_empty() || value.is_null() {
            continue;
        }

        if let Some((column, is_min)) = numeric_bound(key) {
            let Some(n) = to_i64(value) else { continue };
            let entry = columns.entry(column).or_default();
            if is_min {
                entry.min = Some(n);
            } else {
                entry.max = Some(n);
            }
        } else if let Some(column) = BOOLEAN_COLUMNS.iter().copied().find(|c| *c == key) {
            let Some(b) = to_bool(value) else { continue };
            columns.entry(column).or_default().equals = Some(b);
        } else if let Some(column) = STRING_COLUMNS.iter().copied().find(|c| *c == key) {
            let Some(values) = to_strings(value).filter(|v| !v.is_empty()) else {
                continue;
            };
            columns.entry(column).or_default().one_of = values;
        }
    }

    let mut params = vec![("select".to_string(), "*".to_string())];
    for (column, f) in columns {
        if let Some(min) = f.min {
            params.push((column.to_string(), format!("gte.{min}")));
        }
        if let Some(max) = f.max {
            params.push((column.to_string(), format!("lte.{max}")));
        }
        if let Some(b) = f.equals {
            params.push((column.to_string(), format!("eq.{b}")));
        }
        match f.one_of.as_slice() {
            [] => {}
            [single] => params.push((column.to_string(), format!("eq.{single}"))),
            many => {
                let list: Vec<String> = many.iter().map(|v| quote(v)).collect();
                params.push((column.to_string(), format!("in.({})", list.join(","))));
            }
        }
    }

    for (name, value) in [("limit", limit), ("offset", offset)] {
        match value {
            Some(n) if n < 0 => {
                return Err(DatafactError::Validation(format!(
                    "{name} must not be negative"
                )));
            }
            Some(n) => params.push((name.to_string(), n.to_string())),
            None => {}
        }
    }

    Ok(params)
}

pub struct PersonaStore {
    client: Client,
    config: SupabaseConfig,
}

impl PersonaStore {
    pub fn new(client: Client, config: SupabaseConfig) -> Self {
        Self { client, config }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/rest/v1/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.table
        )
    }

    pub async fn filter(
        &self,
        req: &PersonaFilterRequest,
    ) -> Result<PersonaFilterResponse, DatafactError> {
        let filter = normalize_filter(req.filter.as_ref())?;
        let params = build_query(&filter, req.limit, req.offset)?;
        tracing::debug!(params = params.len() - 1, "persona filter query built");

        let response = self
            .client
            .get(self.endpoint())
            .query(&params)
            .header("apikey", &self.config.api_key)
            .bearer_auth(&self.config.api_key)
            .header("Accept-Profile", &self.config.schema)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            let text = String::from_utf8_lossy(&body);
            let preview: String = text.chars().take(300).collect();
            return Err(DatafactError::Upstream {
                provider: PROVIDER.to_string(),
                message: format!("HTTP {}: {preview}", status.as_u16()),
                status: Some(status.as_u16()),
            });
        }

        let data: Vec<Value> =
            serde_json::from_slice(&body).map_err(|e| DatafactError::MalformedResponse {
                provider: PROVIDER.to_string(),
                message: e.to_string(),
            })?;

        tracing::info!(rows = data.len(), "persona filter served");
        Ok(PersonaFilterResponse {
            count: data.len(),
            data,
        })
    }
}
