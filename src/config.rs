use std::env;
use std::fmt;
use std::path::Path;

use serde::Deserialize;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Connection details for the PostgREST gateway holding the persona table.
#[derive(Clone, Deserialize)]
pub struct SupabaseConfig {
    pub base_url: String,
    pub api_key: String,
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default = "default_table")]
    pub table: String,
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_table() -> String {
    "persona_bank".to_string()
}

impl fmt::Debug for SupabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupabaseConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("table", &self.table)
            .finish()
    }
}

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    /// Bearer secret inbound requests must present. None = server misconfigured;
    /// authenticated routes then answer 500 instead of letting requests through.
    pub api_secret: Option<String>,
    pub gemini_base_url: String,
    pub default_model: String,
    pub supabase: Option<SupabaseConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            api_secret: None,
            gemini_base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            supabase: None,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field(
                "api_secret",
                &self.api_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("gemini_base_url", &self.gemini_base_url)
            .field("default_model", &self.default_model)
            .field("supabase", &self.supabase)
            .finish()
    }
}

/// Optional on-disk overrides (`DATAFACT_CONFIG=path/to/datafact.toml`).
/// Every field is optional; environment variables win over the file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub port: Option<u16>,
    pub gemini_base_url: Option<String>,
    pub default_model: Option<String>,
    pub supabase: Option<SupabaseConfig>,
}

impl FileConfig {
    pub fn parse(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    fn read(path: &Path) -> Option<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(path = %path.display(), "cannot read config file: {e}");
                return None;
            }
        };
        match Self::parse(&raw) {
            Ok(file) => Some(file),
            Err(e) => {
                tracing::warn!(path = %path.display(), "invalid config file, ignoring: {e}");
                None
            }
        }
    }
}

impl Config {
    /// Load file overrides (if `DATAFACT_CONFIG` is set) then apply env vars.
    pub fn load() -> Self {
        let file = env::var("DATAFACT_CONFIG")
            .ok()
            .and_then(|p| FileConfig::read(Path::new(&p)))
            .unwrap_or_default();
        Self::from_parts(file, |key| env::var(key).ok())
    }

    /// Merge file values with a variable lookup. Empty variables count as unset.
    pub fn from_parts(file: FileConfig, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let port = match var("PORT") {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                tracing::warn!("PORT={raw} is not a valid port, using {DEFAULT_PORT}");
                DEFAULT_PORT
            }),
            None => file.port.unwrap_or(defaults.port),
        };

        let api_secret = var("DATAFACT_API_KEY");
        if api_secret.is_none() {
            tracing::warn!("DATAFACT_API_KEY not set, authenticated routes will refuse requests");
        }

        let gemini_base_url = var("GEMINI_BASE_URL")
            .or(file.gemini_base_url)
            .unwrap_or(defaults.gemini_base_url)
            .trim_end_matches('/')
            .to_string();

        let default_model = var("DEFAULT_MODEL")
            .or(file.default_model)
            .unwrap_or(defaults.default_model);

        let supabase = match (var("SUPABASE_URL"), var("SUPABASE_SERVICE_ROLE_KEY")) {
            (Some(base_url), Some(api_key)) => Some(SupabaseConfig {
                base_url,
                api_key,
                schema: var("SUPABASE_DB_SCHEMA").unwrap_or_else(default_schema),
                table: var("SUPABASE_PERSONA_TABLE").unwrap_or_else(default_table),
            }),
            _ => file.supabase,
        };
        if supabase.is_none() {
            tracing::warn!("SUPABASE_URL / SUPABASE_SERVICE_ROLE_KEY not set, persona filter unavailable");
        }

        Config {
            port,
            api_secret,
            gemini_base_url,
            default_model,
            supabase,
        }
    }
}
