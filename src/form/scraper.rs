use std::sync::LazyLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use regex::Regex;
use reqwest::Client;
use serde_json::Value;

use crate::error::DatafactError;
use crate::form::walker::Node;
use crate::form::{FormSchema, Question};
use crate::tools::scrape::ScrapeResponse;

pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                              (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Item type code that marks a section (page) break.
const PAGE_BREAK: i64 = 8;

/// Email collection mode meaning "verified from the signed-in account".
const EMAIL_MODE_VERIFIED: i64 = 2;

static LOAD_DATA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"var\s+FB_PUBLIC_LOAD_DATA_\s*=\s*([\s\S]*?);\s*</script>")
        .expect("load data pattern compiles")
});

static LOAD_DATA_FALLBACK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"var\s+FB_PUBLIC_LOAD_DATA_\s*=\s*(\[[\s\S]*\]);")
        .expect("fallback load data pattern compiles")
});

static FBZX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"name=["']fbzx["']\s+value=["'](.*?)["']"#).expect("fbzx pattern compiles")
});

/// The raw JSON literal assigned to `FB_PUBLIC_LOAD_DATA_`.
pub fn extract_load_data(html: &str) -> Option<&str> {
    LOAD_DATA
        .captures(html)
        .or_else(|| LOAD_DATA_FALLBACK.captures(html))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Session token from the hidden `fbzx` input, if the page has one.
pub fn extract_fbzx(html: &str) -> Option<&str> {
    FBZX.captures(html).and_then(|c| c.get(1)).map(|m| m.as_str())
}

/// Result of parsing a form page, before the save bundle is stamped.
#[derive(Debug, Clone)]
pub struct ParsedForm {
    pub schema: FormSchema,
    pub fbzx: String,
    pub cookie_email: bool,
}

/// Recover the form structure from the page HTML. No network.
pub fn parse_form(html: &str) -> Result<ParsedForm, DatafactError> {
    let raw = extract_load_data(html)
        .ok_or_else(|| DatafactError::Scrape("form data not found".to_string()))?;

    let data: Value = serde_json::from_str(raw)
        .map_err(|e| DatafactError::Scrape(format!("form structure is not valid JSON: {e}")))?;

    let top = Node::root(&data, "form");
    top.elements()?;

    let fbzx = match extract_fbzx(html) {
        Some(token) => token.to_string(),
        None => top.get(14).and_then(|n| n.as_text()).unwrap_or_default(),
    };

    let content = top.at(1)?;
    content.expect_array(2)?;

    let description = content
        .get(0)
        .and_then(|n| n.as_str())
        .unwrap_or_default()
        .to_string();

    let cookie_email = content
        .get(10)
        .and_then(|n| n.as_i64())
        .is_some_and(|mode| mode == EMAIL_MODE_VERIFIED);

    let mut questions = Vec::new();
    let mut page_count = 0;

    for entry in content.at(1)?.children()? {
        if entry.array_len().is_none_or(|len| len < 4) {
            continue;
        }

        let item_type = entry.get(3).and_then(|n| n.as_i64()).unwrap_or(0);
        if item_type == PAGE_BREAK {
            page_count += 1;
            continue;
        }

        // Titles, images and videos carry no entry id.
        let Some(entry_id) = entry.dig(&[4, 0, 0]).and_then(|n| n.as_i64()) else {
            continue;
        };

        let text = entry
            .get(1)
            .and_then(|n| n.as_str())
            .unwrap_or_default()
            .to_string();

        let options = entry
            .dig(&[4, 0, 1])
            .and_then(|n| n.elements().ok())
            .map(|opts| {
                opts.iter()
                    .filter_map(|o| o.get(0).and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        questions.push(Question {
            entry_id,
            text,
            options,
        });
    }

    Ok(ParsedForm {
        schema: FormSchema::new(description, questions, page_count)?,
        fbzx,
        cookie_email,
    })
}

/// Shared client for form pages, form submissions and the persona store.
pub fn build_fast_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .timeout(Duration::from_secs(20))
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(100)
        .build()
}

pub struct FormScraper {
    client: Client,
}

impl FormScraper {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn scrape(&self, form_url: &str) -> Result<ScrapeResponse, DatafactError> {
        let response = self
            .client
            .get(form_url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await?;

        let status = response.status();
        let html = response.text().await?;
        if !status.is_success() {
            return Err(DatafactError::Upstream {
                provider: "form".to_string(),
                message: format!("form page returned HTTP {}", status.as_u16()),
                status: Some(status.as_u16()),
            });
        }

        let parsed = parse_form(&html)?;
        tracing::info!(
            questions = parsed.schema.questions().len(),
            pages = parsed.schema.page_count() + 1,
            "form scraped"
        );

        let saves = parsed.schema.save_state(scraped_form_id(), parsed.fbzx);
        Ok(ScrapeResponse {
            description: parsed.schema.description().to_string(),
            questions: parsed.schema.into_questions(),
            saves,
            cookie_email: u8::from(parsed.cookie_email),
        })
    }
}

fn scraped_form_id() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!("scraped_{secs}")
}
