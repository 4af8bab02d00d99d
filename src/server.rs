use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::dispatch::gemini::{self, GeminiClient};
use crate::error::DatafactError;
use crate::factory::FactoryExecutor;
use crate::form::inject::FormInjector;
use crate::form::scraper::{self, FormScraper};
use crate::persona::PersonaStore;
use crate::tools::factory::{FactoryRequest, FactoryResponse};
use crate::tools::inject::{InjectRequest, InjectResult};
use crate::tools::persona::{PersonaFilterRequest, PersonaFilterResponse};
use crate::tools::scrape::{ScrapeRequest, ScrapeResponse};

/// Shared handles for every request. Clients are built once and pooled.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    factory: Arc<FactoryExecutor<GeminiClient>>,
    scraper: Arc<FormScraper>,
    injector: Arc<FormInjector>,
    personas: Option<Arc<PersonaStore>>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, DatafactError> {
        let gemini = GeminiClient::new(gemini::build_client()?, &config.gemini_base_url);
        Self::with_generator(config, gemini)
    }

    /// Same as [`AppState::new`] with a caller-built generation client,
    /// e.g. one with a shorter retry policy.
    pub fn with_generator(config: Config, gemini: GeminiClient) -> Result<Self, DatafactError> {
        let fast = scraper::build_fast_client()?;
        let factory = FactoryExecutor::new(Arc::new(gemini), config.default_model.clone());
        let personas = config
            .supabase
            .clone()
            .map(|sb| Arc::new(PersonaStore::new(fast.clone(), sb)));

        Ok(Self {
            factory: Arc::new(factory),
            scraper: Arc::new(FormScraper::new(fast.clone())),
            injector: Arc::new(FormInjector::new(fast)),
            personas,
            config: Arc::new(config),
        })
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let body = Json(ErrorResponse {
        error: message.into(),
    });
    (status, body).into_response()
}

impl IntoResponse for DatafactError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(%status, "request failed: {}", self.user_message());
        } else {
            tracing::debug!(%status, "request rejected: {}", self.user_message());
        }
        error_response(status, self.user_message())
    }
}

/// Unwrap a JSON body. Every rejection, content type included, is a 400.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, DatafactError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| {
            DatafactError::Validation(format!("invalid json body: {}", rejection.body_text()))
        })
}

pub fn router(state: AppState) -> Router {
    let authenticated = Router::new()
        .route("/pipeline/run", post(run_pipeline))
        .route("/api/v1/datafact-factory", post(run_pipeline))
        .route("/inject", post(inject_answers))
        .route("/api/v1/form-injector", post(inject_answers))
        .route("/persona-filter", post(filter_personas))
        .route("/api/v1/persona-filter", post(filter_personas))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer));

    Router::new()
        .route("/health", get(health))
        .route("/scrape", post(scrape_form))
        .route("/api/v1/form-scrapper", post(scrape_form))
        .merge(authenticated)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bearer check against `DATAFACT_API_KEY`. With no secret configured every
/// authenticated route answers 500 rather than running open.
async fn require_bearer(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(expected) = state.config.api_secret.as_deref() else {
        return DatafactError::Misconfigured("missing DATAFACT_API_KEY".to_string())
            .into_response();
    };

    let auth = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let verdict = match auth {
        None => Err("missing Authorization header"),
        Some(value) => match value.strip_prefix("Bearer ") {
            None => Err("invalid Authorization format"),
            Some(token) if token.trim() == expected => Ok(()),
            Some(_) => Err("invalid API key"),
        },
    };

    match verdict {
        Ok(()) => next.run(req).await,
        Err(reason) => DatafactError::Unauthorized(reason.to_string()).into_response(),
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn run_pipeline(
    State(state): State<AppState>,
    payload: Result<Json<FactoryRequest>, JsonRejection>,
) -> Result<Json<FactoryResponse>, DatafactError> {
    let req = json_body(payload)?;
    let response = state.factory.execute(req).await?;
    Ok(Json(response))
}

async fn scrape_form(
    State(state): State<AppState>,
    payload: Result<Json<ScrapeRequest>, JsonRejection>,
) -> Result<Json<ScrapeResponse>, Response> {
    let req = json_body(payload).map_err(IntoResponse::into_response)?;
    req.validate().map_err(IntoResponse::into_response)?;

    match state.scraper.scrape(req.form_url.trim()).await {
        Ok(scraped) => Ok(Json(scraped)),
        Err(e) => {
            // Every scrape failure is a 500, upstream page errors included.
            tracing::warn!(form_url = req.form_url, "{}", e.user_message());
            Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, e.user_message()))
        }
    }
}

async fn inject_answers(
    State(state): State<AppState>,
    payload: Result<Json<InjectRequest>, JsonRejection>,
) -> Result<Json<InjectResult>, DatafactError> {
    let req = json_body(payload)?;
    let result = state.injector.inject(req).await?;
    Ok(Json(result))
}

async fn filter_personas(
    State(state): State<AppState>,
    payload: Result<Json<PersonaFilterRequest>, JsonRejection>,
) -> Result<Json<PersonaFilterResponse>, DatafactError> {
    let req = json_body(payload)?;
    let store = state.personas.as_ref().ok_or_else(|| {
        DatafactError::Misconfigured(
            "SUPABASE_URL and SUPABASE_SERVICE_ROLE_KEY are required".to_string(),
        )
    })?;
    let response = store.filter(&req).await?;
    Ok(Json(response))
}
