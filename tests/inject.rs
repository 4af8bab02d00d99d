//! Answer replay against a mock form response endpoint.

use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use datafact::error::DatafactError;
use datafact::form::inject::FormInjector;
use datafact::form::scraper::build_fast_client;
use datafact::tools::inject::InjectRequest;

fn saves() -> serde_json::Value {
    json!({
        "form_id": "scraped_1700000000",
        "fbzx": "-42",
        "page_history": "0,1",
        "entry_ids": [111, 222],
        "entry_mappings": {"Name": 111, "Age": 222}
    })
}

fn injector() -> FormInjector {
    FormInjector::new(build_fast_client().unwrap())
}

fn request(server: &MockServer, answers: serde_json::Value) -> InjectRequest {
    InjectRequest {
        form_url: format!("{}/formResponse", server.uri()),
        saves: Some(saves()),
        answers: Some(answers),
    }
}

#[tokio::test]
async fn posts_one_form_per_row_with_expected_fields() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/formResponse"))
        .and(header("origin", "https://docs.google.com"))
        .and(header("user-agent", "Mozilla/5.0 (DataFact Injector Bot)"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string_contains("fvv=1"))
        .and(body_string_contains("pageHistory=0%2C1"))
        .and(body_string_contains("fbzx=-42"))
        .and(body_string_contains("submissionTimestamp="))
        .respond_with(ResponseTemplate::new(200))
        .expect(3)
        .mount(&server)
        .await;

    let answers = json!([
        ["Budi", 20],
        {"111": "Siti"},
        {"b_age": 31, "a_name": "Andi"}
    ]);
    let result = injector().inject(request(&server, answers)).await.unwrap();

    assert_eq!(result.total, 3);
    assert_eq!(result.success, 3);
    assert_eq!(result.failed, 0);
    assert!(result.details.is_empty());
}

#[tokio::test]
async fn failed_rows_are_reported_without_stopping_others() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("Budi"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&server)
        .await;

    let answers = json!([["Budi", 20], ["Siti", 22], ["Budi", 40]]);
    let result = injector().inject(request(&server, answers)).await.unwrap();

    assert_eq!(result.total, 3);
    assert_eq!(result.success, 2);
    assert_eq!(result.failed, 1);
    assert_eq!(
        result.details,
        vec!["Row 1 Fail: upstream error from form: HTTP status 400"]
    );
}

#[tokio::test]
async fn double_encoded_saves_and_answers_accepted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let req = InjectRequest {
        form_url: format!("{}/formResponse", server.uri()),
        saves: Some(json!(saves().to_string())),
        answers: Some(json!("[[\"Budi\", 20]]")),
    };
    let result = injector().inject(req).await.unwrap();
    assert_eq!(result.success, 1);
}

#[tokio::test]
async fn no_usable_answers_rejected() {
    let server = MockServer::start().await;
    let err = injector()
        .inject(request(&server, json!(["just a string", 5])))
        .await
        .unwrap_err();
    assert!(matches!(err, DatafactError::Validation(_)));
    assert_eq!(err.to_string(), "no answers provided/parsed");
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn missing_entry_ids_rejected() {
    let server = MockServer::start().await;
    let req = InjectRequest {
        form_url: format!("{}/formResponse", server.uri()),
        saves: Some(json!({"fbzx": "-1"})),
        answers: Some(json!([["x"]])),
    };
    let err = injector().inject(req).await.unwrap_err();
    assert_eq!(err.to_string(), "invalid saves data: entry_ids missing");
}

#[tokio::test]
async fn malformed_answers_string_rejected() {
    let server = MockServer::start().await;
    let err = injector()
        .inject(request(&server, json!("[[oops")))
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("invalid answers format"));
}
