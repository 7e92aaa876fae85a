use std::sync::{Arc, OnceLock};

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request},
    Router,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::api;
use crate::core::{config::Settings, state::AppState};
use crate::services::audit::AuditHandle;
use crate::services::rounds::{self, RoundSetup};
use crate::store::{memory::MemoryStore, ExamStore, NewQuestion};

pub(crate) const TEST_ADMIN_KEY: &str = "test-admin-key";

pub(crate) struct TestContext {
    pub(crate) state: AppState,
    pub(crate) app: Router,
    _guard: OwnedMutexGuard<()>,
}

pub(crate) async fn env_lock() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<Mutex<()>>> = OnceLock::new();
    let lock = LOCK.get_or_init(|| Arc::new(Mutex::new(()))).clone();
    lock.lock_owned().await
}

pub(crate) fn set_test_env() {
    std::env::set_var("EXAMROUNDS_ENV", "test");
    std::env::set_var("EXAMROUNDS_STORE", "memory");
    std::env::set_var("ADMIN_API_KEY", TEST_ADMIN_KEY);
    std::env::set_var("SUBMIT_GRACE_SECONDS", "5");
    std::env::set_var("MIN_QUESTIONS_PER_ROUND", "3");
    std::env::set_var("STORE_RETRY_ATTEMPTS", "3");
    std::env::set_var("STORE_RETRY_BASE_MS", "1");
    std::env::set_var("AUDIT_QUEUE_CAPACITY", "64");
    std::env::set_var("PROMETHEUS_ENABLED", "0");
}

pub(crate) async fn setup_test_context() -> TestContext {
    let guard = env_lock().await;
    set_test_env();

    let settings = Settings::load().expect("settings");
    let store: Arc<dyn ExamStore> = Arc::new(MemoryStore::new());
    let audit = AuditHandle::spawn(settings.audit().queue_capacity);

    let state = AppState::new(settings, store, audit);
    let app = api::router::router(state.clone());

    TestContext { state, app, _guard: guard }
}

pub(crate) fn question(id: &str, correct: &str) -> NewQuestion {
    NewQuestion {
        id: id.to_string(),
        text: format!("Question {id}"),
        options: vec!["alpha".into(), "beta".into(), "gamma".into(), "delta".into()],
        correct_option: correct.to_string(),
    }
}

/// `count` questions q01..qNN, all with correct option "A".
pub(crate) fn question_set(count: usize) -> Vec<NewQuestion> {
    (1..=count).map(|i| question(&format!("q{i:02}"), "A")).collect()
}

pub(crate) async fn seed_round(state: &AppState, round_no: i32, questions: usize, cutoff: i32) {
    rounds::configure_round(
        state,
        RoundSetup {
            round_no,
            duration_seconds: 600,
            cutoff,
            questions: question_set(questions),
        },
    )
    .await
    .expect("configure round");
}

pub(crate) async fn seed_running_round(
    state: &AppState,
    round_no: i32,
    questions: usize,
    cutoff: i32,
) {
    seed_round(state, round_no, questions, cutoff).await;
    rounds::start_round(state, round_no).await.expect("start round");
}

pub(crate) fn answers(entries: &[(&str, &str)]) -> Vec<(String, String)> {
    entries.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

/// Answers q01..qNN with one fixed letter.
pub(crate) fn uniform_answers(count: usize, letter: &str) -> Vec<(String, String)> {
    (1..=count).map(|i| (format!("q{i:02}"), letter.to_string())).collect()
}

pub(crate) fn json_request(
    method: Method,
    uri: &str,
    admin_key: Option<&str>,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);

    if let Some(key) = admin_key {
        builder = builder.header("x-admin-key", key);
    }

    if let Some(body) = body {
        let bytes = serde_json::to_vec(&body).expect("serialize body");
        builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(bytes))
            .expect("request body")
    } else {
        builder.body(Body::empty()).expect("request body")
    }
}

pub(crate) async fn read_json(response: axum::response::Response<Body>) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.expect("response body");
    serde_json::from_slice(&body).unwrap_or_else(|err| {
        let body_text = String::from_utf8_lossy(&body);
        panic!("json parse: {err}; body: {body_text}");
    })
}
