#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use chrono::{Duration, Utc};
use questtutor_api::{
    config::Config,
    create_router,
    models::{AgeRange, Question, QuestionResponse, ResponseRecord, Subject, User},
    services::AppState,
    store::InMemoryLearningStore,
};
use serde_json::Value;
use std::sync::Arc;

pub const CORRECT: &str = "right";
pub const WRONG: &str = "wrong";

/// User aged 8 (bracket 7-10).
pub const KID: &str = "kid-8";
/// User aged 16 (bracket 15-18).
pub const TEEN: &str = "teen-16";
/// User with no recorded age.
pub const ANONYMOUS: &str = "kid-no-age";

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub store: Arc<InMemoryLearningStore>,
}

/// In-memory config with fast collaborator retries.
pub fn test_config() -> Config {
    let mut config = Config::in_memory();
    config.retry.max_attempts = 1;
    config.retry.base_delay_ms = 1;
    config.retry.jitter_ms = 0;
    config.rate_limit.sessions_max_requests = 10_000;
    config.rate_limit.questions_max_requests = 10_000;
    config
}

pub async fn create_test_app() -> TestApp {
    create_test_app_with(test_config()).await
}

pub async fn create_test_app_with(config: Config) -> TestApp {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let store = Arc::new(InMemoryLearningStore::new());
    seed_test_data(&store).await;

    let state = Arc::new(AppState::with_store(config, store.clone()));
    TestApp {
        router: create_router(state.clone()),
        state,
        store,
    }
}

pub fn question(
    id: &str,
    subject_id: &str,
    difficulty: u8,
    age_range: AgeRange,
    minutes_old: i64,
) -> Question {
    Question {
        id: id.to_string(),
        subject_id: subject_id.to_string(),
        text: format!("Question {}", id),
        options: vec![CORRECT.to_string(), WRONG.to_string()],
        correct_answer: CORRECT.to_string(),
        difficulty,
        xp_reward: 10,
        age_range,
        hint: Some(format!("Hint for {}", id)),
        explanation: Some(format!("Explanation for {}", id)),
        created_at: Utc::now() - Duration::minutes(minutes_old),
    }
}

/// Subjects: math, reading.
/// math 7-10: 20 questions (6 × d1, 6 × d2, 3 × d3, 3 × d4, 2 × d5).
/// reading 7-10: 4 × d1. math 15-18: 3 × d3.
pub async fn seed_test_data(store: &InMemoryLearningStore) {
    store
        .insert_user(User {
            id: KID.to_string(),
            name: "Kid".to_string(),
            age: Some(8),
        })
        .await;
    store
        .insert_user(User {
            id: TEEN.to_string(),
            name: "Teen".to_string(),
            age: Some(16),
        })
        .await;
    store
        .insert_user(User {
            id: ANONYMOUS.to_string(),
            name: "Anonymous".to_string(),
            age: None,
        })
        .await;

    store
        .insert_subject(Subject {
            id: "reading".to_string(),
            name: "Reading".to_string(),
            description: None,
            icon: None,
        })
        .await;
    store
        .insert_subject(Subject {
            id: "math".to_string(),
            name: "Math".to_string(),
            description: Some("Numbers".to_string()),
            icon: None,
        })
        .await;

    let mut questions = Vec::new();
    let math_primary = [(1u8, 6), (2, 6), (3, 3), (4, 3), (5, 2)];
    let mut n = 0;
    for (difficulty, count) in math_primary {
        for _ in 0..count {
            questions.push(question(
                &format!("math-{}", n),
                "math",
                difficulty,
                AgeRange::Primary,
                n,
            ));
            n += 1;
        }
    }
    for i in 0..4 {
        questions.push(question(
            &format!("reading-{}", i),
            "reading",
            1,
            AgeRange::Primary,
            i,
        ));
    }
    for i in 0..3 {
        questions.push(question(
            &format!("senior-math-{}", i),
            "math",
            3,
            AgeRange::Senior,
            i,
        ));
    }
    store.insert_questions(questions).await;
}

/// Record that `user_id` answered `question` `hours_ago` hours ago.
pub async fn record_answer(
    store: &InMemoryLearningStore,
    user_id: &str,
    question: &Question,
    is_correct: bool,
    hours_ago: i64,
) {
    let response = QuestionResponse {
        id: uuid::Uuid::new_v4().to_string(),
        question_id: question.id.clone(),
        selected_answer: if is_correct { CORRECT } else { WRONG }.to_string(),
        is_correct,
        xp_earned: 0,
        response_time_seconds: 4.0,
        created_at: Utc::now() - Duration::hours(hours_ago),
    };
    store
        .insert_response(ResponseRecord::new(user_id, None, question, &response))
        .await;
}

pub fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
