//! Persistent store seam.
//!
//! The learning core only ever talks to [`LearningStore`]. Production wires the
//! MongoDB implementation; tests and local runs use the in-memory one.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    AgeRange, Character, LearningSessionRecord, Question, QuestionQuery, ResponseRecord, Subject,
};

pub mod memory;
pub mod mongo;

pub use memory::InMemoryLearningStore;
pub use mongo::MongoLearningStore;

pub const QUESTIONS_COLLECTION: &str = "questions";
pub const SUBJECTS_COLLECTION: &str = "subjects";
pub const RESPONSES_COLLECTION: &str = "question_responses";
pub const SESSIONS_COLLECTION: &str = "learning_sessions";
pub const USERS_COLLECTION: &str = "users";
pub const CHARACTERS_COLLECTION: &str = "characters";

#[async_trait]
pub trait LearningStore: Send + Sync {
    /// Questions matching `query`, ordered by difficulty ascending then newest first.
    async fn find_questions(&self, query: &QuestionQuery) -> Result<Vec<Question>>;

    async fn count_questions(
        &self,
        subject_id: Option<&str>,
        age_range: Option<AgeRange>,
    ) -> Result<u64>;

    /// All subjects, ordered by name.
    async fn list_subjects(&self) -> Result<Vec<Subject>>;

    /// Most recent responses of a user, newest first.
    async fn recent_responses(
        &self,
        user_id: &str,
        subject_id: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<ResponseRecord>>;

    /// Distinct question ids the user answered, optionally only since `since`.
    async fn answered_question_ids(
        &self,
        user_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<String>>;

    async fn save_response(&self, record: &ResponseRecord) -> Result<()>;

    /// Insert or replace the row keyed by session id.
    async fn save_session_record(&self, record: &LearningSessionRecord) -> Result<()>;

    async fn user_age(&self, user_id: &str) -> Result<Option<u32>>;

    async fn get_character(&self, user_id: &str) -> Result<Option<Character>>;

    /// Adds XP to the character, returning the updated record.
    async fn award_xp(&self, user_id: &str, amount: u32) -> Result<Character>;

    async fn ping(&self) -> Result<()>;
}
