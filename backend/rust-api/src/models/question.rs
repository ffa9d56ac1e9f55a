use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use validator::Validate;

use super::user::{bson_datetime_as_chrono, bson_datetime_as_chrono_option};

pub const MIN_DIFFICULTY: u8 = 1;
pub const MAX_DIFFICULTY: u8 = 5;

/// Clamp any signed difficulty value into the 1..=5 band.
pub fn clamp_difficulty(value: i64) -> u8 {
    value.clamp(MIN_DIFFICULTY as i64, MAX_DIFFICULTY as i64) as u8
}

/// Coarse age bracket used to filter age-appropriate questions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AgeRange {
    #[serde(rename = "3-6")]
    Early,
    #[serde(rename = "7-10")]
    Primary,
    #[serde(rename = "11-14")]
    Middle,
    #[serde(rename = "15-18")]
    Senior,
}

impl AgeRange {
    pub fn for_age(age: u32) -> Self {
        match age {
            0..=6 => AgeRange::Early,
            7..=10 => AgeRange::Primary,
            11..=14 => AgeRange::Middle,
            _ => AgeRange::Senior,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgeRange::Early => "3-6",
            AgeRange::Primary => "7-10",
            AgeRange::Middle => "11-14",
            AgeRange::Senior => "15-18",
        }
    }
}

impl fmt::Display for AgeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgeRange {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "3-6" => Ok(AgeRange::Early),
            "7-10" => Ok(AgeRange::Primary),
            "11-14" => Ok(AgeRange::Middle),
            "15-18" => Ok(AgeRange::Senior),
            other => Err(format!("Invalid age range: {}", other)),
        }
    }
}

/// Question record stored in the "questions" collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Question {
    #[serde(rename = "_id")]
    pub id: String,
    pub subject_id: String,
    pub text: String,
    pub options: Vec<String>,
    pub correct_answer: String,
    pub difficulty: u8,
    #[serde(default)]
    pub xp_reward: u32,
    pub age_range: AgeRange,
    #[serde(default)]
    pub hint: Option<String>,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(rename = "createdAt", with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
}

/// Question as shown to the learner: never carries the correct answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionView {
    pub id: String,
    pub subject_id: String,
    pub text: String,
    pub options: Vec<String>,
    pub difficulty: u8,
    pub xp_reward: u32,
    pub age_range: AgeRange,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl QuestionView {
    pub fn from_question(question: &Question, hints_enabled: bool) -> Self {
        Self {
            id: question.id.clone(),
            subject_id: question.subject_id.clone(),
            text: question.text.clone(),
            options: question.options.clone(),
            difficulty: question.difficulty,
            xp_reward: question.xp_reward,
            age_range: question.age_range,
            hint: if hints_enabled {
                question.hint.clone()
            } else {
                None
            },
        }
    }
}

/// Subject record stored in the "subjects" collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subject {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubjectWithCount {
    #[serde(flatten)]
    pub subject: Subject,
    pub question_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubjectProgress {
    pub subject: Subject,
    pub total_questions: u64,
    pub answered_questions: u64,
    pub correct_answers: u64,
    pub accuracy: f64,
    pub average_difficulty: f64,
    pub last_attempt: Option<DateTime<Utc>>,
}

pub const DEFAULT_LOAD_LIMIT: u32 = 50;

fn default_load_limit() -> u32 {
    DEFAULT_LOAD_LIMIT
}

/// Filter set for bulk question retrieval.
///
/// Field order is part of the cache key: the struct is serialised as-is and
/// hashed, so two equal filter sets always address the same cache slot.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq, Eq, Hash)]
pub struct QuestionFilters {
    pub subject_id: Option<String>,
    pub age_range: Option<AgeRange>,
    #[validate(range(min = 1, max = 5, message = "Difficulty must be between 1 and 5"))]
    pub difficulty: Option<u8>,
    #[serde(default = "default_load_limit")]
    #[validate(range(min = 1, max = 500, message = "Limit must be between 1 and 500"))]
    pub limit: u32,
    #[serde(default)]
    pub exclude_answered: bool,
    pub user_id: Option<String>,
}

impl Default for QuestionFilters {
    fn default() -> Self {
        Self {
            subject_id: None,
            age_range: None,
            difficulty: None,
            limit: DEFAULT_LOAD_LIMIT,
            exclude_answered: false,
            user_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionBatch {
    pub questions: Vec<Question>,
    pub has_more: bool,
}

/// [`QuestionBatch`] as sent over HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionBatchView {
    pub questions: Vec<QuestionView>,
    pub has_more: bool,
}

impl From<&QuestionBatch> for QuestionBatchView {
    fn from(batch: &QuestionBatch) -> Self {
        Self {
            questions: batch
                .questions
                .iter()
                .map(|q| QuestionView::from_question(q, true))
                .collect(),
            has_more: batch.has_more,
        }
    }
}

/// Store-level query: a superset of [`QuestionFilters`] used by the adaptive path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuestionQuery {
    pub subject_id: Option<String>,
    pub age_range: Option<AgeRange>,
    pub min_difficulty: Option<u8>,
    pub max_difficulty: Option<u8>,
    pub exclude_ids: Vec<String>,
    pub limit: u32,
}

impl QuestionQuery {
    pub fn matches(&self, question: &Question) -> bool {
        self.subject_id
            .as_ref()
            .is_none_or(|subject| &question.subject_id == subject)
            && self.age_range.is_none_or(|range| question.age_range == range)
            && self
                .min_difficulty
                .is_none_or(|min| question.difficulty >= min)
            && self
                .max_difficulty
                .is_none_or(|max| question.difficulty <= max)
            && !self.exclude_ids.contains(&question.id)
    }
}

/// Single answer submitted by a learner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionResponse {
    pub id: String,
    pub question_id: String,
    pub selected_answer: String,
    pub is_correct: bool,
    pub xp_earned: u32,
    pub response_time_seconds: f64,
    pub created_at: DateTime<Utc>,
}

/// Row persisted in "question_responses". Subject and difficulty are copied from
/// the question so performance queries never need a join.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub session_id: Option<String>,
    pub question_id: String,
    pub subject_id: String,
    pub difficulty: u8,
    pub selected_answer: String,
    pub is_correct: bool,
    pub xp_earned: u32,
    pub response_time_seconds: f64,
    #[serde(rename = "createdAt", with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
}

impl ResponseRecord {
    pub fn new(
        user_id: &str,
        session_id: Option<&str>,
        question: &Question,
        response: &QuestionResponse,
    ) -> Self {
        Self {
            id: response.id.clone(),
            user_id: user_id.to_string(),
            session_id: session_id.map(str::to_string),
            question_id: question.id.clone(),
            subject_id: question.subject_id.clone(),
            difficulty: question.difficulty,
            selected_answer: response.selected_answer.clone(),
            is_correct: response.is_correct,
            xp_earned: response.xp_earned,
            response_time_seconds: response.response_time_seconds,
            created_at: response.created_at,
        }
    }
}

/// Row persisted in "learning_sessions" when a session is finalised.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LearningSessionRecord {
    #[serde(rename = "_id")]
    pub session_id: String,
    pub user_id: String,
    pub subject_id: Option<String>,
    pub world_id: Option<String>,
    pub questions_answered: u32,
    pub correct_answers: u32,
    pub total_xp_earned: u64,
    pub accuracy: f64,
    pub average_response_time: f64,
    pub difficulty_progression: Vec<u8>,
    #[serde(rename = "startedAt", with = "bson_datetime_as_chrono")]
    pub started_at: DateTime<Utc>,
    #[serde(
        rename = "completedAt",
        default,
        with = "bson_datetime_as_chrono_option"
    )]
    pub completed_at: Option<DateTime<Utc>>,
}

fn default_adaptive_limit() -> u32 {
    10
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AdaptiveQuestionsQuery {
    #[validate(length(min = 1, message = "user_id must not be empty"))]
    pub user_id: String,
    /// Falls back to the user's recorded age, then the configured default.
    pub age_range: Option<AgeRange>,
    pub subject_id: Option<String>,
    #[serde(default = "default_adaptive_limit")]
    #[validate(range(min = 1, max = 100, message = "Limit must be between 1 and 100"))]
    pub limit: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgeRangeQuery {
    pub age_range: Option<AgeRange>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PerformanceQuery {
    pub subject_id: Option<String>,
}
