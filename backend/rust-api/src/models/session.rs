use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use validator::Validate;

use super::question::{Question, QuestionResponse, QuestionView};

pub const DEFAULT_QUESTIONS_PER_SESSION: u32 = 10;
pub const DEFAULT_ADJUSTMENT_THRESHOLD: u32 = 3;
pub const INITIAL_DIFFICULTY: u8 = 2;
pub const PERFORMANCE_HISTORY_CAPACITY: usize = 10;

fn default_questions_per_session() -> u32 {
    DEFAULT_QUESTIONS_PER_SESSION
}

fn enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq, Eq)]
pub struct SessionConfig {
    #[serde(default = "default_questions_per_session")]
    #[validate(range(
        min = 1,
        max = 100,
        message = "questions_per_session must be between 1 and 100"
    ))]
    pub questions_per_session: u32,
    #[serde(default = "enabled")]
    pub adaptive_difficulty: bool,
    #[serde(default = "enabled")]
    pub show_progress: bool,
    #[serde(default = "enabled")]
    pub enable_hints: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            questions_per_session: DEFAULT_QUESTIONS_PER_SESSION,
            adaptive_difficulty: true,
            show_progress: true,
            enable_hints: true,
        }
    }
}

/// Lifecycle of a learning session. `Complete` is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionPhase {
    Created,
    Active { index: usize },
    Complete { ended_at: DateTime<Utc> },
}

/// Streak-driven difficulty state owned by a single session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdaptiveDifficultyState {
    pub current_difficulty: u8,
    pub consecutive_correct: u32,
    pub consecutive_incorrect: u32,
    pub performance_history: VecDeque<bool>,
    pub adjustment_threshold: u32,
}

impl Default for AdaptiveDifficultyState {
    fn default() -> Self {
        Self::new(INITIAL_DIFFICULTY, DEFAULT_ADJUSTMENT_THRESHOLD)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionAnalytics {
    pub session_id: String,
    pub user_id: String,
    pub subject_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub total_questions: u32,
    pub correct_answers: u32,
    pub total_xp_earned: u64,
    pub average_response_time: f64,
    pub accuracy: f64,
    pub difficulty_progression: Vec<u8>,
    pub response_times: Vec<f64>,
    pub streak_bonus: u32,
}

impl SessionAnalytics {
    pub fn new(
        session_id: &str,
        user_id: &str,
        subject_id: Option<&str>,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            subject_id: subject_id.map(str::to_string),
            start_time,
            end_time: None,
            total_questions: 0,
            correct_answers: 0,
            total_xp_earned: 0,
            average_response_time: 0.0,
            accuracy: 0.0,
            difficulty_progression: Vec::new(),
            response_times: Vec::new(),
            streak_bonus: 0,
        }
    }

    /// Fold one answer into the running counters.
    pub fn record_answer(&mut self, is_correct: bool, xp_earned: u32, response_time_seconds: f64) {
        self.total_questions += 1;
        if is_correct {
            self.correct_answers += 1;
        }
        self.total_xp_earned += u64::from(xp_earned);
        self.response_times.push(response_time_seconds);
        self.recompute();
    }

    /// Accuracy and the mean of the recorded response times.
    pub fn recompute(&mut self) {
        self.accuracy = if self.total_questions == 0 {
            0.0
        } else {
            self.correct_answers as f64 / self.total_questions as f64 * 100.0
        };
        self.average_response_time = if self.response_times.is_empty() {
            0.0
        } else {
            self.response_times.iter().sum::<f64>() / self.response_times.len() as f64
        };
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningSession {
    pub id: String,
    pub user_id: String,
    pub subject_id: Option<String>,
    pub world_id: Option<String>,
    pub config: SessionConfig,
    pub questions: Vec<Question>,
    pub phase: SessionPhase,
    pub responses: Vec<QuestionResponse>,
    pub analytics: SessionAnalytics,
    pub difficulty: AdaptiveDifficultyState,
    pub start_time: DateTime<Utc>,
}

impl LearningSession {
    pub fn current_index(&self) -> usize {
        match self.phase {
            SessionPhase::Created => 0,
            SessionPhase::Active { index } => index,
            SessionPhase::Complete { .. } => self.questions.len(),
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.phase, SessionPhase::Complete { .. })
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        match self.phase {
            SessionPhase::Complete { ended_at } => Some(ended_at),
            _ => None,
        }
    }

    pub fn current_question(&self) -> Option<&Question> {
        if self.is_complete() {
            return None;
        }
        self.questions.get(self.current_index())
    }

    pub fn progress(&self) -> SessionProgress {
        let total = self.questions.len();
        let current = (self.current_index() + 1).min(total);
        SessionProgress {
            current,
            total,
            percentage: if total == 0 {
                0.0
            } else {
                current as f64 / total as f64 * 100.0
            },
            correct_answers: self.analytics.correct_answers,
            total_xp_earned: self.analytics.total_xp_earned,
            accuracy: self.analytics.accuracy,
            average_response_time: self.analytics.average_response_time,
            current_difficulty: self.difficulty.current_difficulty,
            is_complete: self.is_complete(),
        }
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            id: self.id.clone(),
            user_id: self.user_id.clone(),
            subject_id: self.subject_id.clone(),
            world_id: self.world_id.clone(),
            config: self.config.clone(),
            phase: self.phase,
            current_question_index: self.current_index(),
            total_questions: self.questions.len(),
            current_question: self
                .current_question()
                .map(|q| QuestionView::from_question(q, self.config.enable_hints)),
            progress: self.config.show_progress.then(|| self.progress()),
            current_difficulty: self.difficulty.current_difficulty,
            start_time: self.start_time,
            end_time: self.end_time(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionProgress {
    pub current: usize,
    pub total: usize,
    pub percentage: f64,
    pub correct_answers: u32,
    pub total_xp_earned: u64,
    pub accuracy: f64,
    pub average_response_time: f64,
    pub current_difficulty: u8,
    pub is_complete: bool,
}

/// Session as returned over HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionView {
    pub id: String,
    pub user_id: String,
    pub subject_id: Option<String>,
    pub world_id: Option<String>,
    pub config: SessionConfig,
    pub phase: SessionPhase,
    pub current_question_index: usize,
    pub total_questions: usize,
    pub current_question: Option<QuestionView>,
    pub progress: Option<SessionProgress>,
    pub current_difficulty: u8,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    ResponseSave,
    AnalyticsSave,
    QuestUpdate,
    XpAward,
}

impl WarningKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningKind::ResponseSave => "response_save",
            WarningKind::AnalyticsSave => "analytics_save",
            WarningKind::QuestUpdate => "quest_update",
            WarningKind::XpAward => "xp_award",
        }
    }
}

/// Side effect that failed without failing the user-facing operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistenceWarning {
    pub kind: WarningKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletionBonus {
    pub accuracy_bonus: u32,
    pub speed_bonus: u32,
    pub completion_bonus: u32,
    pub total: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerOutcome {
    pub response: QuestionResponse,
    pub session: SessionView,
    pub level_up: bool,
    pub achievements: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    pub warnings: Vec<PersistenceWarning>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextQuestionOutcome {
    pub session: SessionView,
    pub warnings: Vec<PersistenceWarning>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionSummary {
    pub analytics: SessionAnalytics,
    pub bonus: CompletionBonus,
    pub warnings: Vec<PersistenceWarning>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateSessionRequest {
    #[validate(length(min = 1, message = "user_id must not be empty"))]
    pub user_id: String,
    pub subject_id: Option<String>,
    pub world_id: Option<String>,
    #[validate(nested)]
    pub config: Option<SessionConfig>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SubmitAnswerRequest {
    pub selected_answer: String,
    #[validate(range(min = 0.0, message = "response_time_seconds must not be negative"))]
    pub response_time_seconds: f64,
}
