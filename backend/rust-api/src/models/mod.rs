pub mod performance;
pub mod question;
pub mod session;
pub mod user;

pub use performance::{Trend, UserPerformance};
pub use question::{
    AdaptiveQuestionsQuery, AgeRange, AgeRangeQuery, LearningSessionRecord, PerformanceQuery,
    Question, QuestionBatch, QuestionBatchView, QuestionFilters, QuestionQuery, QuestionResponse,
    QuestionView, ResponseRecord, Subject, SubjectProgress, SubjectWithCount,
};
pub use session::{
    AdaptiveDifficultyState, AnswerOutcome, CompletionBonus, CompletionSummary,
    CreateSessionRequest, LearningSession, NextQuestionOutcome, PersistenceWarning, SessionAnalytics,
    SessionConfig, SessionPhase, SessionProgress, SessionView, SubmitAnswerRequest, WarningKind,
};
pub use user::{Character, User};
