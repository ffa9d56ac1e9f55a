use chrono::{DateTime, Utc};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;
use validator::Validate;

use crate::config::LearningSettings;
use crate::error::{LearningError, LearningResult};
use crate::metrics::{
    ANSWERS_SUBMITTED_TOTAL, PERSISTENCE_WARNINGS_TOTAL, SESSIONS_ACTIVE, SESSIONS_TOTAL,
};
use crate::models::{
    AdaptiveDifficultyState, AgeRange, AnswerOutcome, CompletionBonus, CompletionSummary,
    LearningSession, LearningSessionRecord, NextQuestionOutcome, PersistenceWarning,
    QuestionResponse, QuestionView, ResponseRecord, SessionAnalytics, SessionConfig,
    SessionPhase, SessionProgress, SessionView, WarningKind,
};
use crate::services::collaborators::{
    AnswerScorer, CharacterService, ExactMatchScorer, NoopProgressHooks, NoopQuestTracker,
    ProgressHooks, QuestActivity, QuestMetrics, QuestTracker,
};
use crate::services::question_service::QuestionService;
use crate::store::LearningStore;
use crate::utils::retry::{retry_async_with_config, RetryConfig};
use crate::utils::time::elapsed_seconds;

pub const FLAT_COMPLETION_BONUS: u32 = 25;

/// Bonus for a finished session: accuracy tier + speed tier + flat amount.
///
/// The speed tier only applies when at least one question was answered.
pub fn completion_bonus(
    accuracy: f64,
    average_response_time: f64,
    total_questions: u32,
) -> CompletionBonus {
    let accuracy_bonus = if accuracy >= 90.0 {
        50
    } else if accuracy >= 80.0 {
        30
    } else if accuracy >= 70.0 {
        20
    } else {
        0
    };

    let speed_bonus = if total_questions == 0 {
        0
    } else if average_response_time <= 5.0 {
        30
    } else if average_response_time <= 10.0 {
        20
    } else if average_response_time <= 15.0 {
        10
    } else {
        0
    };

    CompletionBonus {
        accuracy_bonus,
        speed_bonus,
        completion_bonus: FLAT_COMPLETION_BONUS,
        total: accuracy_bonus + speed_bonus + FLAT_COMPLETION_BONUS,
    }
}

fn session_record(session: &LearningSession) -> LearningSessionRecord {
    let analytics = &session.analytics;
    LearningSessionRecord {
        session_id: session.id.clone(),
        user_id: session.user_id.clone(),
        subject_id: session.subject_id.clone(),
        world_id: session.world_id.clone(),
        questions_answered: analytics.total_questions,
        correct_answers: analytics.correct_answers,
        total_xp_earned: analytics.total_xp_earned,
        accuracy: analytics.accuracy,
        average_response_time: analytics.average_response_time,
        difficulty_progression: analytics.difficulty_progression.clone(),
        started_at: analytics.start_time,
        completed_at: analytics.end_time,
    }
}

fn soft_failure(
    warnings: &mut Vec<PersistenceWarning>,
    kind: WarningKind,
    session_id: &str,
    error: &anyhow::Error,
) {
    PERSISTENCE_WARNINGS_TOTAL
        .with_label_values(&[kind.as_str()])
        .inc();
    tracing::warn!(
        "Soft failure ({}) for session {}: {:#}",
        kind.as_str(),
        session_id,
        error
    );
    warnings.push(PersistenceWarning {
        kind,
        message: format!("{:#}", error),
    });
}

struct SessionEntry {
    started_at: DateTime<Utc>,
    session: Arc<Mutex<LearningSession>>,
}

/// Session Orchestrator.
///
/// Owns the registry of live sessions. Each session sits behind its own async
/// mutex, so concurrent calls for one session run one after another while
/// different sessions proceed independently.
pub struct SessionService {
    store: Arc<dyn LearningStore>,
    questions: Arc<QuestionService>,
    characters: Arc<dyn CharacterService>,
    quests: Arc<dyn QuestTracker>,
    scorer: Arc<dyn AnswerScorer>,
    hooks: Arc<dyn ProgressHooks>,
    settings: LearningSettings,
    retry: RetryConfig,
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl SessionService {
    pub fn new(
        store: Arc<dyn LearningStore>,
        questions: Arc<QuestionService>,
        characters: Arc<dyn CharacterService>,
        settings: LearningSettings,
    ) -> Self {
        Self {
            store,
            questions,
            characters,
            quests: Arc::new(NoopQuestTracker),
            scorer: Arc::new(ExactMatchScorer),
            hooks: Arc::new(NoopProgressHooks),
            settings,
            retry: RetryConfig::default(),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_quest_tracker(mut self, quests: Arc<dyn QuestTracker>) -> Self {
        self.quests = quests;
        self
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn AnswerScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_progress_hooks(mut self, hooks: Arc<dyn ProgressHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn settings(&self) -> &LearningSettings {
        &self.settings
    }

    pub async fn create_session(
        &self,
        user_id: &str,
        subject_id: Option<&str>,
        world_id: Option<&str>,
        config: Option<SessionConfig>,
    ) -> LearningResult<SessionView> {
        if user_id.trim().is_empty() {
            return Err(LearningError::Validation(
                "user_id must not be empty".to_string(),
            ));
        }
        let config = config.unwrap_or_else(|| SessionConfig {
            questions_per_session: self.settings.questions_per_session,
            ..SessionConfig::default()
        });
        config.validate()?;

        let age_range = self.resolve_age_range(user_id).await?;

        let questions = self
            .questions
            .get_adaptive_questions(user_id, age_range, subject_id, config.questions_per_session)
            .await?;
        if questions.is_empty() {
            return Err(LearningError::no_questions_available());
        }

        let now = Utc::now();
        let mut sessions = self.sessions.write().await;

        let mut session_id = format!("{}-{}", user_id, now.timestamp_millis());
        if sessions.contains_key(&session_id) {
            let suffix = Uuid::new_v4().simple().to_string();
            session_id = format!("{}-{}", session_id, &suffix[..8]);
        }

        let session = LearningSession {
            id: session_id.clone(),
            user_id: user_id.to_string(),
            subject_id: subject_id.map(str::to_string),
            world_id: world_id.map(str::to_string),
            config,
            questions,
            phase: SessionPhase::Created,
            responses: Vec::new(),
            analytics: SessionAnalytics::new(&session_id, user_id, subject_id, now),
            difficulty: AdaptiveDifficultyState::new(
                self.settings.initial_difficulty,
                self.settings.adjustment_threshold,
            ),
            start_time: now,
        };
        let view = session.view();

        sessions.insert(
            session_id.clone(),
            SessionEntry {
                started_at: now,
                session: Arc::new(Mutex::new(session)),
            },
        );
        drop(sessions);

        SESSIONS_TOTAL.with_label_values(&["created"]).inc();
        SESSIONS_ACTIVE.inc();

        tracing::info!(
            "Session created: {} for user: {} ({} questions, age range {})",
            session_id,
            user_id,
            view.total_questions,
            age_range
        );

        Ok(view)
    }

    /// Age bracket from the user's recorded age, or the configured default.
    pub async fn resolve_age_range(&self, user_id: &str) -> LearningResult<AgeRange> {
        let age = retry_async_with_config(self.retry.clone(), || self.store.user_age(user_id))
            .await
            .map_err(|e| LearningError::remote("Failed to load user profile", e))?;
        Ok(age
            .map(AgeRange::for_age)
            .unwrap_or(self.settings.default_age_range))
    }

    async fn handle(&self, session_id: &str) -> LearningResult<Arc<Mutex<LearningSession>>> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|entry| entry.session.clone())
            .ok_or_else(|| LearningError::SessionNotFound(session_id.to_string()))
    }

    /// Score an answer to the current question and fold it into the session.
    pub async fn submit_answer(
        &self,
        session_id: &str,
        selected_answer: &str,
        response_time_seconds: f64,
    ) -> LearningResult<AnswerOutcome> {
        if !response_time_seconds.is_finite() || response_time_seconds < 0.0 {
            return Err(LearningError::Validation(
                "response_time_seconds must be a non-negative number".to_string(),
            ));
        }

        let handle = self.handle(session_id).await?;
        let mut session = handle.lock().await;

        let question = session
            .current_question()
            .cloned()
            .ok_or_else(LearningError::no_current_question)?;
        if session.phase == SessionPhase::Created {
            session.phase = SessionPhase::Active { index: 0 };
        }

        let score = self
            .scorer
            .score(&question, selected_answer, response_time_seconds);
        let response = QuestionResponse {
            id: Uuid::new_v4().to_string(),
            question_id: question.id.clone(),
            selected_answer: selected_answer.to_string(),
            is_correct: score.is_correct,
            xp_earned: score.xp_earned,
            response_time_seconds,
            created_at: Utc::now(),
        };

        session.responses.push(response.clone());
        session
            .analytics
            .record_answer(score.is_correct, score.xp_earned, response_time_seconds);

        let adaptive = session.config.adaptive_difficulty;
        let outcome = session.difficulty.record_response(score.is_correct, adaptive);
        session.analytics.difficulty_progression.push(outcome.current);
        if outcome.streak_completed {
            session.analytics.streak_bonus += 1;
        }

        ANSWERS_SUBMITTED_TOTAL
            .with_label_values(&[if score.is_correct { "true" } else { "false" }])
            .inc();

        let mut warnings = Vec::new();

        let record = ResponseRecord::new(&session.user_id, Some(session_id), &question, &response);
        if let Err(e) = self.store.save_response(&record).await {
            soft_failure(&mut warnings, WarningKind::ResponseSave, session_id, &e);
        }

        let mut character = None;
        if response.xp_earned > 0 {
            match self
                .characters
                .award_xp_once(&session.user_id, response.xp_earned)
                .await
            {
                Ok(updated) => character = Some(updated),
                Err(e) => soft_failure(&mut warnings, WarningKind::XpAward, session_id, &e),
            }
        }

        let level_up = self
            .hooks
            .check_level_up(&session.user_id, character.as_ref())
            .await;
        let achievements = self.hooks.check_achievements(&session).await;

        tracing::info!(
            "Answer submitted: session={}, question={}, correct={}, difficulty={}",
            session_id,
            question.id,
            response.is_correct,
            outcome.current
        );

        Ok(AnswerOutcome {
            response,
            session: session.view(),
            level_up,
            achievements,
            explanation: question.explanation.clone(),
            warnings,
        })
    }

    /// Advance to the next question. Passing the last one completes the session
    /// and persists its analytics; the session stays registered until
    /// [`Self::complete_session`] finalises it.
    pub async fn next_question(&self, session_id: &str) -> LearningResult<NextQuestionOutcome> {
        let handle = self.handle(session_id).await?;
        let mut session = handle.lock().await;

        if session.is_complete() {
            return Err(LearningError::PreconditionFailed(
                "Session is already complete".to_string(),
            ));
        }

        let mut warnings = Vec::new();
        let next = session.current_index() + 1;

        if next >= session.questions.len() {
            let ended_at = Utc::now();
            session.phase = SessionPhase::Complete { ended_at };
            session.analytics.end_time = Some(ended_at);
            session.analytics.recompute();

            if let Err(e) = self.store.save_session_record(&session_record(&session)).await {
                soft_failure(&mut warnings, WarningKind::AnalyticsSave, session_id, &e);
            }
            tracing::info!(
                "Session reached its last question: {} ({} answered)",
                session_id,
                session.analytics.total_questions
            );
        } else {
            session.phase = SessionPhase::Active { index: next };
        }

        Ok(NextQuestionOutcome {
            session: session.view(),
            warnings,
        })
    }

    /// Live view of a session; `None` once it is complete.
    pub async fn get_session(&self, session_id: &str) -> Option<SessionView> {
        let handle = self.handle(session_id).await.ok()?;
        let session = handle.lock().await;
        (!session.is_complete()).then(|| session.view())
    }

    pub async fn get_current_question(&self, session_id: &str) -> Option<QuestionView> {
        let handle = self.handle(session_id).await.ok()?;
        let session = handle.lock().await;
        let enable_hints = session.config.enable_hints;
        session
            .current_question()
            .map(|q| QuestionView::from_question(q, enable_hints))
    }

    pub async fn get_progress(&self, session_id: &str) -> Option<SessionProgress> {
        let handle = self.handle(session_id).await.ok()?;
        let progress = handle.lock().await.progress();
        Some(progress)
    }

    /// Finalise a session: compute and award the completion bonus, persist the
    /// analytics row, report quest progress and drop the session.
    ///
    /// A second call for the same id fails with `SessionNotFound`.
    pub async fn complete_session(&self, session_id: &str) -> LearningResult<CompletionSummary> {
        let entry = self
            .sessions
            .write()
            .await
            .remove(session_id)
            .ok_or_else(|| LearningError::SessionNotFound(session_id.to_string()))?;

        let mut session = entry.session.lock().await;
        let ended_at = session.end_time().unwrap_or_else(Utc::now);
        session.phase = SessionPhase::Complete { ended_at };
        session.analytics.end_time = Some(ended_at);
        session.analytics.recompute();

        let analytics = session.analytics.clone();
        let bonus = completion_bonus(
            analytics.accuracy,
            analytics.average_response_time,
            analytics.total_questions,
        );

        let mut warnings = Vec::new();

        if let Err(e) = self.characters.award_xp(&session.user_id, bonus.total).await {
            soft_failure(&mut warnings, WarningKind::XpAward, session_id, &e);
        }

        if let Err(e) = self.store.save_session_record(&session_record(&session)).await {
            soft_failure(&mut warnings, WarningKind::AnalyticsSave, session_id, &e);
        }

        let metrics = QuestMetrics {
            subject_id: session.subject_id.clone(),
            questions_answered: analytics.total_questions,
            correct_answers: analytics.correct_answers,
            accuracy: analytics.accuracy,
            xp_earned: analytics.total_xp_earned + u64::from(bonus.total),
        };
        if let Err(e) = self
            .quests
            .update_quest_progress(&session.user_id, QuestActivity::LearningSession, &metrics)
            .await
        {
            soft_failure(&mut warnings, WarningKind::QuestUpdate, session_id, &e);
        }

        SESSIONS_TOTAL.with_label_values(&["completed"]).inc();
        SESSIONS_ACTIVE.dec();

        tracing::info!(
            "Session completed: {} (accuracy {:.1}%, bonus {}, {:.0}s)",
            session_id,
            analytics.accuracy,
            bonus.total,
            elapsed_seconds(analytics.start_time, ended_at)
        );

        Ok(CompletionSummary {
            analytics,
            bonus,
            warnings,
        })
    }

    /// Drop every session older than the configured TTL, complete or not.
    pub async fn cleanup_expired_sessions(&self) -> usize {
        self.cleanup_expired_at(Utc::now()).await
    }

    pub async fn cleanup_expired_at(&self, now: DateTime<Utc>) -> usize {
        let ttl = self.settings.session_ttl();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| now.signed_duration_since(entry.started_at) <= ttl);
        let removed = before - sessions.len();
        drop(sessions);

        if removed > 0 {
            SESSIONS_TOTAL
                .with_label_values(&["expired"])
                .inc_by(removed as u64);
            SESSIONS_ACTIVE.sub(removed as i64);
            tracing::info!("Cleaned up {} expired sessions", removed);
        }
        removed
    }

    pub async fn active_session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
