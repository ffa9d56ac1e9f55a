//! Seams to the systems around the learning core: characters/XP, quests,
//! answer scoring and achievement hooks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::models::{Character, LearningSession, Question};
use crate::store::LearningStore;
use crate::utils::retry::ExponentialBackoff;

#[async_trait]
pub trait CharacterService: Send + Sync {
    async fn award_xp(&self, user_id: &str, amount: u32) -> anyhow::Result<Character>;

    /// Single-attempt award for paths that must not wait on retries.
    async fn award_xp_once(&self, user_id: &str, amount: u32) -> anyhow::Result<Character> {
        self.award_xp(user_id, amount).await
    }

    async fn get_character(&self, user_id: &str) -> anyhow::Result<Option<Character>>;
}

/// Character service backed by the learning store, retrying through the
/// injected backoff.
pub struct StoreCharacterService {
    store: Arc<dyn LearningStore>,
    backoff: Arc<ExponentialBackoff>,
}

impl StoreCharacterService {
    pub fn new(store: Arc<dyn LearningStore>, backoff: Arc<ExponentialBackoff>) -> Self {
        Self { store, backoff }
    }
}

#[async_trait]
impl CharacterService for StoreCharacterService {
    async fn award_xp(&self, user_id: &str, amount: u32) -> anyhow::Result<Character> {
        let key = format!("award_xp:{}", user_id);
        self.backoff
            .execute(&key, || self.store.award_xp(user_id, amount), |_| true)
            .await
    }

    async fn award_xp_once(&self, user_id: &str, amount: u32) -> anyhow::Result<Character> {
        self.store.award_xp(user_id, amount).await
    }

    async fn get_character(&self, user_id: &str) -> anyhow::Result<Option<Character>> {
        let key = format!("get_character:{}", user_id);
        self.backoff
            .execute(&key, || self.store.get_character(user_id), |_| true)
            .await
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuestActivity {
    LearningSession,
}

impl QuestActivity {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestActivity::LearningSession => "learning_session",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestMetrics {
    pub subject_id: Option<String>,
    pub questions_answered: u32,
    pub correct_answers: u32,
    pub accuracy: f64,
    pub xp_earned: u64,
}

#[async_trait]
pub trait QuestTracker: Send + Sync {
    async fn update_quest_progress(
        &self,
        user_id: &str,
        activity: QuestActivity,
        metrics: &QuestMetrics,
    ) -> anyhow::Result<()>;
}

pub struct NoopQuestTracker;

#[async_trait]
impl QuestTracker for NoopQuestTracker {
    async fn update_quest_progress(
        &self,
        user_id: &str,
        activity: QuestActivity,
        metrics: &QuestMetrics,
    ) -> anyhow::Result<()> {
        tracing::debug!(
            user_id,
            activity = activity.as_str(),
            questions = metrics.questions_answered,
            "Quest progress update skipped (no quest tracker configured)"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Score {
    pub is_correct: bool,
    pub xp_earned: u32,
}

pub trait AnswerScorer: Send + Sync {
    fn score(&self, question: &Question, selected_answer: &str, response_time_seconds: f64)
        -> Score;
}

/// Exact string match; a correct answer earns the question's full reward.
pub struct ExactMatchScorer;

impl AnswerScorer for ExactMatchScorer {
    fn score(&self, question: &Question, selected_answer: &str, _response_time: f64) -> Score {
        let is_correct = selected_answer == question.correct_answer;
        Score {
            is_correct,
            xp_earned: if is_correct { question.xp_reward } else { 0 },
        }
    }
}

/// Achievement and level-up extension points, consulted after each answer.
#[async_trait]
pub trait ProgressHooks: Send + Sync {
    async fn check_achievements(&self, session: &LearningSession) -> Vec<String>;
    async fn check_level_up(&self, user_id: &str, character: Option<&Character>) -> bool;
}

pub struct NoopProgressHooks;

#[async_trait]
impl ProgressHooks for NoopProgressHooks {
    async fn check_achievements(&self, _session: &LearningSession) -> Vec<String> {
        Vec::new()
    }

    async fn check_level_up(&self, _user_id: &str, _character: Option<&Character>) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AgeRange;
    use crate::store::InMemoryLearningStore;
    use crate::utils::retry::RetryConfig;
    use chrono::Utc;
    use std::time::Duration;

    fn question() -> Question {
        Question {
            id: "q1".into(),
            subject_id: "math".into(),
            text: "3 * 3".into(),
            options: vec!["6".into(), "9".into()],
            correct_answer: "9".into(),
            difficulty: 2,
            xp_reward: 15,
            age_range: AgeRange::Primary,
            hint: None,
            explanation: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn exact_match_scores_only_identical_answers() {
        let scorer = ExactMatchScorer;
        let q = question();
        assert_eq!(
            scorer.score(&q, "9", 1.0),
            Score {
                is_correct: true,
                xp_earned: 15
            }
        );
        assert_eq!(
            scorer.score(&q, " 9", 1.0),
            Score {
                is_correct: false,
                xp_earned: 0
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn store_character_service_retries_then_gives_up() {
        let store = Arc::new(InMemoryLearningStore::new());
        store.set_fail_writes(true);
        let backoff = Arc::new(ExponentialBackoff::new(RetryConfig {
            max_attempts: 3,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            jitter_max: None,
        }));
        let characters = StoreCharacterService::new(store.clone(), backoff.clone());

        assert!(characters.award_xp("kid", 10).await.is_err());
        assert_eq!(backoff.attempts("award_xp:kid"), 0);

        store.set_fail_writes(false);
        let character = characters.award_xp("kid", 10).await.unwrap();
        assert_eq!(character.xp, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn single_attempt_award_skips_backoff() {
        let store = Arc::new(InMemoryLearningStore::new());
        store.set_fail_writes(true);
        let backoff = Arc::new(ExponentialBackoff::new(RetryConfig::remote()));
        let characters = StoreCharacterService::new(store.clone(), backoff);

        let start = tokio::time::Instant::now();
        assert!(characters.award_xp_once("kid", 10).await.is_err());
        assert_eq!(start.elapsed(), Duration::ZERO);

        store.set_fail_writes(false);
        let character = characters.award_xp_once("kid", 10).await.unwrap();
        assert_eq!(character.xp, 10);
    }
}
