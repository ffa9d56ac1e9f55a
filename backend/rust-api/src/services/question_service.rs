use chrono::{Duration as ChronoDuration, Utc};
use rand::seq::SliceRandom;
use sha2::{Digest, Sha256};
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use crate::error::{LearningError, LearningResult};
use crate::metrics::{record_cache_hit, record_cache_miss, ADAPTIVE_FALLBACKS_TOTAL};
use crate::models::{
    AgeRange, Question, QuestionBatch, QuestionFilters, QuestionQuery, SubjectProgress,
    SubjectWithCount,
};
use crate::services::difficulty::{calculate_target_difficulty, difficulty_window};
use crate::services::performance_service::PerformanceService;
use crate::store::LearningStore;
use crate::utils::retry::{retry_async_with_config, RetryConfig};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_ADAPTIVE_LIMIT: u32 = 10;
/// Answers newer than this are not served again by the adaptive path.
pub const RECENT_ANSWER_WINDOW_HOURS: i64 = 24;

struct CacheEntry {
    batch: QuestionBatch,
    stored_at: Instant,
}

/// Question Store Accessor: filtered and adaptive retrieval over the store,
/// with a short-lived in-process cache for bulk loads.
pub struct QuestionService {
    store: Arc<dyn LearningStore>,
    performance: Arc<PerformanceService>,
    cache: Mutex<HashMap<String, CacheEntry>>,
    cache_ttl: Duration,
    retry: RetryConfig,
}

impl QuestionService {
    pub fn new(store: Arc<dyn LearningStore>, performance: Arc<PerformanceService>) -> Self {
        Self {
            store,
            performance,
            cache: Mutex::new(HashMap::new()),
            cache_ttl: DEFAULT_CACHE_TTL,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Content-addressed key: SHA-256 over the JSON form of the filters.
    pub fn cache_key(filters: &QuestionFilters) -> String {
        let canonical = serde_json::to_vec(filters).unwrap_or_default();
        format!("questions:{}", hex::encode(Sha256::digest(&canonical)))
    }

    /// Bulk retrieval ordered by difficulty then recency.
    ///
    /// `has_more` is true when the store returned exactly `limit` rows. Cached
    /// batches keep the flag they were fetched with.
    pub async fn load_questions(&self, filters: &QuestionFilters) -> LearningResult<QuestionBatch> {
        if filters.exclude_answered && filters.user_id.is_none() {
            return Err(LearningError::Validation(
                "exclude_answered requires user_id".to_string(),
            ));
        }

        let key = Self::cache_key(filters);
        if let Some(batch) = self.cached(&key) {
            record_cache_hit();
            tracing::debug!("Question cache hit: {}", key);
            return Ok(batch);
        }
        record_cache_miss();

        let exclude_ids = match (filters.exclude_answered, filters.user_id.as_deref()) {
            (true, Some(user_id)) => self.answered_ids(user_id, None).await?,
            _ => Vec::new(),
        };

        let query = QuestionQuery {
            subject_id: filters.subject_id.clone(),
            age_range: filters.age_range,
            min_difficulty: filters.difficulty,
            max_difficulty: filters.difficulty,
            exclude_ids,
            limit: filters.limit,
        };
        let questions = self.find(&query).await?;
        let batch = QuestionBatch {
            has_more: questions.len() == filters.limit as usize,
            questions,
        };

        self.store_cached(key, batch.clone());
        tracing::info!(
            "Loaded {} questions (has_more: {})",
            batch.questions.len(),
            batch.has_more
        );
        Ok(batch)
    }

    /// Questions near the learner's target difficulty that they have not seen
    /// in the last 24 hours, shuffled. Never fails because of the adaptive
    /// step itself: any problem there falls back to [`Self::load_questions`].
    pub async fn get_adaptive_questions(
        &self,
        user_id: &str,
        age_range: AgeRange,
        subject_id: Option<&str>,
        limit: u32,
    ) -> LearningResult<Vec<Question>> {
        let since = Utc::now() - ChronoDuration::hours(RECENT_ANSWER_WINDOW_HOURS);
        let recent = self.answered_ids(user_id, Some(since)).await;

        let adaptive = match recent.as_ref() {
            Ok(recent) => self
                .select_adaptive(user_id, age_range, subject_id, limit, recent)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        let reason = match adaptive {
            Ok(questions) if !questions.is_empty() => return Ok(questions),
            Ok(_) => "empty",
            Err(e) => {
                tracing::warn!(
                    "Adaptive question selection failed for user {}: {}",
                    user_id,
                    e
                );
                "error"
            }
        };
        ADAPTIVE_FALLBACKS_TOTAL.with_label_values(&[reason]).inc();

        let filters = QuestionFilters {
            subject_id: subject_id.map(str::to_string),
            age_range: Some(age_range),
            limit,
            ..QuestionFilters::default()
        };
        let mut questions = self.load_questions(&filters).await?.questions;
        if let Ok(recent) = recent {
            let recent: HashSet<String> = recent.into_iter().collect();
            questions.retain(|q| !recent.contains(&q.id));
        }
        tracing::info!(
            "Adaptive fallback returned {} questions for user {}",
            questions.len(),
            user_id
        );
        Ok(questions)
    }

    async fn select_adaptive(
        &self,
        user_id: &str,
        age_range: AgeRange,
        subject_id: Option<&str>,
        limit: u32,
        recent: &[String],
    ) -> LearningResult<Vec<Question>> {
        let performance = self
            .performance
            .get_user_performance(user_id, subject_id)
            .await?;
        let target = calculate_target_difficulty(&performance);
        let (min, max) = difficulty_window(target);

        let query = QuestionQuery {
            subject_id: subject_id.map(str::to_string),
            age_range: Some(age_range),
            min_difficulty: Some(min),
            max_difficulty: Some(max),
            exclude_ids: recent.to_vec(),
            limit: limit.saturating_mul(2),
        };
        let mut candidates = self.find(&query).await?;
        candidates.shuffle(&mut rand::rng());
        candidates.truncate(limit as usize);

        tracing::debug!(
            user_id,
            target,
            selected = candidates.len(),
            "Selected adaptive questions"
        );
        Ok(candidates)
    }

    /// Subjects ordered by name, each with its question count.
    pub async fn get_subjects_with_counts(
        &self,
        age_range: Option<AgeRange>,
    ) -> LearningResult<Vec<SubjectWithCount>> {
        let subjects = retry_async_with_config(self.retry.clone(), || self.store.list_subjects())
            .await
            .map_err(|e| LearningError::remote("Failed to load subjects", e))?;

        let mut result = Vec::with_capacity(subjects.len());
        for subject in subjects {
            let question_count = retry_async_with_config(self.retry.clone(), || {
                self.store.count_questions(Some(&subject.id), age_range)
            })
            .await
            .map_err(|e| LearningError::remote("Failed to count questions", e))?;
            result.push(SubjectWithCount {
                subject,
                question_count,
            });
        }
        Ok(result)
    }

    /// Per-subject progress for a user, best accuracy first.
    pub async fn get_user_progress_by_subject(
        &self,
        user_id: &str,
        age_range: Option<AgeRange>,
    ) -> LearningResult<Vec<SubjectProgress>> {
        let subjects = retry_async_with_config(self.retry.clone(), || self.store.list_subjects())
            .await
            .map_err(|e| LearningError::remote("Failed to load subjects", e))?;

        let mut progress = Vec::with_capacity(subjects.len());
        for subject in subjects {
            let total_questions = retry_async_with_config(self.retry.clone(), || {
                self.store.count_questions(Some(&subject.id), age_range)
            })
            .await
            .map_err(|e| LearningError::remote("Failed to count questions", e))?;

            let responses = retry_async_with_config(self.retry.clone(), || {
                self.store
                    .recent_responses(user_id, Some(&subject.id), None)
            })
            .await
            .map_err(|e| LearningError::remote("Failed to load question responses", e))?;

            let answered = responses.len() as u64;
            let correct = responses.iter().filter(|r| r.is_correct).count() as u64;
            let (accuracy, average_difficulty) = if answered == 0 {
                (0.0, 0.0)
            } else {
                let difficulty_sum: f64 = responses.iter().map(|r| f64::from(r.difficulty)).sum();
                (
                    correct as f64 / answered as f64 * 100.0,
                    difficulty_sum / answered as f64,
                )
            };

            progress.push(SubjectProgress {
                subject,
                total_questions,
                answered_questions: answered,
                correct_answers: correct,
                accuracy,
                average_difficulty,
                last_attempt: responses.iter().map(|r| r.created_at).max(),
            });
        }

        progress.sort_by(|a, b| b.accuracy.total_cmp(&a.accuracy));
        Ok(progress)
    }

    pub fn invalidate_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            let removed = cache.len();
            cache.clear();
            tracing::info!("Question cache invalidated ({} entries)", removed);
        }
    }

    /// Drop expired cache entries. Returns how many were removed.
    pub fn prune_cache(&self) -> usize {
        let ttl = self.cache_ttl;
        match self.cache.lock() {
            Ok(mut cache) => {
                let before = cache.len();
                cache.retain(|_, entry| entry.stored_at.elapsed() < ttl);
                before - cache.len()
            }
            Err(_) => 0,
        }
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.lock().map(|cache| cache.len()).unwrap_or(0)
    }

    fn cached(&self, key: &str) -> Option<QuestionBatch> {
        let cache = self.cache.lock().ok()?;
        cache
            .get(key)
            .filter(|entry| entry.stored_at.elapsed() < self.cache_ttl)
            .map(|entry| entry.batch.clone())
    }

    fn store_cached(&self, key: String, batch: QuestionBatch) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(
                key,
                CacheEntry {
                    batch,
                    stored_at: Instant::now(),
                },
            );
        }
    }

    async fn find(&self, query: &QuestionQuery) -> LearningResult<Vec<Question>> {
        retry_async_with_config(self.retry.clone(), || self.store.find_questions(query))
            .await
            .map_err(|e| LearningError::remote("Failed to load questions", e))
    }

    async fn answered_ids(
        &self,
        user_id: &str,
        since: Option<chrono::DateTime<Utc>>,
    ) -> LearningResult<Vec<String>> {
        retry_async_with_config(self.retry.clone(), || {
            self.store.answered_question_ids(user_id, since)
        })
        .await
        .map_err(|e| LearningError::remote("Failed to load answered questions", e))
    }
}
