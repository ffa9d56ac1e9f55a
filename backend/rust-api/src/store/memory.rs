use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    collections::{BTreeSet, HashMap},
    sync::atomic::{AtomicBool, Ordering},
};
use tokio::sync::RwLock;

use super::LearningStore;
use crate::models::{
    AgeRange, Character, LearningSessionRecord, Question, QuestionQuery, ResponseRecord, Subject,
    User,
};

#[derive(Default)]
struct MemoryState {
    users: HashMap<String, User>,
    characters: HashMap<String, Character>,
    questions: Vec<Question>,
    subjects: Vec<Subject>,
    responses: Vec<ResponseRecord>,
    sessions: HashMap<String, LearningSessionRecord>,
}

/// Process-local store with fault injection.
///
/// `set_unavailable` fails every call; `set_fail_writes` fails only writes, which
/// is how the soft-failure paths of the session service are exercised.
#[derive(Default)]
pub struct InMemoryLearningStore {
    state: RwLock<MemoryState>,
    unavailable: AtomicBool,
    fail_writes: AtomicBool,
}

impl InMemoryLearningStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn insert_user(&self, user: User) {
        self.state.write().await.users.insert(user.id.clone(), user);
    }

    pub async fn insert_character(&self, character: Character) {
        self.state
            .write()
            .await
            .characters
            .insert(character.user_id.clone(), character);
    }

    pub async fn insert_subject(&self, subject: Subject) {
        self.state.write().await.subjects.push(subject);
    }

    pub async fn insert_questions(&self, questions: impl IntoIterator<Item = Question>) {
        self.state.write().await.questions.extend(questions);
    }

    pub async fn insert_response(&self, record: ResponseRecord) {
        self.state.write().await.responses.push(record);
    }

    pub async fn session_record(&self, session_id: &str) -> Option<LearningSessionRecord> {
        self.state.read().await.sessions.get(session_id).cloned()
    }

    pub async fn responses_for(&self, user_id: &str) -> Vec<ResponseRecord> {
        self.state
            .read()
            .await
            .responses
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("in-memory store unavailable");
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        self.check_available()?;
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("in-memory store rejected write");
        }
        Ok(())
    }
}

#[async_trait]
impl LearningStore for InMemoryLearningStore {
    async fn find_questions(&self, query: &QuestionQuery) -> Result<Vec<Question>> {
        self.check_available()?;
        let state = self.state.read().await;
        let mut matching: Vec<Question> = state
            .questions
            .iter()
            .filter(|q| query.matches(q))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            a.difficulty
                .cmp(&b.difficulty)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        matching.truncate(query.limit as usize);
        Ok(matching)
    }

    async fn count_questions(
        &self,
        subject_id: Option<&str>,
        age_range: Option<AgeRange>,
    ) -> Result<u64> {
        self.check_available()?;
        let state = self.state.read().await;
        let count = state
            .questions
            .iter()
            .filter(|q| subject_id.is_none_or(|s| q.subject_id == s))
            .filter(|q| age_range.is_none_or(|r| q.age_range == r))
            .count();
        Ok(count as u64)
    }

    async fn list_subjects(&self) -> Result<Vec<Subject>> {
        self.check_available()?;
        let mut subjects = self.state.read().await.subjects.clone();
        subjects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(subjects)
    }

    async fn recent_responses(
        &self,
        user_id: &str,
        subject_id: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<ResponseRecord>> {
        self.check_available()?;
        let state = self.state.read().await;
        let mut responses: Vec<ResponseRecord> = state
            .responses
            .iter()
            .filter(|r| r.user_id == user_id)
            .filter(|r| subject_id.is_none_or(|s| r.subject_id == s))
            .cloned()
            .collect();
        responses.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = limit {
            responses.truncate(limit as usize);
        }
        Ok(responses)
    }

    async fn answered_question_ids(
        &self,
        user_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<String>> {
        self.check_available()?;
        let state = self.state.read().await;
        let ids: BTreeSet<String> = state
            .responses
            .iter()
            .filter(|r| r.user_id == user_id)
            .filter(|r| since.is_none_or(|since| r.created_at >= since))
            .map(|r| r.question_id.clone())
            .collect();
        Ok(ids.into_iter().collect())
    }

    async fn save_response(&self, record: &ResponseRecord) -> Result<()> {
        self.check_writable()?;
        self.state.write().await.responses.push(record.clone());
        Ok(())
    }

    async fn save_session_record(&self, record: &LearningSessionRecord) -> Result<()> {
        self.check_writable()?;
        self.state
            .write()
            .await
            .sessions
            .insert(record.session_id.clone(), record.clone());
        Ok(())
    }

    async fn user_age(&self, user_id: &str) -> Result<Option<u32>> {
        self.check_available()?;
        Ok(self
            .state
            .read()
            .await
            .users
            .get(user_id)
            .and_then(|u| u.age))
    }

    async fn get_character(&self, user_id: &str) -> Result<Option<Character>> {
        self.check_available()?;
        Ok(self.state.read().await.characters.get(user_id).cloned())
    }

    async fn award_xp(&self, user_id: &str, amount: u32) -> Result<Character> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        let character = state
            .characters
            .entry(user_id.to_string())
            .or_insert_with(|| Character {
                user_id: user_id.to_string(),
                name: user_id.to_string(),
                level: 1,
                xp: 0,
            });
        character.xp += u64::from(amount);
        Ok(character.clone())
    }

    async fn ping(&self) -> Result<()> {
        self.check_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn question(id: &str, difficulty: u8, age: i64) -> Question {
        Question {
            id: id.into(),
            subject_id: "math".into(),
            text: format!("question {}", id),
            options: vec!["a".into(), "b".into()],
            correct_answer: "a".into(),
            difficulty,
            xp_reward: 10,
            age_range: AgeRange::Primary,
            hint: None,
            explanation: None,
            created_at: Utc::now() - Duration::minutes(age),
        }
    }

    #[tokio::test]
    async fn find_questions_orders_by_difficulty_then_recency() {
        let store = InMemoryLearningStore::new();
        store
            .insert_questions(vec![
                question("old-easy", 1, 30),
                question("hard", 4, 1),
                question("new-easy", 1, 5),
            ])
            .await;

        let found = store
            .find_questions(&QuestionQuery {
                limit: 10,
                ..QuestionQuery::default()
            })
            .await
            .unwrap();
        let ids: Vec<_> = found.iter().map(|q| q.id.as_str()).collect();
        assert_eq!(ids, vec!["new-easy", "old-easy", "hard"]);
    }

    #[tokio::test]
    async fn unavailable_store_fails_reads() {
        let store = InMemoryLearningStore::new();
        store.set_unavailable(true);
        assert!(store.list_subjects().await.is_err());
        store.set_unavailable(false);
        assert!(store.list_subjects().await.is_ok());
    }

    #[tokio::test]
    async fn award_xp_creates_character_on_first_award() {
        let store = InMemoryLearningStore::new();
        let character = store.award_xp("kid", 40).await.unwrap();
        assert_eq!(character.xp, 40);
        let character = store.award_xp("kid", 2).await.unwrap();
        assert_eq!(character.xp, 42);
    }
}
