use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, Bson, Document},
    options::{FindOneAndUpdateOptions, ReplaceOptions, ReturnDocument},
    Collection, Database,
};

use super::{
    LearningStore, CHARACTERS_COLLECTION, QUESTIONS_COLLECTION, RESPONSES_COLLECTION,
    SESSIONS_COLLECTION, SUBJECTS_COLLECTION, USERS_COLLECTION,
};
use crate::metrics::track_db_operation;
use crate::models::{
    AgeRange, Character, LearningSessionRecord, Question, QuestionQuery, ResponseRecord, Subject,
};
use crate::utils::time::chrono_to_bson;

pub struct MongoLearningStore {
    mongo: Database,
}

impl MongoLearningStore {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    fn questions(&self) -> Collection<Question> {
        self.mongo.collection(QUESTIONS_COLLECTION)
    }

    fn responses(&self) -> Collection<ResponseRecord> {
        self.mongo.collection(RESPONSES_COLLECTION)
    }

    fn question_filter(query: &QuestionQuery) -> Document {
        let mut filter = Document::new();

        if let Some(subject_id) = &query.subject_id {
            filter.insert("subject_id", subject_id.as_str());
        }
        if let Some(age_range) = query.age_range {
            filter.insert("age_range", age_range.as_str());
        }

        let mut difficulty = Document::new();
        if let Some(min) = query.min_difficulty {
            difficulty.insert("$gte", i32::from(min));
        }
        if let Some(max) = query.max_difficulty {
            difficulty.insert("$lte", i32::from(max));
        }
        if !difficulty.is_empty() {
            filter.insert("difficulty", difficulty);
        }

        if !query.exclude_ids.is_empty() {
            filter.insert("_id", doc! { "$nin": query.exclude_ids.clone() });
        }

        filter
    }

    fn count_filter(subject_id: Option<&str>, age_range: Option<AgeRange>) -> Document {
        let mut filter = Document::new();
        if let Some(subject_id) = subject_id {
            filter.insert("subject_id", subject_id);
        }
        if let Some(age_range) = age_range {
            filter.insert("age_range", age_range.as_str());
        }
        filter
    }
}

#[async_trait]
impl LearningStore for MongoLearningStore {
    async fn find_questions(&self, query: &QuestionQuery) -> Result<Vec<Question>> {
        let filter = Self::question_filter(query);
        track_db_operation("find", QUESTIONS_COLLECTION, async {
            let cursor = self
                .questions()
                .find(filter)
                .sort(doc! { "difficulty": 1, "createdAt": -1 })
                .limit(i64::from(query.limit))
                .await
                .context("Failed to query questions")?;

            cursor
                .try_collect::<Vec<_>>()
                .await
                .context("Failed to read questions cursor")
        })
        .await
    }

    async fn count_questions(
        &self,
        subject_id: Option<&str>,
        age_range: Option<AgeRange>,
    ) -> Result<u64> {
        let filter = Self::count_filter(subject_id, age_range);
        track_db_operation("count", QUESTIONS_COLLECTION, async {
            self.questions()
                .count_documents(filter)
                .await
                .context("Failed to count questions")
        })
        .await
    }

    async fn list_subjects(&self) -> Result<Vec<Subject>> {
        track_db_operation("find", SUBJECTS_COLLECTION, async {
            let cursor = self
                .mongo
                .collection::<Subject>(SUBJECTS_COLLECTION)
                .find(Document::new())
                .sort(doc! { "name": 1 })
                .await
                .context("Failed to query subjects")?;

            cursor
                .try_collect::<Vec<_>>()
                .await
                .context("Failed to read subjects cursor")
        })
        .await
    }

    async fn recent_responses(
        &self,
        user_id: &str,
        subject_id: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<ResponseRecord>> {
        let mut filter = doc! { "user_id": user_id };
        if let Some(subject_id) = subject_id {
            filter.insert("subject_id", subject_id);
        }

        track_db_operation("find", RESPONSES_COLLECTION, async {
            let responses = self.responses();
            let mut find = responses.find(filter).sort(doc! { "createdAt": -1 });
            if let Some(limit) = limit {
                find = find.limit(i64::from(limit));
            }

            let cursor = find.await.context("Failed to query question responses")?;
            cursor
                .try_collect::<Vec<_>>()
                .await
                .context("Failed to read question responses cursor")
        })
        .await
    }

    async fn answered_question_ids(
        &self,
        user_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<String>> {
        let mut filter = doc! { "user_id": user_id };
        if let Some(since) = since {
            filter.insert("createdAt", doc! { "$gte": chrono_to_bson(since) });
        }

        track_db_operation("distinct", RESPONSES_COLLECTION, async {
            let values = self
                .responses()
                .distinct("question_id", filter)
                .await
                .context("Failed to list answered questions")?;

            Ok(values
                .into_iter()
                .filter_map(|value| match value {
                    Bson::String(id) => Some(id),
                    _ => None,
                })
                .collect())
        })
        .await
    }

    async fn save_response(&self, record: &ResponseRecord) -> Result<()> {
        track_db_operation("insert", RESPONSES_COLLECTION, async {
            self.responses()
                .insert_one(record)
                .await
                .map(|_| ())
                .context("Failed to insert question response")
        })
        .await
    }

    async fn save_session_record(&self, record: &LearningSessionRecord) -> Result<()> {
        track_db_operation("upsert", SESSIONS_COLLECTION, async {
            self.mongo
                .collection::<LearningSessionRecord>(SESSIONS_COLLECTION)
                .replace_one(doc! { "_id": record.session_id.as_str() }, record)
                .with_options(ReplaceOptions::builder().upsert(true).build())
                .await
                .map(|_| ())
                .context("Failed to save learning session")
        })
        .await
    }

    async fn user_age(&self, user_id: &str) -> Result<Option<u32>> {
        let user = track_db_operation("find_one", USERS_COLLECTION, async {
            self.mongo
                .collection::<Document>(USERS_COLLECTION)
                .find_one(doc! { "_id": user_id })
                .await
                .context("Failed to query user")
        })
        .await?;

        Ok(user.and_then(|user| {
            user.get_i32("age")
                .map(i64::from)
                .or_else(|_| user.get_i64("age"))
                .ok()
                .and_then(|age| u32::try_from(age).ok())
        }))
    }

    async fn get_character(&self, user_id: &str) -> Result<Option<Character>> {
        track_db_operation("find_one", CHARACTERS_COLLECTION, async {
            self.mongo
                .collection::<Character>(CHARACTERS_COLLECTION)
                .find_one(doc! { "user_id": user_id })
                .await
                .context("Failed to query character")
        })
        .await
    }

    async fn award_xp(&self, user_id: &str, amount: u32) -> Result<Character> {
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();

        track_db_operation("update", CHARACTERS_COLLECTION, async {
            self.mongo
                .collection::<Character>(CHARACTERS_COLLECTION)
                .find_one_and_update(
                    doc! { "user_id": user_id },
                    doc! {
                        "$inc": { "xp": i64::from(amount) },
                        "$setOnInsert": { "name": user_id, "level": 1 },
                    },
                )
                .with_options(options)
                .await
                .context("Failed to award XP")?
                .context("Character upsert returned no document")
        })
        .await
    }

    async fn ping(&self) -> Result<()> {
        self.mongo
            .run_command(doc! { "ping": 1 })
            .await
            .map(|_| ())
            .context("MongoDB ping failed")
    }
}
