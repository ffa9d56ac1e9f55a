use serde::{Deserialize, Serialize};

use super::question::AgeRange;

/// Learner profile stored in the "users" collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub age: Option<u32>,
}

impl User {
    pub fn age_range(&self) -> Option<AgeRange> {
        self.age.map(AgeRange::for_age)
    }
}

/// RPG character attached to a learner, stored in the "characters" collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Character {
    pub user_id: String,
    pub name: String,
    #[serde(default = "default_level")]
    pub level: u32,
    #[serde(default)]
    pub xp: u64,
}

fn default_level() -> u32 {
    1
}

// Serde converters for chrono::DateTime <-> mongodb::bson::DateTime.
// BSON (not human-readable) gets a native datetime, JSON gets RFC 3339.
pub(crate) mod bson_datetime_as_chrono {
    use chrono::{DateTime, Utc};
    use mongodb::bson;
    use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            return date.serialize(serializer);
        }
        let bson_dt = bson::DateTime::from_millis(date.timestamp_millis());
        bson_dt.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            return DateTime::<Utc>::deserialize(deserializer);
        }
        let bson_dt = bson::DateTime::deserialize(deserializer)?;
        DateTime::from_timestamp_millis(bson_dt.timestamp_millis())
            .ok_or_else(|| D::Error::custom("timestamp out of range"))
    }
}

pub(crate) mod bson_datetime_as_chrono_option {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(serde::Deserialize)]
    struct Wrapped(#[serde(with = "super::bson_datetime_as_chrono")] DateTime<Utc>);

    pub fn serialize<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(d) => super::bson_datetime_as_chrono::serialize(d, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let wrapped: Option<Wrapped> = Option::deserialize(deserializer)?;
        Ok(wrapped.map(|Wrapped(date)| date))
    }
}
