use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Stable,
    Declining,
}

/// Rolling view of a learner's recent answers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct UserPerformance {
    /// Fraction correct, 0.0..=1.0.
    pub accuracy: f64,
    pub average_difficulty: f64,
    pub recent_trend: Trend,
}

impl Default for UserPerformance {
    fn default() -> Self {
        Self {
            accuracy: 0.5,
            average_difficulty: 1.0,
            recent_trend: Trend::Stable,
        }
    }
}
