//! Streak-based difficulty adjustment and target-difficulty selection.

use crate::metrics::DIFFICULTY_ADJUSTMENTS_TOTAL;
use crate::models::question::{clamp_difficulty, MAX_DIFFICULTY, MIN_DIFFICULTY};
use crate::models::session::PERFORMANCE_HISTORY_CAPACITY;
use crate::models::{AdaptiveDifficultyState, Trend, UserPerformance};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DifficultyChange {
    Increased,
    Decreased,
    Unchanged,
}

impl DifficultyChange {
    pub fn as_str(&self) -> &'static str {
        match self {
            DifficultyChange::Increased => "increased",
            DifficultyChange::Decreased => "decreased",
            DifficultyChange::Unchanged => "unchanged",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DifficultyOutcome {
    pub previous: u8,
    pub current: u8,
    pub change: DifficultyChange,
    /// The correct-answer streak reached the adjustment threshold.
    pub streak_completed: bool,
}

impl AdaptiveDifficultyState {
    pub fn new(initial_difficulty: u8, adjustment_threshold: u32) -> Self {
        Self {
            current_difficulty: clamp_difficulty(i64::from(initial_difficulty)),
            consecutive_correct: 0,
            consecutive_incorrect: 0,
            performance_history: VecDeque::with_capacity(PERFORMANCE_HISTORY_CAPACITY),
            adjustment_threshold: adjustment_threshold.max(1),
        }
    }

    /// Fold one answer into the state.
    ///
    /// The performance history is updated on every call; streak counters and the
    /// difficulty level only move when `adaptive` is set.
    pub fn record_response(&mut self, is_correct: bool, adaptive: bool) -> DifficultyOutcome {
        self.performance_history.push_back(is_correct);
        while self.performance_history.len() > PERFORMANCE_HISTORY_CAPACITY {
            self.performance_history.pop_front();
        }

        let previous = self.current_difficulty;
        let mut streak_completed = false;

        if adaptive {
            if is_correct {
                self.consecutive_correct += 1;
                self.consecutive_incorrect = 0;
                if self.consecutive_correct >= self.adjustment_threshold {
                    self.current_difficulty = (self.current_difficulty + 1).min(MAX_DIFFICULTY);
                    self.consecutive_correct = 0;
                    streak_completed = true;
                }
            } else {
                self.consecutive_incorrect += 1;
                self.consecutive_correct = 0;
                if self.consecutive_incorrect >= self.adjustment_threshold {
                    self.current_difficulty =
                        self.current_difficulty.saturating_sub(1).max(MIN_DIFFICULTY);
                    self.consecutive_incorrect = 0;
                }
            }
        }

        let change = match self.current_difficulty.cmp(&previous) {
            std::cmp::Ordering::Greater => DifficultyChange::Increased,
            std::cmp::Ordering::Less => DifficultyChange::Decreased,
            std::cmp::Ordering::Equal => DifficultyChange::Unchanged,
        };
        if change != DifficultyChange::Unchanged {
            DIFFICULTY_ADJUSTMENTS_TOTAL
                .with_label_values(&[change.as_str()])
                .inc();
        }

        DifficultyOutcome {
            previous,
            current: self.current_difficulty,
            change,
            streak_completed,
        }
    }

    /// Fraction of correct answers in the bounded history.
    pub fn recent_accuracy(&self) -> Option<f64> {
        if self.performance_history.is_empty() {
            return None;
        }
        let correct = self.performance_history.iter().filter(|c| **c).count();
        Some(correct as f64 / self.performance_history.len() as f64)
    }
}

/// Pick a difficulty in 1..=5 from a learner's recent performance.
///
/// Starts at the rounded average difficulty, moves one level for accuracy
/// (>0.8 up, <0.6 down) and one more for the trend.
pub fn calculate_target_difficulty(performance: &UserPerformance) -> u8 {
    let baseline = if performance.average_difficulty.is_finite() {
        performance.average_difficulty.round() as i64
    } else {
        i64::from(MIN_DIFFICULTY)
    };
    let mut target = clamp_difficulty(baseline);

    if performance.accuracy > 0.8 {
        target = clamp_difficulty(i64::from(target) + 1);
    } else if performance.accuracy < 0.6 {
        target = clamp_difficulty(i64::from(target) - 1);
    }

    match performance.recent_trend {
        Trend::Improving => clamp_difficulty(i64::from(target) + 1),
        Trend::Declining => clamp_difficulty(i64::from(target) - 1),
        Trend::Stable => target,
    }
}

/// The ±1 band around `target`, clamped to the valid range.
pub fn difficulty_window(target: u8) -> (u8, u8) {
    (
        clamp_difficulty(i64::from(target) - 1),
        clamp_difficulty(i64::from(target) + 1),
    )
}
