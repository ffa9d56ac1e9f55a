use questtutor_api::{
    models::{AgeRange, QuestionFilters, Trend},
    services::difficulty::calculate_target_difficulty,
    LearningError,
};
use std::collections::HashSet;

mod common;

use common::{KID, TEEN};

fn math_primary(limit: u32) -> QuestionFilters {
    QuestionFilters {
        subject_id: Some("math".to_string()),
        age_range: Some(AgeRange::Primary),
        limit,
        ..QuestionFilters::default()
    }
}

#[tokio::test]
async fn test_load_orders_by_difficulty_then_recency() {
    let app = common::create_test_app().await;

    let batch = app
        .state
        .questions
        .load_questions(&math_primary(5))
        .await
        .unwrap();
    let ids: Vec<_> = batch.questions.iter().map(|q| q.id.as_str()).collect();
    assert_eq!(ids, vec!["math-0", "math-1", "math-2", "math-3", "math-4"]);
    assert!(batch.has_more);

    let all = app
        .state
        .questions
        .load_questions(&math_primary(50))
        .await
        .unwrap();
    assert_eq!(all.questions.len(), 20);
    assert!(!all.has_more);
    assert!(all
        .questions
        .windows(2)
        .all(|pair| pair[0].difficulty <= pair[1].difficulty));
}

#[tokio::test]
async fn test_difficulty_filter_is_exact() {
    let app = common::create_test_app().await;

    let batch = app
        .state
        .questions
        .load_questions(&QuestionFilters {
            difficulty: Some(4),
            ..math_primary(50)
        })
        .await
        .unwrap();
    assert_eq!(batch.questions.len(), 3);
    assert!(batch.questions.iter().all(|q| q.difficulty == 4));
}

#[tokio::test]
async fn test_cached_batch_is_served_until_invalidated() {
    let app = common::create_test_app().await;
    let questions = &app.state.questions;
    let filters = QuestionFilters {
        subject_id: Some("reading".to_string()),
        limit: 10,
        ..QuestionFilters::default()
    };

    let first = questions.load_questions(&filters).await.unwrap();
    assert_eq!(first.questions.len(), 4);
    assert_eq!(questions.cached_entries(), 1);

    app.store
        .insert_questions(vec![common::question(
            "reading-new",
            "reading",
            1,
            AgeRange::Primary,
            0,
        )])
        .await;

    let cached = questions.load_questions(&filters).await.unwrap();
    assert_eq!(cached, first);

    questions.invalidate_cache();
    assert_eq!(questions.cached_entries(), 0);
    let fresh = questions.load_questions(&filters).await.unwrap();
    assert_eq!(fresh.questions.len(), 5);
    assert_eq!(fresh.questions[0].id, "reading-new");
}

#[tokio::test]
async fn test_exclude_answered_requires_user() {
    let app = common::create_test_app().await;

    let err = app
        .state
        .questions
        .load_questions(&QuestionFilters {
            exclude_answered: true,
            ..math_primary(10)
        })
        .await
        .unwrap_err();
    assert!(matches!(err, LearningError::Validation(_)));
}

#[tokio::test]
async fn test_exclude_answered_covers_old_answers() {
    let app = common::create_test_app().await;
    let answered = common::question("math-0", "math", 1, AgeRange::Primary, 0);
    common::record_answer(&app.store, KID, &answered, true, 72).await;

    let batch = app
        .state
        .questions
        .load_questions(&QuestionFilters {
            exclude_answered: true,
            user_id: Some(KID.to_string()),
            ..math_primary(50)
        })
        .await
        .unwrap();
    assert_eq!(batch.questions.len(), 19);
    assert!(batch.questions.iter().all(|q| q.id != "math-0"));
}

#[tokio::test]
async fn test_adaptive_skips_recent_answers() {
    let app = common::create_test_app().await;

    let mut recent = HashSet::new();
    for i in 0..6 {
        let q = common::question(&format!("math-{}", i), "math", 1, AgeRange::Primary, 0);
        common::record_answer(&app.store, KID, &q, true, 2).await;
        recent.insert(q.id);
    }

    let selected = app
        .state
        .questions
        .get_adaptive_questions(KID, AgeRange::Primary, Some("math"), 5)
        .await
        .unwrap();
    assert!(!selected.is_empty());
    assert!(selected.len() <= 5);
    for question in &selected {
        assert!(!recent.contains(&question.id));
        assert_eq!(question.subject_id, "math");
        assert_eq!(question.age_range, AgeRange::Primary);
    }
}

#[tokio::test]
async fn test_adaptive_targets_difficulty_window() {
    let app = common::create_test_app().await;

    // No history: accuracy 0.5 pulls the target to 1, window 1..=2
    let selected = app
        .state
        .questions
        .get_adaptive_questions(KID, AgeRange::Primary, Some("math"), 8)
        .await
        .unwrap();
    assert_eq!(selected.len(), 8);
    assert!(selected.iter().all(|q| q.difficulty <= 2));
}

#[tokio::test]
async fn test_adaptive_falls_back_when_window_is_empty() {
    let app = common::create_test_app().await;

    // Senior math only has difficulty 3, outside the fresh learner's window
    let selected = app
        .state
        .questions
        .get_adaptive_questions(TEEN, AgeRange::Senior, Some("math"), 5)
        .await
        .unwrap();
    let mut ids: Vec<_> = selected.iter().map(|q| q.id.clone()).collect();
    ids.sort();
    assert_eq!(ids, vec!["senior-math-0", "senior-math-1", "senior-math-2"]);
}

#[tokio::test]
async fn test_unavailable_store_is_retryable() {
    let app = common::create_test_app().await;
    app.store.set_unavailable(true);

    let err = app
        .state
        .questions
        .load_questions(&math_primary(5))
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    let err = app
        .state
        .questions
        .get_adaptive_questions(KID, AgeRange::Primary, Some("math"), 5)
        .await
        .unwrap_err();
    assert!(matches!(err, LearningError::RemoteStore { .. }));
}

#[tokio::test]
async fn test_subjects_come_with_counts() {
    let app = common::create_test_app().await;

    let subjects = app
        .state
        .questions
        .get_subjects_with_counts(None)
        .await
        .unwrap();
    let summary: Vec<_> = subjects
        .iter()
        .map(|s| (s.subject.name.as_str(), s.question_count))
        .collect();
    assert_eq!(summary, vec![("Math", 23), ("Reading", 4)]);

    let primary = app
        .state
        .questions
        .get_subjects_with_counts(Some(AgeRange::Primary))
        .await
        .unwrap();
    assert_eq!(primary[0].question_count, 20);
}

#[tokio::test]
async fn test_progress_is_sorted_by_accuracy() {
    let app = common::create_test_app().await;
    let reading = common::question("reading-0", "reading", 1, AgeRange::Primary, 0);
    let math_easy = common::question("math-0", "math", 1, AgeRange::Primary, 0);
    let math_hard = common::question("math-19", "math", 5, AgeRange::Primary, 0);

    common::record_answer(&app.store, KID, &reading, true, 5).await;
    common::record_answer(&app.store, KID, &math_easy, true, 4).await;
    common::record_answer(&app.store, KID, &math_hard, false, 1).await;

    let progress = app
        .state
        .questions
        .get_user_progress_by_subject(KID, Some(AgeRange::Primary))
        .await
        .unwrap();
    assert_eq!(progress.len(), 2);

    assert_eq!(progress[0].subject.id, "reading");
    assert!((progress[0].accuracy - 100.0).abs() < 1e-9);
    assert_eq!(progress[0].total_questions, 4);

    let math = &progress[1];
    assert_eq!(math.subject.id, "math");
    assert_eq!(math.answered_questions, 2);
    assert_eq!(math.correct_answers, 1);
    assert!((math.accuracy - 50.0).abs() < 1e-9);
    assert!((math.average_difficulty - 3.0).abs() < 1e-9);
    assert!(math.last_attempt.is_some());
}

#[tokio::test]
async fn test_user_performance_from_history() {
    let app = common::create_test_app().await;

    let fresh = app
        .state
        .performance
        .get_user_performance(KID, None)
        .await
        .unwrap();
    assert_eq!(fresh.accuracy, 0.5);
    assert_eq!(fresh.recent_trend, Trend::Stable);

    for (i, correct) in [true, true, true, false].into_iter().enumerate() {
        let q = common::question(&format!("math-{}", 6 + i), "math", 2, AgeRange::Primary, 0);
        common::record_answer(&app.store, KID, &q, correct, i as i64 + 1).await;
    }

    let performance = app
        .state
        .performance
        .get_user_performance(KID, Some("math"))
        .await
        .unwrap();
    assert!((performance.accuracy - 0.75).abs() < 1e-9);
    assert!((performance.average_difficulty - 2.0).abs() < 1e-9);
    assert_eq!(performance.recent_trend, Trend::Stable);
    assert_eq!(calculate_target_difficulty(&performance), 2);

    let other_subject = app
        .state
        .performance
        .get_user_performance(KID, Some("reading"))
        .await
        .unwrap();
    assert_eq!(other_subject.accuracy, 0.5);
}
