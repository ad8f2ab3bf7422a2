//! Integration tests for lesson sessions: context assembly, switching
//! between activities over the existing connection, and acknowledgement
//! reconciliation.

mod common;

use common::*;
use tutor_client::{ConnectionState, EngineError, SessionHandle, SessionMode};
use tutor_core::activity::LessonSeed;

fn lesson_seed() -> LessonSeed {
    LessonSeed {
        lesson_id: "algebra-basics".to_string(),
        start_instance_id: None,
    }
}

#[tokio::test]
async fn lesson_connect_sends_full_lesson_context() {
    let service = MockService::spawn(MockOptions::default()).await;
    let (session, _events) = SessionHandle::spawn(test_config(&service.url), test_deps());

    session.connect_lesson(lesson_seed()).await.expect("connect_lesson");
    assert_eq!(session.mode(), SessionMode::Lesson);
    assert_eq!(session.active_activity_id().as_deref(), Some("a"));

    wait_until("context frame to arrive", || service.frames(0).len() >= 2).await;
    let frames = service.frames(0);
    assert_eq!(frame_type(&frames[1]), "context");

    let context: serde_json::Value = serde_json::from_str(&frames[1]).unwrap();
    assert_eq!(context["activity"]["instance_id"], "a");
    assert_eq!(context["lesson"]["lesson_id"], "algebra-basics");
    assert_eq!(
        context["lesson"]["ordered_activities"]
            .as_array()
            .unwrap()
            .len(),
        3
    );
    // Prior results from the evaluation collaborator ride along.
    assert_eq!(context["lesson"]["prior_results"][0]["instance_id"], "a");
}

#[tokio::test]
async fn lesson_seed_can_start_mid_sequence() {
    let service = MockService::spawn(MockOptions::default()).await;
    let (session, _events) = SessionHandle::spawn(test_config(&service.url), test_deps());

    let seed = LessonSeed {
        lesson_id: "algebra-basics".to_string(),
        start_instance_id: Some("b".to_string()),
    };
    session.connect_lesson(seed).await.expect("connect_lesson");
    assert_eq!(session.active_activity_id().as_deref(), Some("b"));
}

#[tokio::test]
async fn switch_sends_one_frame_over_the_existing_connection() {
    let service = MockService::spawn(MockOptions::default()).await;
    let (session, _events) = SessionHandle::spawn(test_config(&service.url), test_deps());

    session.connect_lesson(lesson_seed()).await.expect("connect_lesson");
    session.switch_activity(quiz_activity("b")).await.expect("switch");

    // Optimistic update is immediate.
    assert_eq!(session.active_activity_id().as_deref(), Some("b"));

    wait_until("switch frame to arrive", || {
        service
            .frames(0)
            .iter()
            .any(|f| frame_type(f) == "switch_primitive")
    })
    .await;
    let switches: Vec<String> = service
        .frames(0)
        .into_iter()
        .filter(|f| frame_type(f) == "switch_primitive")
        .collect();
    assert_eq!(switches.len(), 1);
    let switch: serde_json::Value = serde_json::from_str(&switches[0]).unwrap();
    assert_eq!(switch["activity"]["instance_id"], "b");

    // The ack confirms the optimistic value; no new transport was opened.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(session.active_activity_id().as_deref(), Some("b"));
    assert_eq!(service.accept_count(), 1);
}

#[tokio::test]
async fn switching_to_the_active_activity_is_a_no_op() {
    let service = MockService::spawn(MockOptions::default()).await;
    let (session, _events) = SessionHandle::spawn(test_config(&service.url), test_deps());

    session.connect_lesson(lesson_seed()).await.expect("connect_lesson");
    session.switch_activity(quiz_activity("b")).await.expect("first switch");
    session.switch_activity(quiz_activity("b")).await.expect("second switch");

    wait_until("switch frame to arrive", || {
        service
            .frames(0)
            .iter()
            .any(|f| frame_type(f) == "switch_primitive")
    })
    .await;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let switches = service
        .frames(0)
        .into_iter()
        .filter(|f| frame_type(f) == "switch_primitive")
        .count();
    assert_eq!(switches, 1, "idempotent switch must not resend the frame");
}

#[tokio::test]
async fn switching_outside_the_lesson_is_rejected() {
    let service = MockService::spawn(MockOptions::default()).await;
    let (session, _events) = SessionHandle::spawn(test_config(&service.url), test_deps());

    session.connect_lesson(lesson_seed()).await.expect("connect_lesson");
    let err = session.switch_activity(quiz_activity("zz")).await.unwrap_err();
    assert!(matches!(err, EngineError::UnknownActivity(id) if id == "zz"));
    assert_eq!(session.active_activity_id().as_deref(), Some("a"));
}

#[tokio::test]
async fn switch_is_rejected_in_a_standalone_session() {
    let service = MockService::spawn(MockOptions::default()).await;
    let (session, _events) = SessionHandle::spawn(test_config(&service.url), test_deps());

    session.connect(quiz_activity("q1")).await.expect("connect");
    let err = session.switch_activity(quiz_activity("b")).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { .. }));
}

#[tokio::test]
async fn mismatched_ack_adopts_the_server_value() {
    let service = MockService::spawn(MockOptions {
        auto_ack_switch: false,
        ..MockOptions::default()
    })
    .await;
    let (session, mut events) = SessionHandle::spawn(test_config(&service.url), test_deps());

    session.connect_lesson(lesson_seed()).await.expect("connect_lesson");
    session.switch_activity(quiz_activity("b")).await.expect("switch");
    assert_eq!(session.active_activity_id().as_deref(), Some("b"));

    // The service settled on a different activity than we asked for.
    service.send(
        0,
        serde_json::json!({"type":"primitive_switched","instance_id":"c"}),
    );
    expect_event(&mut events, "server-corrected activity", |e| {
        matches!(
            e,
            tutor_client::SessionEvent::ActivityChanged { instance_id } if instance_id == "c"
        )
    })
    .await;
    assert_eq!(session.active_activity_id().as_deref(), Some("c"));
    assert_eq!(session.connection_state(), ConnectionState::Open);
}
