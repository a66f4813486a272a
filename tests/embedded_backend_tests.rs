//! Embedded video surrogate driven through the common backend surface.

mod common;

use common::*;
use mixtape::config::EndOfQueue;
use mixtape::error::AppError;
use mixtape::playback::backend::{
    BackendErrorKind, BackendEvent, EventEmitter, EventReceiver, PlaybackBackend,
};
use mixtape::playback::embedded::{EmbedEvent, EmbedEventSender, EmbeddedMediaBackend};
use mixtape::session::{SessionStatus, Transport};

async fn connected() -> (EmbeddedMediaBackend, CallLog, EmbedEventSender, EventReceiver) {
    let (mut backend, log, embed) = embedded_backend();
    let (emitter, rx) = EventEmitter::channel();
    backend.connect(emitter).await.unwrap();
    (backend, log, embed, rx)
}

async fn make_ready(embed: &EmbedEventSender, rx: &mut EventReceiver) {
    assert!(embed.send(EmbedEvent::ApiReady));
    assert_eq!(recv(rx).await.event, BackendEvent::ReadinessChanged(true));
}

#[tokio::test]
async fn commands_before_api_ready_fail_without_mounting() {
    let (mut backend, log, _embed, _rx) = connected().await;

    assert!(matches!(backend.prepare(&track("a")).await, Err(AppError::NotReady)));
    assert!(matches!(backend.play().await, Err(AppError::NotReady)));
    assert!(matches!(backend.pause().await, Err(AppError::NotReady)));

    assert!(log.calls().is_empty());
}

#[tokio::test]
async fn prepare_mounts_the_video_id() {
    let (mut backend, log, embed, mut rx) = connected().await;
    make_ready(&embed, &mut rx).await;

    backend.prepare(&track("a")).await.unwrap();
    backend.play().await.unwrap();
    backend.seek(30_000).await.unwrap();

    assert_eq!(
        log.calls(),
        vec!["mount:catalog:track:a", "play_video", "seek_to:30000"]
    );
}

#[tokio::test]
async fn empty_video_id_is_unplayable() {
    let (mut backend, log, embed, mut rx) = connected().await;
    make_ready(&embed, &mut rx).await;

    let mut blank = track("a");
    blank.uri = String::new();

    assert!(matches!(backend.prepare(&blank).await, Err(AppError::Unplayable(ref id)) if id == "a"));
    assert!(log.calls().is_empty());
}

#[tokio::test]
async fn refused_embedding_reports_unplayable() {
    let (_backend, _log, embed, mut rx) = connected().await;

    assert!(embed.send(EmbedEvent::Error(150)));

    match recv(&mut rx).await.event {
        BackendEvent::Error { kind, .. } => assert_eq!(kind, BackendErrorKind::Unplayable),
        other => panic!("expected an error, got {:?}", other),
    }
}

#[tokio::test]
async fn states_from_a_replaced_video_are_dropped() {
    let (mut backend, _log, embed, mut rx) = connected().await;
    make_ready(&embed, &mut rx).await;
    backend.prepare(&track("a")).await.unwrap();

    assert!(embed.send(EmbedEvent::StateCode(0)));
    backend.prepare(&track("b")).await.unwrap();
    assert!(embed.send(EmbedEvent::StateCode(1)));

    match recv(&mut rx).await.event {
        BackendEvent::StateChanged(state) => {
            assert!(!state.paused);
            assert_eq!(state.track_id.as_deref(), Some("b"));
        }
        other => panic!("expected the new video's state, got {:?}", other),
    }
}

#[tokio::test]
async fn dispose_destroys_once() {
    let (mut backend, log, embed, mut rx) = connected().await;
    make_ready(&embed, &mut rx).await;

    backend.dispose().await;
    backend.dispose().await;

    assert_eq!(log.count("destroy"), 1);
    assert!(matches!(backend.play().await, Err(AppError::NotReady)));
}

#[tokio::test]
async fn ended_code_advances_the_session() {
    let (mut controller, _tokens, _clock) = controller(EndOfQueue::Stop);
    let (backend, log, embed) = embedded_backend();
    let mut rx = controller.install_backend(Box::new(backend)).await.unwrap();
    assert_eq!(controller.status(), SessionStatus::BackendConnecting);

    assert!(embed.send(EmbedEvent::ApiReady));
    pump_one(&mut controller, &mut rx).await;
    controller.select_queue(tracks(&["a", "b"]), Some(0)).await.unwrap();

    assert!(embed.send(EmbedEvent::StateCode(1)));
    pump_one(&mut controller, &mut rx).await;
    assert_eq!(controller.playback().transport, Transport::Playing);

    assert!(embed.send(EmbedEvent::StateCode(0)));
    loop {
        if let BackendEvent::Ended { .. } = pump_one(&mut controller, &mut rx).await {
            break;
        }
    }

    assert_eq!(controller.queue().cursor(), Some(1));
    assert_eq!(log.count("mount:"), 2);
    assert_eq!(log.calls().last().map(String::as_str), Some("play_video"));

    // the run started at "a", so the end of "b" stops instead of wrapping
    assert!(embed.send(EmbedEvent::StateCode(0)));
    loop {
        if let BackendEvent::Ended { .. } = pump_one(&mut controller, &mut rx).await {
            break;
        }
    }
    assert_eq!(controller.queue().cursor(), Some(1));
    assert_eq!(controller.status(), SessionStatus::Idle);
    assert_eq!(log.count("mount:"), 2);
}
