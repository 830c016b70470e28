//! Session driver tests on tokio's paused clock
//!
//! These run the real `TimerTable`, so timer tasks sleep on the runtime
//! clock. Sleeps in the tests land between timer deadlines rather than on
//! them.

use std::time::Duration;

use arbiter_core::{
    AppId, ArbiterConfig, ChannelSender, DisplayOutcome, DisplayRequest, RejectReason,
    SessionRegistry, VisibleState,
};
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use tokio::time::sleep;

const CORE: &str = "org.augmentos.captions";
const WEATHER: &str = "com.example.weather";

fn frame_text(frame: &str) -> String {
    let value: serde_json::Value = serde_json::from_str(frame).unwrap();
    let layout = &value["layout"];
    match layout["layoutType"].as_str() {
        Some("reference_card") => format!(
            "{}: {}",
            layout["title"].as_str().unwrap(),
            layout["text"].as_str().unwrap()
        ),
        _ => layout["text"].as_str().unwrap_or_default().to_string(),
    }
}

fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<String> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}

fn registry() -> SessionRegistry {
    SessionRegistry::new(ArbiterConfig::default().with_app_name(WEATHER, "Weather"))
}

#[tokio::test(start_paused = true)]
async fn test_boot_screen_clears_after_boot_duration() {
    let registry = registry();
    let (tx, mut rx) = mpsc::channel(16);
    let session = registry.create("user-1", ChannelSender::new(tx));

    session.app_started(AppId::from(WEATHER)).await.unwrap();
    let blocked = session
        .display_outcome(DisplayRequest::text_wall(CORE, "captions"))
        .await
        .unwrap();
    assert_eq!(blocked, DisplayOutcome::Rejected(RejectReason::Booting));

    let frames: Vec<_> = drain(&mut rx).iter().map(|f| frame_text(f)).collect();
    assert_eq!(frames, vec!["Starting App: Weather".to_string()]);
    assert_eq!(
        session.snapshot().await.unwrap().state,
        VisibleState::Booting
    );

    sleep(Duration::from_millis(3_100)).await;

    let frames: Vec<_> = drain(&mut rx).iter().map(|f| frame_text(f)).collect();
    assert_eq!(frames, vec![String::new()]);
    assert_eq!(session.snapshot().await.unwrap().state, VisibleState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_persistent_display_refreshes_on_runtime_clock() {
    let registry = registry();
    let (tx, mut rx) = mpsc::channel(16);
    let session = registry.create("user-1", ChannelSender::new(tx));

    assert!(session
        .display(DisplayRequest::text_wall(CORE, "hello"))
        .await
        .unwrap());
    let first = drain(&mut rx);
    assert_eq!(first.len(), 1);

    sleep(Duration::from_millis(13_900)).await;
    assert!(drain(&mut rx).is_empty());

    sleep(Duration::from_millis(200)).await;
    assert_eq!(drain(&mut rx), first);
}

#[tokio::test(start_paused = true)]
async fn test_deferred_display_goes_out_after_window() {
    let registry = registry();
    let (tx, mut rx) = mpsc::channel(16);
    let session = registry.create("user-1", ChannelSender::new(tx));

    assert!(session
        .display(DisplayRequest::text_wall(CORE, "one"))
        .await
        .unwrap());
    assert_eq!(
        session
            .display_outcome(DisplayRequest::text_wall(CORE, "two"))
            .await
            .unwrap(),
        DisplayOutcome::Deferred
    );
    assert_eq!(drain(&mut rx).len(), 1);

    sleep(Duration::from_millis(350)).await;
    let frames: Vec<_> = drain(&mut rx).iter().map(|f| frame_text(f)).collect();
    assert_eq!(frames, vec!["two".to_string()]);

    let history = session.history(AppId::from(CORE)).await.unwrap();
    let outcomes: Vec<_> = history.into_iter().map(|entry| entry.outcome).collect();
    assert_eq!(
        outcomes,
        vec![DisplayOutcome::Shown, DisplayOutcome::Deferred]
    );
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_pending_timers() {
    let registry = registry();
    let (tx, mut rx) = mpsc::channel(16);
    let session = registry.create("user-1", ChannelSender::new(tx));

    session.app_started(AppId::from(WEATHER)).await.unwrap();
    assert!(registry.remove(session.id()).await);

    sleep(Duration::from_millis(5_000)).await;

    // Boot screen only; the sender was dropped with the session
    assert!(rx.recv().await.is_some());
    assert!(rx.recv().await.is_none());
}
