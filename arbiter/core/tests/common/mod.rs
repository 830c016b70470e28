//! Deterministic virtual-clock harness for engine tests
//!
//! Applies timer effects to an ordered map instead of a runtime, and fires
//! them in deadline order as time is advanced by hand. Every frame the
//! engine sends is stamped with the virtual time it went out at.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::time::Duration;

use arbiter_core::{
    AppId, ArbiterConfig, DisplayEngine, DisplayOutcome, DisplayRequest, RecordingSender, Step,
    Timer, TimerEffect, TimerFired, TimerId, VisibleState,
};
use tokio::time::Instant;

pub const CORE: &str = "org.augmentos.captions";
pub const DASHBOARD: &str = "org.augmentos.dashboard";

/// A frame as seen by the glasses
#[derive(Debug, Clone)]
pub struct SentFrame {
    /// Virtual time since the harness started
    pub at: Duration,
    /// Raw JSON text
    pub raw: String,
    /// Short human-readable rendering
    pub summary: String,
}

pub struct Harness {
    pub engine: DisplayEngine<RecordingSender>,
    pub recorder: RecordingSender,
    start: Instant,
    now: Instant,
    timers: BTreeMap<(Instant, TimerId), Timer>,
    frames: Vec<SentFrame>,
    seen: usize,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(
            ArbiterConfig::default().with_app_name("com.example.weather", "Weather"),
        )
    }

    pub fn with_config(config: ArbiterConfig) -> Self {
        let recorder = RecordingSender::new();
        let now = Instant::now();
        Self {
            engine: DisplayEngine::new(config, recorder.clone()),
            recorder,
            start: now,
            now,
            timers: BTreeMap::new(),
            frames: Vec::new(),
            seen: 0,
        }
    }

    pub fn start(&mut self, app: &str) {
        let step = self.engine.handle_app_start(AppId::from(app), self.now);
        self.absorb(step);
    }

    pub fn stop(&mut self, app: &str) {
        let step = self.engine.handle_app_stop(AppId::from(app), self.now);
        self.absorb(step);
    }

    pub fn display(&mut self, request: DisplayRequest) -> DisplayOutcome {
        let step = self.engine.handle_display_event(request, self.now);
        let outcome = step.outcome.clone().expect("display requests have an outcome");
        self.absorb(step);
        outcome
    }

    /// Text wall from `app`; `duration_ms` of `None` means persistent
    pub fn show(&mut self, app: &str, text: &str, duration_ms: Option<i64>) -> DisplayOutcome {
        let mut request = DisplayRequest::text_wall(app, text);
        if let Some(ms) = duration_ms {
            request = request.with_duration_ms(ms);
        }
        self.display(request)
    }

    /// Move the clock forward, firing every timer that comes due on the way
    pub fn advance(&mut self, by: Duration) {
        let target = self.now + by;
        loop {
            let Some((&(deadline, id), _)) = self.timers.iter().next() else {
                break;
            };
            if deadline > target {
                break;
            }
            let timer = self
                .timers
                .remove(&(deadline, id))
                .expect("timer present");
            self.now = deadline;
            let step = self.engine.handle_timer(TimerFired { id, timer }, self.now);
            self.absorb(step);
        }
        self.now = target;
    }

    pub fn advance_ms(&mut self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }

    pub fn teardown(&mut self) {
        let effects = self.engine.teardown();
        self.apply(effects);
    }

    pub fn elapsed(&self) -> Duration {
        self.now - self.start
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    pub fn has_pending(&self, matches: impl Fn(&Timer) -> bool) -> bool {
        self.timers.values().any(matches)
    }

    pub fn frames(&self) -> &[SentFrame] {
        &self.frames
    }

    pub fn summaries(&self) -> Vec<String> {
        self.frames.iter().map(|frame| frame.summary.clone()).collect()
    }

    pub fn last_summary(&self) -> Option<String> {
        self.frames.last().map(|frame| frame.summary.clone())
    }

    pub fn visible(&self) -> VisibleState {
        self.engine.visible_state()
    }

    fn absorb(&mut self, step: Step) {
        self.apply(step.effects);
        let recorded = self.recorder.frames();
        for raw in recorded.into_iter().skip(self.seen) {
            self.frames.push(SentFrame {
                at: self.now - self.start,
                summary: summarize(&raw),
                raw,
            });
            self.seen += 1;
        }
    }

    fn apply(&mut self, effects: Vec<TimerEffect>) {
        for effect in effects {
            match effect {
                TimerEffect::Schedule {
                    id,
                    deadline,
                    timer,
                } => {
                    self.timers.insert((deadline, id), timer);
                }
                TimerEffect::Cancel { id } => {
                    self.timers.retain(|(_, pending), _| *pending != id);
                }
            }
        }
    }
}

/// `app: text` for text walls, `app: title: text` for cards, `<clear>` for
/// the empty text wall
pub fn summarize(raw: &str) -> String {
    let frame: serde_json::Value = serde_json::from_str(raw).expect("frames are JSON");
    let app = frame["packageName"].as_str().unwrap_or_default();
    let layout = &frame["layout"];
    match layout["layoutType"].as_str() {
        Some("text_wall") if layout["text"] == "" => "<clear>".to_string(),
        Some("text_wall") => format!("{app}: {}", layout["text"].as_str().unwrap_or_default()),
        Some("reference_card") => format!(
            "{app}: {}: {}",
            layout["title"].as_str().unwrap_or_default(),
            layout["text"].as_str().unwrap_or_default()
        ),
        other => format!("{app}: {other:?}"),
    }
}
