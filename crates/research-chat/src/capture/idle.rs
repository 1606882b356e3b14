//! Idle detection.
//!
//! One timer shared by all activity signals. When it fires the participant is
//! idle until the next signal; a long idle stretch produces exactly one
//! `idleStart` and one `idleEnd`.
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::EventCapture;

pub const IDLE_THRESHOLD: Duration = Duration::from_millis(60_000);

/// Signals that count as participant activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivitySignal {
    PointerDown,
    KeyDown,
    Scroll,
    TouchStart,
}

impl ActivitySignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivitySignal::PointerDown => "pointerdown",
            ActivitySignal::KeyDown => "keydown",
            ActivitySignal::Scroll => "scroll",
            ActivitySignal::TouchStart => "touchstart",
        }
    }
}

impl fmt::Display for ActivitySignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleTransition {
    Started { at_ms: u64 },
    Ended { at_ms: u64, idle_duration_ms: u64 },
}

/// Idle flag plus when it was raised; times are milliseconds on any monotonic scale.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdleState {
    idle_since: Option<u64>,
}

impl IdleState {
    pub fn is_idle(&self) -> bool {
        self.idle_since.is_some()
    }

    pub fn on_timeout(&mut self, now_ms: u64) -> Option<IdleTransition> {
        if self.idle_since.is_some() {
            return None;
        }
        self.idle_since = Some(now_ms);
        Some(IdleTransition::Started { at_ms: now_ms })
    }

    pub fn on_activity(&mut self, now_ms: u64) -> Option<IdleTransition> {
        self.idle_since.take().map(|since| IdleTransition::Ended {
            at_ms: now_ms,
            idle_duration_ms: now_ms.saturating_sub(since),
        })
    }
}

/// Idle transitions produced by a sorted activity timeline.
///
/// The first timestamp is when monitoring began. A gap of at least
/// `threshold` yields a start at `previous + threshold` and an end at the
/// next activity. Idleness after the last timestamp is not reported.
pub fn replay_idle(activity_ms: &[u64], threshold: Duration) -> Vec<IdleTransition> {
    let threshold_ms = threshold.as_millis() as u64;
    let mut state = IdleState::default();
    let mut transitions = Vec::new();
    let mut previous: Option<u64> = None;

    for &at in activity_ms {
        if let Some(prev) = previous {
            if at.saturating_sub(prev) >= threshold_ms {
                transitions.extend(state.on_timeout(prev + threshold_ms));
            }
        }
        transitions.extend(state.on_activity(at));
        previous = Some(at);
    }
    transitions
}

struct MonitorState {
    idle: IdleState,
    generation: u64,
    timer: Option<JoinHandle<()>>,
    running: bool,
    epoch: Instant,
}

impl MonitorState {
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

fn lock(state: &Mutex<MonitorState>) -> MutexGuard<'_, MonitorState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct IdleMonitor {
    state: Arc<Mutex<MonitorState>>,
    capture: EventCapture,
    threshold: Duration,
}

impl IdleMonitor {
    pub fn new(capture: EventCapture) -> Self {
        Self::with_threshold(capture, IDLE_THRESHOLD)
    }

    pub fn with_threshold(capture: EventCapture, threshold: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(MonitorState {
                idle: IdleState::default(),
                generation: 0,
                timer: None,
                running: false,
                epoch: Instant::now(),
            })),
            capture,
            threshold,
        }
    }

    pub fn start(&self) {
        let mut state = lock(&self.state);
        state.running = true;
        self.arm(&mut state);
    }

    pub fn activity(&self, signal: ActivitySignal) {
        let mut state = lock(&self.state);
        if !state.running {
            return;
        }
        let now = state.now_ms();
        if let Some(IdleTransition::Ended { idle_duration_ms, .. }) = state.idle.on_activity(now) {
            debug!("Idle ended by {} after {}ms", signal, idle_duration_ms);
            self.capture.idle_end(idle_duration_ms, signal);
        }
        self.arm(&mut state);
    }

    pub fn stop(&self) {
        let mut state = lock(&self.state);
        state.running = false;
        state.generation += 1;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
    }

    pub fn is_idle(&self) -> bool {
        lock(&self.state).idle.is_idle()
    }

    fn arm(&self, state: &mut MonitorState) {
        state.generation += 1;
        if let Some(previous) = state.timer.take() {
            previous.abort();
        }

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("No async runtime available; idle detection disabled");
                return;
            }
        };
        let generation = state.generation;
        let shared = self.state.clone();
        let capture = self.capture.clone();
        let threshold = self.threshold;
        state.timer = Some(handle.spawn(async move {
            tokio::time::sleep(threshold).await;
            let mut state = lock(&shared);
            if state.generation != generation || !state.running {
                return;
            }
            state.timer = None;
            let now = state.now_ms();
            if state.idle.on_timeout(now).is_some() {
                capture.idle_start();
            }
        }));
    }
}

impl Drop for IdleMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
