//! Debounced typing telemetry for the prompt field.
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::warn;

use super::EventCapture;

pub const TYPING_DEBOUNCE: Duration = Duration::from_millis(2000);

/// Keystrokes accumulated since the last typing event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypingBurst {
    pub started: Instant,
    pub keystrokes: u32,
    pub input_length: usize,
}

#[derive(Default)]
struct TypingState {
    burst: Option<TypingBurst>,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl TypingState {
    fn keystroke(&mut self, now: Instant, input_length: usize) -> u64 {
        let burst = self.burst.get_or_insert(TypingBurst {
            started: now,
            keystrokes: 0,
            input_length,
        });
        burst.keystrokes += 1;
        burst.input_length = input_length;
        self.generation += 1;
        self.generation
    }

    /// Hands out the burst only to the timer armed by the latest keystroke.
    fn take_if_current(&mut self, generation: u64) -> Option<TypingBurst> {
        if generation != self.generation {
            return None;
        }
        self.timer = None;
        self.burst.take()
    }

    fn cancel(&mut self) {
        self.generation += 1;
        self.burst = None;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

fn lock(state: &Mutex<TypingState>) -> MutexGuard<'_, TypingState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct TypingMonitor {
    state: Arc<Mutex<TypingState>>,
    capture: EventCapture,
    debounce: Duration,
}

impl TypingMonitor {
    pub fn new(capture: EventCapture) -> Self {
        Self::with_debounce(capture, TYPING_DEBOUNCE)
    }

    pub fn with_debounce(capture: EventCapture, debounce: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(TypingState::default())),
            capture,
            debounce,
        }
    }

    /// Records one keystroke; `input_length` is the field length after it.
    pub fn keystroke(&self, input_length: usize) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("No async runtime available; typing telemetry disabled");
                return;
            }
        };

        let mut state = lock(&self.state);
        let generation = state.keystroke(Instant::now(), input_length);
        if let Some(previous) = state.timer.take() {
            previous.abort();
        }

        let shared = self.state.clone();
        let capture = self.capture.clone();
        let debounce = self.debounce;
        state.timer = Some(handle.spawn(async move {
            tokio::time::sleep(debounce).await;
            let burst = lock(&shared).take_if_current(generation);
            if let Some(burst) = burst {
                capture.typing(
                    burst.input_length,
                    burst.started.elapsed().as_millis() as u64,
                    burst.keystrokes,
                );
            }
        }));
    }

    /// Drops the pending burst without emitting it.
    pub fn cancel(&self) {
        lock(&self.state).cancel();
    }

    pub fn pending_keystrokes(&self) -> u32 {
        lock(&self.state).burst.map(|b| b.keystrokes).unwrap_or(0)
    }
}

impl Drop for TypingMonitor {
    fn drop(&mut self) {
        self.cancel();
    }
}
