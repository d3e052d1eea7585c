//! Replays an already-complete reply a couple of characters at a time.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

pub const DEFAULT_CADENCE: Duration = Duration::from_millis(50);
pub const MAX_STEP: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame<'a> {
    Partial(&'a str),
    /// Emitted once per pass, carrying the full text.
    Complete(&'a str),
    Idle,
}

/// Reveal cursor over a full text. Counts characters, so a multi-byte
/// character is never split.
#[derive(Debug, Clone)]
pub struct StreamingState {
    text: String,
    total: usize,
    revealed: usize,
    active: bool,
    completed: bool,
}

impl StreamingState {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let total = text.chars().count();
        Self {
            text,
            total,
            revealed: 0,
            active: true,
            completed: false,
        }
    }

    pub fn full_text(&self) -> &str {
        &self.text
    }

    pub fn revealed_len(&self) -> usize {
        self.revealed
    }

    pub fn total_len(&self) -> usize {
        self.total
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_complete(&self) -> bool {
        self.completed
    }

    /// What the renderer should show right now.
    pub fn visible(&self) -> &str {
        &self.text[..byte_offset(&self.text, self.revealed)]
    }

    pub fn advance(&mut self, step: usize) -> Frame<'_> {
        if !self.active || self.completed {
            return Frame::Idle;
        }
        self.revealed = (self.revealed + step.max(1)).min(self.total);
        if self.revealed == self.total {
            self.finish()
        } else {
            Frame::Partial(self.visible())
        }
    }

    /// Snaps to the full text; completes the pass if it had not completed yet.
    pub fn deactivate(&mut self) -> Frame<'_> {
        self.revealed = self.total;
        if self.completed {
            self.active = false;
            return Frame::Idle;
        }
        self.finish()
    }

    pub fn restart(&mut self, text: impl Into<String>) {
        *self = Self::new(text);
    }

    fn finish(&mut self) -> Frame<'_> {
        self.active = false;
        self.completed = true;
        Frame::Complete(&self.text)
    }
}

fn byte_offset(text: &str, chars: usize) -> usize {
    text.char_indices().nth(chars).map(|(i, _)| i).unwrap_or(text.len())
}

/// Receives the frames of a streaming pass.
pub trait Renderer: Send + 'static {
    fn render(&mut self, visible: &str);
    fn complete(&mut self, full: &str);
}

enum Control {
    Stop,
    Restart(String),
}

pub struct PresenterHandle {
    control: mpsc::UnboundedSender<Control>,
    task: JoinHandle<()>,
}

impl PresenterHandle {
    /// Shows the full text immediately.
    pub fn stop(&self) {
        let _ = self.control.send(Control::Stop);
    }

    /// Starts a new pass over `text` from the beginning.
    pub fn restart(&self, text: impl Into<String>) {
        let _ = self.control.send(Control::Restart(text.into()));
    }

    /// Lets the current pass run to the end, then shuts the presenter down.
    pub async fn join(self) {
        let PresenterHandle { control, task } = self;
        drop(control);
        let _ = task.await;
    }
}

pub struct Presenter;

impl Presenter {
    pub fn spawn<R: Renderer>(text: impl Into<String>, cadence: Duration, mut renderer: R) -> PresenterHandle {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut state = StreamingState::new(text);

        let task = tokio::spawn(async move {
            let mut rng = StdRng::from_entropy();
            let mut ticker = tokio::time::interval(cadence.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.reset();
            let mut control_open = true;

            loop {
                if !control_open && !state.is_active() {
                    break;
                }
                tokio::select! {
                    control = rx.recv(), if control_open => match control {
                        Some(Control::Stop) => {
                            if let Frame::Complete(full) = state.deactivate() {
                                renderer.render(full);
                                renderer.complete(full);
                            }
                        }
                        Some(Control::Restart(text)) => {
                            debug!(chars = text.chars().count(), "restarting pseudo-stream");
                            state.restart(text);
                            renderer.render("");
                            ticker.reset();
                        }
                        None => control_open = false,
                    },
                    _ = ticker.tick(), if state.is_active() => {
                        let step = rng.gen_range(1..=MAX_STEP);
                        match state.advance(step) {
                            Frame::Partial(visible) => renderer.render(visible),
                            Frame::Complete(full) => {
                                renderer.render(full);
                                renderer.complete(full);
                            }
                            Frame::Idle => {}
                        }
                    }
                }
            }
        });

        PresenterHandle { control: tx, task }
    }
}
