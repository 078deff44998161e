//! Ctrl-c escalation: the first press asks the engine to drain gracefully,
//! a second press while it's still draining escalates to cancelling
//! everything outstanding.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

#[derive(Debug, Default)]
pub struct ShutdownController {
    signals: AtomicU8,
}

#[derive(Debug, Clone, Copy)]
pub enum ShutdownEvent {
    /// First ctrl-c: stop accepting new work, let in-flight jobs finish.
    Graceful,
    /// A further ctrl-c while still draining: cancel everything outstanding.
    Immediate,
}

impl ShutdownController {
    /// Records one more ctrl-c press and classifies it.
    fn classify_signal(&self) -> ShutdownEvent {
        if self.signals.fetch_add(1, Ordering::SeqCst) == 0 {
            ShutdownEvent::Graceful
        } else {
            ShutdownEvent::Immediate
        }
    }
}

/// Spawn a task translating ctrl-c presses into `ShutdownEvent`s on
/// `shutdown_tx`. Stops listening once it has sent `Immediate` — there is
/// nothing further to escalate to.
pub fn spawn_ctrl_c_handler(shutdown: Arc<ShutdownController>, shutdown_tx: mpsc::UnboundedSender<ShutdownEvent>) {
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            let event = shutdown.classify_signal();
            let _ = shutdown_tx.send(event);
            if matches!(event, ShutdownEvent::Immediate) {
                return;
            }
        }
    });
}
