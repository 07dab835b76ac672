//! Cooperative cancellation for updates
//!
//! A [`CancelHandle`] flips a `watch` channel; every [`CancelSignal`]
//! cloned from it observes the flip. A signal may also carry a deadline,
//! which is how the engine's global sync timeout is enforced.

use tokio::sync::watch;
use tokio::time::Instant;

/// Why a signal fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The handle was triggered
    Cancelled,
    /// The deadline passed
    TimedOut,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelReason::Cancelled => f.write_str("cancelled"),
            CancelReason::TimedOut => f.write_str("timed out"),
        }
    }
}

/// Triggers cancellation of every derived signal
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Create a handle and its first signal
    pub fn new() -> (Self, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (
            Self { tx },
            CancelSignal {
                rx: Some(rx),
                deadline: None,
            },
        )
    }

    /// Cancel all derived signals
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Another signal observing this handle
    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: Some(self.tx.subscribe()),
            deadline: None,
        }
    }
}

/// Observer side of a [`CancelHandle`]
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    rx: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

impl CancelSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        Self::default()
    }

    /// The same signal, additionally firing at `deadline`
    ///
    /// An earlier existing deadline is kept.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    /// Non-blocking check
    pub fn reason(&self) -> Option<CancelReason> {
        if self.rx.as_ref().is_some_and(|rx| *rx.borrow()) {
            return Some(CancelReason::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Some(CancelReason::TimedOut);
        }
        None
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    /// Resolve once the signal fires
    ///
    /// Pends forever if the handle is dropped without cancelling and no
    /// deadline is set.
    pub async fn cancelled(&self) -> CancelReason {
        let handle_fired = async {
            match self.rx.clone() {
                Some(mut rx) => {
                    let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
                    if closed {
                        std::future::pending::<()>().await;
                    }
                }
                None => std::future::pending::<()>().await,
            }
        };
        let deadline_passed = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = handle_fired => CancelReason::Cancelled,
            _ = deadline_passed => CancelReason::TimedOut,
        }
    }
}
