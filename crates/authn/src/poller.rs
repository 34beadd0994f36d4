//! Background key announcement poller.
//!
//! After a rotation on any process, the new kid is written to
//! `auth:keys:announce`. Each process runs a [`KeyPoller`] that reads the
//! announcement on a fixed interval and hands unseen kids to
//! [`TokenManager::accept_announced_key`]. Every iteration is isolated:
//! errors are logged and counted, and the loop keeps running until
//! [`shutdown`](KeyPoller::shutdown).

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use keyward_storage::CoordinationStore;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
    bootstrap::ANNOUNCE_KEY,
    error::{AuthError, Result},
    manager::{KeyIntake, TokenManager},
};

/// What one poll iteration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// No announcement is present.
    NoAnnouncement,
    /// The announced kid is already the signing key, or was taken in by an
    /// earlier iteration.
    Unchanged,
    /// The announced key was taken in.
    Accepted {
        /// Announced kid.
        kid: String,
        /// How it was taken in.
        intake: KeyIntake,
    },
}

#[derive(Debug, Default)]
struct PollerState {
    iterations: AtomicU64,
    promotions: AtomicU64,
    errors: AtomicU64,
    /// Last announced kid taken in, so a rotated-out or expired
    /// announcement is loaded once rather than on every tick.
    last_handled: Mutex<Option<String>>,
}

/// Cancellable background task that follows key announcements.
pub struct KeyPoller {
    manager: Arc<TokenManager>,
    coordination: Arc<dyn CoordinationStore>,
    state: Arc<PollerState>,
    cancel_token: CancellationToken,
    handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl fmt::Debug for KeyPoller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPoller")
            .field("iterations", &self.iterations())
            .field("promotions", &self.promotions())
            .field("errors", &self.errors())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl KeyPoller {
    /// Creates a poller without starting it. Use [`poll_once`](Self::poll_once)
    /// to drive it by hand, or [`spawn`](Self::spawn) to run it in the
    /// background.
    #[must_use]
    pub fn new(manager: Arc<TokenManager>, coordination: Arc<dyn CoordinationStore>) -> Self {
        Self {
            manager,
            coordination,
            state: Arc::new(PollerState::default()),
            cancel_token: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    /// Creates a poller and starts its background loop at `interval`.
    ///
    /// # Panics
    ///
    /// Must be called within a Tokio runtime context.
    #[must_use]
    pub fn spawn(
        manager: Arc<TokenManager>,
        coordination: Arc<dyn CoordinationStore>,
        interval: Duration,
    ) -> Self {
        let poller = Self::new(manager, coordination);
        poller.start(interval);
        poller
    }

    fn start(&self, interval: Duration) {
        let manager = Arc::clone(&self.manager);
        let coordination = Arc::clone(&self.coordination);
        let state = Arc::clone(&self.state);
        let token = self.cancel_token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; consume it so we start
            // with a full interval wait.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::info!("key poller shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let _ = Self::run_iteration(&manager, &*coordination, &state).await;
                    }
                }
            }
        });

        *self.handle.lock() = Some(handle);
    }

    /// Runs one iteration in the caller's task.
    ///
    /// Counters are updated exactly as for a background iteration.
    ///
    /// # Errors
    ///
    /// Returns the iteration's error; the background loop logs these
    /// instead.
    pub async fn poll_once(&self) -> Result<PollOutcome> {
        Self::run_iteration(&self.manager, &*self.coordination, &self.state).await
    }

    async fn run_iteration(
        manager: &TokenManager,
        coordination: &dyn CoordinationStore,
        state: &PollerState,
    ) -> Result<PollOutcome> {
        let result = Self::check_announcement(manager, coordination, state).await;
        state.iterations.fetch_add(1, Ordering::Relaxed);

        match &result {
            Ok(PollOutcome::Accepted { kid, intake: KeyIntake::Promoted }) => {
                state.promotions.fetch_add(1, Ordering::Relaxed);
                tracing::info!(kid = %kid, "key poller promoted announced key");
            },
            Ok(outcome) => tracing::debug!(?outcome, "key poll complete"),
            Err(err) => {
                state.errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %err, "key poll failed");
            },
        }
        result
    }

    async fn check_announcement(
        manager: &TokenManager,
        coordination: &dyn CoordinationStore,
        state: &PollerState,
    ) -> Result<PollOutcome> {
        let Some(kid) =
            coordination.get(ANNOUNCE_KEY).await.map_err(AuthError::CoordinationStoreUnavailable)?
        else {
            return Ok(PollOutcome::NoAnnouncement);
        };

        if manager.keys().latest_kid().as_deref() == Some(kid.as_str())
            || state.last_handled.lock().as_deref() == Some(kid.as_str())
        {
            return Ok(PollOutcome::Unchanged);
        }

        let intake = manager.accept_announced_key(&kid).await?;
        *state.last_handled.lock() = Some(kid.clone());
        Ok(PollOutcome::Accepted { kid, intake })
    }

    /// Stops the background loop, if running, and waits for it to exit.
    pub async fn shutdown(&self) {
        self.cancel_token.cancel();
        // Take the handle so we can await it without holding the lock.
        let handle = self.handle.lock().take();
        if let Some(handle) = handle
            && let Err(err) = handle.await
        {
            tracing::warn!(error = %err, "key poller task panicked");
        }
    }

    /// Returns `true` while the background loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.lock().as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Returns the cancellation token of the background loop.
    ///
    /// Callers can use this to integrate with external shutdown signals.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    /// Completed iterations, successful or not.
    #[must_use]
    pub fn iterations(&self) -> u64 {
        self.state.iterations.load(Ordering::Relaxed)
    }

    /// Iterations that promoted a new signing key.
    #[must_use]
    pub fn promotions(&self) -> u64 {
        self.state.promotions.load(Ordering::Relaxed)
    }

    /// Iterations that failed.
    #[must_use]
    pub fn errors(&self) -> u64 {
        self.state.errors.load(Ordering::Relaxed)
    }
}

impl Drop for KeyPoller {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
