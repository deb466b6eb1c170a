//! Admin session guard.
//!
//! Gates the protected area behind a signed-in identity plus a verified
//! step-up code, then keeps the gate open only while the user is active.
//!
//! The guard is a three-state machine:
//!
//! - [`GuardPhase::Inactive`]: not tracking (no identity, not unlocked, or
//!   outside the protected area).
//! - [`GuardPhase::ActiveCounting`]: unlocked inside the protected area. A
//!   single tracker task owns the one-second countdown timer and the
//!   activity listener.
//! - [`GuardPhase::Locked`]: the idle window ran out (or the record vanished)
//!   and the user was redirected to the lock screen.
//!
//! The countdown is recomputed from the absolute expiry in the tab store on
//! every tick, never by decrementing a counter, so it self-corrects after
//! the process was suspended.
//!
//! Settings fetches and verifications carry a request ticket; a response
//! whose ticket is no longer the latest is discarded.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use backoffice_storage::TabStore;
use tokio::sync::{Mutex, Notify, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::VerifyError;
use crate::identity::{AuthState, IdentityProvider, SubjectId};
use crate::route::{Navigator, ProtectedArea};
use crate::session;
use crate::twofactor::{CodeVerifier, TwoFactorDirectory, TwoFactorStatus};

const DEFAULT_IDLE_WINDOW: Duration = Duration::from_secs(10 * 60);
const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_ACTIVITY_COALESCE: Duration = Duration::from_millis(500);
const DEFAULT_PROTECTED_PREFIX: &str = "/admin";
const DEFAULT_LOCK_PATH: &str = "/admin/locked";

/// Guard timing and routing configuration.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// Inactivity after which an unlocked session locks. Default: 10 minutes.
    pub idle_window: Duration,
    /// Countdown recompute interval. Default: 1 second.
    pub tick_interval: Duration,
    /// Activity within this window collapses into one expiry extension.
    /// Default: 500 ms.
    pub activity_coalesce: Duration,
    /// Route prefix of the protected area. Default: `/admin`.
    pub protected_prefix: String,
    /// The lock screen route. Default: `/admin/locked`.
    pub lock_path: String,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            idle_window: DEFAULT_IDLE_WINDOW,
            tick_interval: DEFAULT_TICK_INTERVAL,
            activity_coalesce: DEFAULT_ACTIVITY_COALESCE,
            protected_prefix: DEFAULT_PROTECTED_PREFIX.to_owned(),
            lock_path: DEFAULT_LOCK_PATH.to_owned(),
        }
    }
}

impl GuardConfig {
    fn idle_window_millis(&self) -> i64 {
        i64::try_from(self.idle_window.as_millis()).unwrap_or(i64::MAX)
    }
}

/// Observable phase of the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardPhase {
    Inactive,
    ActiveCounting,
    Locked,
}

/// A point-in-time copy of the guard's observable state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardSnapshot {
    pub phase: GuardPhase,
    pub is_unlocked: bool,
    pub remaining_seconds: Option<u64>,
    pub location: String,
    pub settings: Option<TwoFactorStatus>,
    pub settings_loading: bool,
}

/// The guard's external collaborators.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn TabStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub directory: Arc<dyn TwoFactorDirectory>,
    pub verifier: Arc<dyn CodeVerifier>,
    pub navigator: Arc<dyn Navigator>,
    pub clock: Arc<dyn Clock>,
}

/// The admin session guard.
///
/// Construct one per application instance and hand out clones; all clones
/// share the same state.
#[derive(Clone)]
pub struct SessionGuard {
    inner: Arc<Inner>,
}

struct Inner {
    config: GuardConfig,
    area: ProtectedArea,
    deps: Collaborators,
    state: Mutex<GuardState>,
    settings_ticket: AtomicU64,
    verify_ticket: AtomicU64,
    tracker_generation: AtomicU64,
}

struct GuardState {
    auth: AuthState,
    identity_epoch: u64,
    is_unlocked: bool,
    remaining_seconds: Option<u64>,
    settings: Option<TwoFactorStatus>,
    settings_loading: bool,
    location: String,
    return_to: Option<String>,
    phase: GuardPhase,
    tracker: Option<Tracker>,
}

/// Handle on the running tracker task. Dropping it stops the task.
struct Tracker {
    generation: u64,
    activity: Arc<Notify>,
    shutdown: watch::Sender<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickOutcome {
    Counting,
    Locked,
    Stale,
}

impl SessionGuard {
    /// Create a guard. The user starts at `location`; nothing is decided
    /// until the identity provider settles.
    #[must_use]
    pub fn new(config: GuardConfig, deps: Collaborators, location: impl Into<String>) -> Self {
        let area = ProtectedArea::new(config.protected_prefix.clone(), config.lock_path.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                area,
                deps,
                state: Mutex::new(GuardState {
                    auth: AuthState::Loading,
                    identity_epoch: 0,
                    is_unlocked: false,
                    remaining_seconds: None,
                    settings: None,
                    settings_loading: true,
                    location: location.into(),
                    return_to: None,
                    phase: GuardPhase::Inactive,
                    tracker: None,
                }),
                settings_ticket: AtomicU64::new(0),
                verify_ticket: AtomicU64::new(0),
                tracker_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Follow the identity provider until `shutdown` flips, then tear down.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut auth = self.inner.deps.identity.subscribe();
        info!("admin session guard started");

        loop {
            let current = auth.borrow_and_update().clone();
            self.apply_auth_state(current).await;

            tokio::select! {
                changed = auth.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        self.stop().await;
        info!("admin session guard stopped");
    }

    /// React to a new identity-provider state.
    ///
    /// `Loading` is recorded but decides nothing.
    pub async fn apply_auth_state(&self, auth: AuthState) {
        let settled_subject = {
            let mut st = self.inner.state.lock().await;
            if st.auth.subject() != auth.subject() {
                st.identity_epoch = st.identity_epoch.wrapping_add(1);
            }
            st.auth = auth;

            if !st.auth.is_settled() {
                return;
            }

            let subject = st.auth.subject().cloned();
            match &subject {
                Some(subject) => {
                    let now = self.now();
                    let expiry =
                        session::read_valid_expiry(self.store(), subject, now).await;
                    st.is_unlocked = expiry.is_some();
                    debug!(subject = %subject, unlocked = st.is_unlocked, "identity settled");
                }
                None => {
                    st.is_unlocked = false;
                    st.settings = None;
                    st.settings_loading = false;
                    session::clear(self.store()).await;
                    debug!("identity settled: signed out");
                }
            }
            self.reconcile(&mut st).await;
            subject
        };

        if settled_subject.is_some() {
            self.refetch_2fa_settings().await;
        }
    }

    /// Tell the guard the user moved to `path`.
    pub async fn navigate(&self, path: impl Into<String>) {
        let mut st = self.inner.state.lock().await;
        st.location = path.into();
        self.reconcile(&mut st).await;
    }

    /// Report user activity. Bursts are coalesced into one expiry
    /// extension per [`GuardConfig::activity_coalesce`].
    pub async fn record_activity(&self) {
        let st = self.inner.state.lock().await;
        if let Some(tracker) = &st.tracker {
            tracker.activity.notify_one();
        }
    }

    /// True iff a valid session record exists for the current identity.
    pub async fn is_authenticated(&self) -> bool {
        let mut st = self.inner.state.lock().await;
        let Some(subject) = st.auth.subject().cloned() else {
            return false;
        };
        let valid = session::read_valid_expiry(self.store(), &subject, self.now())
            .await
            .is_some();
        if !valid {
            st.is_unlocked = false;
        }
        st.is_unlocked && valid
    }

    /// Seconds left in the idle window, while counting down.
    pub async fn remaining_seconds(&self) -> Option<u64> {
        self.inner.state.lock().await.remaining_seconds
    }

    pub async fn phase(&self) -> GuardPhase {
        self.inner.state.lock().await.phase
    }

    /// The last fetched 2FA projection.
    pub async fn settings(&self) -> Option<TwoFactorStatus> {
        self.inner.state.lock().await.settings.clone()
    }

    pub async fn snapshot(&self) -> GuardSnapshot {
        let st = self.inner.state.lock().await;
        GuardSnapshot {
            phase: st.phase,
            is_unlocked: st.is_unlocked,
            remaining_seconds: st.remaining_seconds,
            location: st.location.clone(),
            settings: st.settings.clone(),
            settings_loading: st.settings_loading,
        }
    }

    /// Submit a step-up code.
    ///
    /// # Errors
    ///
    /// - [`VerifyError::SettingsUnavailable`] without an identity or settings.
    /// - [`VerifyError::AccountBlocked`] if the projection says blocked; no
    ///   request is sent.
    /// - [`VerifyError::NoSession`] without an access token.
    /// - [`VerifyError::Rejected`] if the endpoint refused the code.
    /// - [`VerifyError::Transport`] on network or decoding failure.
    /// - [`VerifyError::Superseded`] if a newer attempt or identity change
    ///   overtook this one.
    pub async fn verify_code(&self, code: &str) -> Result<(), VerifyError> {
        let ticket = next_ticket(&self.inner.verify_ticket);

        let (subject, epoch) = {
            let st = self.inner.state.lock().await;
            let (Some(subject), Some(settings)) = (st.auth.subject(), st.settings.as_ref())
            else {
                return Err(VerifyError::SettingsUnavailable);
            };
            if settings.is_blocked {
                return Err(VerifyError::AccountBlocked);
            }
            (subject.clone(), st.identity_epoch)
        };

        let Some(token) = self.inner.deps.identity.access_token().await else {
            return Err(VerifyError::NoSession);
        };

        let response = match self.inner.deps.verifier.verify(&token, code).await {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, "2FA verification request failed");
                return Err(VerifyError::Transport);
            }
        };

        if self.inner.verify_ticket.load(Ordering::SeqCst) != ticket {
            debug!(ticket, "discarding superseded verification result");
            return Err(VerifyError::Superseded);
        }

        if !response.success {
            self.refetch_2fa_settings().await;
            info!(subject = %subject, "2FA code rejected");
            return Err(VerifyError::Rejected {
                message: response
                    .error
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| "verification failed".to_owned()),
            });
        }

        let mut st = self.inner.state.lock().await;
        if st.identity_epoch != epoch {
            debug!("identity changed during verification, discarding success");
            return Err(VerifyError::Superseded);
        }

        st.is_unlocked = true;
        let now = self.now();
        let expires_at = now.saturating_add(self.inner.config.idle_window_millis());
        session::save(self.store(), &subject, expires_at).await;
        st.remaining_seconds = Some(session::remaining_seconds(expires_at, now));
        info!(subject = %subject, "admin session unlocked");

        if self.inner.area.is_lock_screen(&st.location) {
            if let Some(back) = st.return_to.take() {
                let from = std::mem::replace(&mut st.location, back);
                self.inner.deps.navigator.redirect(&st.location, &from);
            }
        }
        self.reconcile(&mut st).await;
        Ok(())
    }

    /// Lock the session and send the user to the lock screen.
    ///
    /// Does nothing outside the protected area or when already on the lock
    /// screen, so repeated calls are harmless.
    pub async fn lock(&self) {
        let mut st = self.inner.state.lock().await;
        self.lock_locked(&mut st).await;
    }

    /// Re-read the 2FA projection for the current identity.
    pub async fn refetch_2fa_settings(&self) {
        let ticket = next_ticket(&self.inner.settings_ticket);

        let subject = {
            let mut st = self.inner.state.lock().await;
            match st.auth.subject().cloned() {
                Some(subject) => {
                    st.settings_loading = true;
                    subject
                }
                None => {
                    if st.auth.is_settled() {
                        st.settings = None;
                        st.settings_loading = false;
                    }
                    return;
                }
            }
        };

        let result = self.inner.deps.directory.fetch_status(&subject).await;

        let mut st = self.inner.state.lock().await;
        if self.inner.settings_ticket.load(Ordering::SeqCst) != ticket
            || st.auth.subject() != Some(&subject)
        {
            debug!(ticket, "discarding stale 2FA settings response");
            return;
        }

        st.settings = match result {
            Ok(settings) => settings,
            Err(e) => {
                warn!(subject = %subject, error = %e, "failed to fetch 2FA settings");
                None
            }
        };
        st.settings_loading = false;
    }

    /// Stop tracking without touching the session record (teardown).
    pub async fn stop(&self) {
        let mut st = self.inner.state.lock().await;
        if let Some(tracker) = st.tracker.take() {
            let _ = tracker.shutdown.send(true);
        }
        st.remaining_seconds = None;
        if st.phase == GuardPhase::ActiveCounting {
            st.phase = GuardPhase::Inactive;
        }
    }

    // --- Private ---

    fn store(&self) -> &dyn TabStore {
        self.inner.deps.store.as_ref()
    }

    fn now(&self) -> i64 {
        self.inner.deps.clock.now_millis()
    }

    /// Bring the tracker in line with identity, unlock state and location.
    async fn reconcile(&self, st: &mut GuardState) {
        let subject = st.auth.subject().cloned();
        let inside = self.inner.area.is_protected(&st.location);
        let should_track = st.is_unlocked && inside && subject.is_some();

        if let (true, Some(subject)) = (should_track, subject) {
            if st.tracker.is_some() {
                return;
            }
            let now = self.now();
            if session::read_valid_expiry(self.store(), &subject, now)
                .await
                .is_some()
            {
                // Entering the protected area counts as activity.
                let expires_at = now.saturating_add(self.inner.config.idle_window_millis());
                session::save(self.store(), &subject, expires_at).await;
                st.remaining_seconds = Some(session::remaining_seconds(expires_at, now));
                st.tracker = Some(self.spawn_tracker());
                st.phase = GuardPhase::ActiveCounting;
                info!(subject = %subject, path = %st.location, "idle countdown started");
                return;
            }
            st.is_unlocked = false;
            debug!(subject = %subject, "session record gone before entry, code required");
        }

        if let Some(tracker) = st.tracker.take() {
            let _ = tracker.shutdown.send(true);
            st.is_unlocked = false;
            session::clear(self.store()).await;
            info!(path = %st.location, "left protected area, admin session closed");
        }
        st.remaining_seconds = None;
        st.phase = if st.phase == GuardPhase::Locked && self.inner.area.is_lock_screen(&st.location)
        {
            GuardPhase::Locked
        } else {
            GuardPhase::Inactive
        };
    }

    async fn lock_locked(&self, st: &mut GuardState) -> bool {
        if !self.inner.area.is_protected(&st.location) {
            return false;
        }

        st.is_unlocked = false;
        st.remaining_seconds = None;
        session::clear(self.store()).await;

        let lock_path = self.inner.area.lock_path().to_owned();
        let from = std::mem::replace(&mut st.location, lock_path);
        st.return_to = Some(from.clone());
        st.phase = GuardPhase::Locked;
        if let Some(tracker) = st.tracker.take() {
            let _ = tracker.shutdown.send(true);
        }

        self.inner.deps.navigator.redirect(&st.location, &from);
        info!(from = %from, "admin session locked");
        true
    }

    fn spawn_tracker(&self) -> Tracker {
        let generation = next_ticket(&self.inner.tracker_generation);
        let activity = Arc::new(Notify::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let guard = self.clone();
        let listener = Arc::clone(&activity);
        tokio::spawn(async move {
            guard.track(generation, listener, shutdown_rx).await;
        });

        Tracker {
            generation,
            activity,
            shutdown: shutdown_tx,
        }
    }

    /// The tracker task: one countdown timer plus the coalescing activity
    /// listener. Exits on shutdown, on lock, or when superseded; a task that
    /// exits on its own releases its handle.
    async fn track(
        &self,
        generation: u64,
        activity: Arc<Notify>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(self.inner.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut flush_at: Option<Instant> = None;
        debug!(generation, "tracker started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if self.tick(generation).await != TickOutcome::Counting {
                        break;
                    }
                }
                () = activity.notified() => {
                    if flush_at.is_none() {
                        flush_at = Some(Instant::now() + self.inner.config.activity_coalesce);
                    }
                }
                () = tokio::time::sleep_until(flush_at.unwrap_or_else(Instant::now)), if flush_at.is_some() => {
                    flush_at = None;
                    self.extend(generation).await;
                }
            }
        }

        let mut st = self.inner.state.lock().await;
        if is_current(st.tracker.as_ref(), generation) {
            st.tracker = None;
            st.remaining_seconds = None;
            if st.phase == GuardPhase::ActiveCounting {
                st.phase = GuardPhase::Inactive;
            }
        }
        debug!(generation, "tracker stopped");
    }

    async fn tick(&self, generation: u64) -> TickOutcome {
        let mut st = self.inner.state.lock().await;
        if !is_current(st.tracker.as_ref(), generation) {
            return TickOutcome::Stale;
        }
        if !st.auth.is_settled() {
            // Identity is reloading: hold the countdown until it settles.
            return TickOutcome::Counting;
        }
        let Some(subject) = st.auth.subject().cloned() else {
            return TickOutcome::Stale;
        };

        let now = self.now();
        let Some(expires_at) = session::read_valid_expiry(self.store(), &subject, now).await else {
            self.lock_locked(&mut st).await;
            return TickOutcome::Locked;
        };

        let remaining = session::remaining_seconds(expires_at, now);
        st.remaining_seconds = Some(remaining);
        if remaining == 0 {
            self.lock_locked(&mut st).await;
            return TickOutcome::Locked;
        }
        TickOutcome::Counting
    }

    async fn extend(&self, generation: u64) {
        let mut st = self.inner.state.lock().await;
        if !is_current(st.tracker.as_ref(), generation) || !st.is_unlocked {
            return;
        }
        let Some(subject) = st.auth.subject().cloned() else {
            return;
        };
        let now = self.now();
        let expires_at = now.saturating_add(self.inner.config.idle_window_millis());
        if session::save(self.store(), &subject, expires_at).await.is_some() {
            st.remaining_seconds = Some(session::remaining_seconds(expires_at, now));
            debug!(subject = %subject, expires_at, "idle window extended");
        }
    }
}

impl std::fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGuard")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

fn next_ticket(counter: &AtomicU64) -> u64 {
    counter.fetch_add(1, Ordering::SeqCst).wrapping_add(1)
}

fn is_current(tracker: Option<&Tracker>, generation: u64) -> bool {
    tracker.is_some_and(|t| t.generation == generation)
}
