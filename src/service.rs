//! Background service task: a single `select!` loop that owns all async I/O.
//!
//! The service receives [`UiEvent`]s from the UI thread, calls the payment
//! API, and sends [`ServiceEvent`]s back. It also owns the session's three
//! periodic concerns: the one-second countdown tick, and the five-second
//! reconciliation poll (run single-flight on a spawned task). Both timers
//! live in [`SessionTimers`], which exists only while the popup is open, so
//! closing the popup cancels everything at once and no timer can outlive its
//! session. A poll that completes after its session was cleared or replaced
//! is discarded, never applied.

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use chrono::Utc;
use std::time::Duration;

use crate::auth::{AuthBlob, AuthStore};
use crate::client::{parse_pending_id, ApiClient, ApiError, Profile, TransactionRecord};
use crate::config::Config;
use crate::countdown::DEFAULT_TTL_SECONDS;
use crate::events::{ServiceEvent, UiEvent};
use crate::reconcile::{reconcile, Reconciliation, POLL_INTERVAL_SECONDS};
use crate::session::{remaining_ttl, PaymentSession};

type PollHandle = tokio::task::JoinHandle<Result<Vec<TransactionRecord>, ApiError>>;

/// Notice shown exactly once when polling discovers the server ended the
/// active transaction.
const TRANSACTION_ENDED_NOTICE: &str =
    "The pending transaction has expired or failed. You can now create a new transaction.";

/// Which periodic timer fired.
enum TimerFire {
    Second,
    Poll,
}

/// The session's periodic timers. Dropped as one unit when the popup closes.
struct SessionTimers {
    second: tokio::time::Interval,
    poll: tokio::time::Interval,
}

impl SessionTimers {
    fn start() -> Self {
        let tick = Duration::from_secs(1);
        let mut second = tokio::time::interval_at(tokio::time::Instant::now() + tick, tick);
        second.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let poll_period = Duration::from_secs(POLL_INTERVAL_SECONDS);
        let mut poll =
            tokio::time::interval_at(tokio::time::Instant::now() + poll_period, poll_period);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        Self { second, poll }
    }
}

/// Run the service loop until the cancellation token fires.
///
/// This is the **only** `tokio::spawn`ed loop in the application. It owns the
/// API client, the persisted auth blob, and the payment session.
pub async fn run(
    token: CancellationToken,
    mut ui_rx: mpsc::UnboundedReceiver<UiEvent>,
    svc_tx: mpsc::UnboundedSender<ServiceEvent>,
    config: Config,
) {
    let mut state = ServiceState {
        svc_tx,
        client: ApiClient::new(config.api_base.clone()),
        auth_store: AuthStore::new(config.auth_blob_path()),
        auth_token: None,
        profile: None,
        session: None,
    };
    let mut timers: Option<SessionTimers> = None;
    let mut poll_inflight: Option<(u64, PollHandle)> = None;

    restore_persisted_login(&mut state).await;

    log::info!("🚀 Service loop started ({})", state.client.base_url());

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                log::info!("🛑 Service loop shutting down");
                break;
            }

            // Session timers: one-second countdown tick and five-second poll
            fire = async {
                match timers {
                    Some(ref mut t) => tokio::select! {
                        _ = t.second.tick() => TimerFire::Second,
                        _ = t.poll.tick() => TimerFire::Poll,
                    },
                    None => std::future::pending().await,
                }
            } => match fire {
                TimerFire::Second => {
                    let mut auto_closed = false;
                    if let Some(session) = state.session.as_mut() {
                        auto_closed = session.tick();
                    }
                    if auto_closed {
                        log::info!("⏱️ OTP expired while minimized, popup auto-closed");
                        timers = None;
                        abort_poll(&mut poll_inflight);
                    }
                    state.send_view();
                }
                TimerFire::Poll => {
                    if poll_inflight.is_none() {
                        if let (Some(tok), Some(session)) =
                            (state.auth_token.clone(), state.session.as_ref())
                        {
                            let client = state.client.clone();
                            let id = session.id();
                            poll_inflight = Some((
                                id,
                                tokio::spawn(async move { client.history(&tok).await }),
                            ));
                        }
                    }
                }
            },

            // Reconciliation poll completes in the background
            Some(result) = async {
                match poll_inflight {
                    Some((_, ref mut handle)) => Some(handle.await),
                    None => std::future::pending().await,
                }
            } => {
                let polled_id = poll_inflight.take().map(|(id, _)| id);
                match result {
                    Ok(Ok(records)) => {
                        let current_id = state.session.as_ref().map(|s| s.id());
                        match polled_id {
                            Some(id) if Some(id) == current_id => {
                                apply_reconciliation(
                                    &mut state,
                                    &mut timers,
                                    &mut poll_inflight,
                                    id,
                                    &records,
                                );
                            }
                            _ => log::debug!("Discarding poll result for a stale session"),
                        }
                    }
                    // Best-effort consistency: swallow and retry next tick
                    Ok(Err(e)) => log::debug!("Reconciliation poll failed: {}", e),
                    Err(e) => log::debug!("Reconciliation poll task failed: {}", e),
                }
            }

            Some(event) = ui_rx.recv() => {
                if handle_ui_event(&mut state, &mut timers, &mut poll_inflight, event).await {
                    break;
                }
            }
        }
    }

    abort_poll(&mut poll_inflight);
    log::info!("👋 Service loop exited");
}

/// Mutable state owned by the service loop.
struct ServiceState {
    svc_tx: mpsc::UnboundedSender<ServiceEvent>,
    client: ApiClient,
    auth_store: AuthStore,
    auth_token: Option<String>,
    profile: Option<Profile>,
    session: Option<PaymentSession>,
}

impl ServiceState {
    fn send(&self, event: ServiceEvent) {
        let _ = self.svc_tx.send(event);
    }

    /// Push a fresh popup snapshot to the UI.
    fn send_view(&self) {
        if let Some(session) = &self.session {
            self.send(ServiceEvent::OtpUpdated(session.view()));
        }
    }

    fn persist_auth(&self) {
        if let (Some(token), Some(profile)) = (&self.auth_token, &self.profile) {
            let blob = AuthBlob {
                token: token.clone(),
                profile: profile.clone(),
            };
            if let Err(e) = self.auth_store.save(&blob) {
                log::warn!("Failed to persist auth blob: {}", e);
            }
        }
    }
}

/// Load the persisted login, then resync the profile against the server
/// (authoritative for balance); the cached copy survives a failed resync.
async fn restore_persisted_login(state: &mut ServiceState) {
    let blob = match state.auth_store.load() {
        Ok(Some(blob)) => blob,
        Ok(None) => return,
        Err(e) => {
            log::warn!("Failed to read persisted auth blob: {}", e);
            return;
        }
    };

    log::info!("🔐 Restored session for {}", blob.profile.full_name);
    state.auth_token = Some(blob.token);
    state.profile = Some(blob.profile.clone());
    state.send(ServiceEvent::LoggedIn {
        profile: blob.profile,
    });

    if let Some(token) = state.auth_token.clone() {
        match state.client.me(&token).await {
            Ok(profile) => {
                state.profile = Some(profile.clone());
                state.persist_auth();
                state.send(ServiceEvent::ProfileSynced(profile));
            }
            Err(e) => log::warn!("⚠️ Profile resync failed, using cached profile: {}", e),
        }
    }
}

/// Handle one UI event. Returns `true` on shutdown.
async fn handle_ui_event(
    state: &mut ServiceState,
    timers: &mut Option<SessionTimers>,
    poll_inflight: &mut Option<(u64, PollHandle)>,
    event: UiEvent,
) -> bool {
    match event {
        UiEvent::Shutdown => return true,

        UiEvent::Login { username, password } => {
            match state.client.login(&username, &password).await {
                Ok(resp) => {
                    log::info!("🔐 Logged in as {}", resp.profile.full_name);
                    clear_session(state, timers, poll_inflight, None);
                    state.auth_token = Some(resp.token);
                    state.profile = Some(resp.profile.clone());
                    state.persist_auth();
                    state.send(ServiceEvent::LoggedIn {
                        profile: resp.profile,
                    });
                    match resp.pending_transaction_id {
                        Some(id) => resume_pending(state, timers, id).await,
                        None => state.send(ServiceEvent::Notice("Login successful".to_string())),
                    }
                }
                Err(e) => state.send(ServiceEvent::Error(e.to_string())),
            }
        }

        UiEvent::Logout => {
            clear_session(state, timers, poll_inflight, None);
            state.auth_token = None;
            state.profile = None;
            if let Err(e) = state.auth_store.clear() {
                log::warn!("Failed to clear auth blob: {}", e);
            }
            state.send(ServiceEvent::LoggedOut);
        }

        UiEvent::LookupTuition { student_id } => {
            let Some(token) = state.auth_token.clone() else {
                return false;
            };
            match state.client.lookup_tuition(&token, &student_id).await {
                Ok(info) => state.send(ServiceEvent::TuitionLoaded(info)),
                // Lookup fires while the user types: failures stay silent
                Err(e) => log::debug!("Tuition lookup failed: {}", e),
            }
        }

        UiEvent::InitiatePayment { student_id } => {
            let Some(token) = state.auth_token.clone() else {
                return false;
            };
            // At most one active transaction: a second initiate becomes a
            // resend for the existing one
            if let Some(id) = state.session.as_ref().map(|s| s.id()) {
                resend_for_existing(state, timers, &token, id).await;
            } else {
                initiate_payment(state, timers, &token, &student_id).await;
            }
        }

        UiEvent::TypeDigit { slot, input } => {
            let submit = state
                .session
                .as_mut()
                .and_then(|s| s.type_digit(slot, &input));
            state.send_view();
            if let Some(code) = submit {
                confirm_payment(state, timers, poll_inflight, code).await;
            }
        }

        UiEvent::Backspace { slot } => {
            if let Some(session) = state.session.as_mut() {
                session.backspace(slot);
            }
            state.send_view();
        }

        UiEvent::Paste { text } => {
            let submit = state.session.as_mut().and_then(|s| s.paste(&text));
            state.send_view();
            if let Some(code) = submit {
                confirm_payment(state, timers, poll_inflight, code).await;
            }
        }

        UiEvent::ResendOtp => {
            let Some(token) = state.auth_token.clone() else {
                return false;
            };
            let (id, allowed) = match state.session.as_mut() {
                Some(session) => (session.id(), session.begin_resend()),
                None => return false,
            };
            if !allowed {
                // Cooldown running or resend already in flight: silent no-op
                return false;
            }
            state.send_view();
            match state.client.resend_otp(&token, id).await {
                Ok(resp) => {
                    if let Some(session) = state.session.as_mut() {
                        session.resend_succeeded(resp.ttl_seconds, resp.resend_remaining);
                    }
                    state.send(ServiceEvent::Notice(format!(
                        "New OTP sent to your email. Expires in {}s",
                        resp.ttl_seconds
                    )));
                }
                Err(e) => {
                    if let Some(session) = state.session.as_mut() {
                        session.resend_failed();
                    }
                    state.send(ServiceEvent::Error(e.to_string()));
                }
            }
            state.send_view();
        }

        UiEvent::MinimizePopup => {
            if let Some(session) = state.session.as_mut() {
                session.minimize();
            }
            state.send_view();
        }

        UiEvent::MaximizePopup => {
            if let Some(session) = state.session.as_mut() {
                session.maximize();
            }
            state.send_view();
        }

        UiEvent::ClosePopup => {
            if let Some(session) = state.session.as_mut() {
                session.close_popup();
            }
            // Closing the popup stops every session timer before any late
            // response could mutate state
            *timers = None;
            abort_poll(poll_inflight);
            state.send_view();
        }

        UiEvent::LoadHistory => {
            let Some(token) = state.auth_token.clone() else {
                return false;
            };
            match state.client.history(&token).await {
                Ok(records) => state.send(ServiceEvent::HistoryLoaded(records)),
                Err(e) => {
                    log::error!("❌ Failed to load history: {}", e);
                    state.send(ServiceEvent::Error(
                        "Failed to load transaction history".to_string(),
                    ));
                }
            }
        }
    }
    false
}

/// Start a new transaction, adopting the server's pending one on a `409`.
async fn initiate_payment(
    state: &mut ServiceState,
    timers: &mut Option<SessionTimers>,
    token: &str,
    student_id: &str,
) {
    match state.client.initiate(token, student_id).await {
        Ok(resp) => {
            set_active_session(state, timers, resp.transaction_id, resp.ttl_seconds);
            state.send(ServiceEvent::Notice(format!(
                "OTP sent to your email. Expires in {}s",
                resp.ttl_seconds
            )));
        }
        Err(e) => {
            let adopted = match &e {
                ApiError::Api {
                    status: 409,
                    message,
                } => parse_pending_id(message),
                _ => None,
            };
            let Some(id) = adopted else {
                state.send(ServiceEvent::Error(e.to_string()));
                return;
            };

            log::warn!("⚠️ Server reports pending transaction {}, adopting it", id);
            set_active_session(state, timers, id, DEFAULT_TTL_SECONDS);
            state.send(ServiceEvent::Error(
                "You have a pending OTP transaction. Please complete the current transaction first."
                    .to_string(),
            ));

            // Best effort: get a fresh OTP for the adopted transaction
            match state.client.resend_otp(token, id).await {
                Ok(resp) => {
                    if let Some(session) = state.session.as_mut() {
                        session.resend_succeeded(resp.ttl_seconds, resp.resend_remaining);
                    }
                    state.send_view();
                    state.send(ServiceEvent::Notice(format!(
                        "OTP has been resent to your email. Expires in {}s",
                        resp.ttl_seconds
                    )));
                }
                Err(err) => log::debug!("Auto-resend for adopted transaction failed: {}", err),
            }
        }
    }
}

/// Resend for a transaction that is already active (second "pay" press).
/// Success and failure both re-open the popup; a failed resend must leave
/// the user somewhere they can act, not with a closed popup.
async fn resend_for_existing(
    state: &mut ServiceState,
    timers: &mut Option<SessionTimers>,
    token: &str,
    id: u64,
) {
    match state.client.resend_otp(token, id).await {
        Ok(resp) => {
            if let Some(session) = state.session.as_mut() {
                session.reopen(resp.ttl_seconds);
                session.resend_succeeded(resp.ttl_seconds, resp.resend_remaining);
            }
            if timers.is_none() {
                *timers = Some(SessionTimers::start());
            }
            state.send_view();
            state.send(ServiceEvent::Notice(format!(
                "New OTP sent to your email. Expires in {}s",
                resp.ttl_seconds
            )));
        }
        Err(e) => {
            state.send(ServiceEvent::Error(e.to_string()));
            if let Some(session) = state.session.as_mut() {
                session.reopen(0);
            }
            if timers.is_none() {
                *timers = Some(SessionTimers::start());
            }
            state.send_view();
        }
    }
}

/// Resume the pending transaction reported by login, then refine its TTL
/// from the server-side `createdAt`.
async fn resume_pending(
    state: &mut ServiceState,
    timers: &mut Option<SessionTimers>,
    id: u64,
) {
    log::info!("🔄 Resuming pending transaction {}", id);
    state.session = Some(PaymentSession::new(id, DEFAULT_TTL_SECONDS));
    *timers = Some(SessionTimers::start());
    state.send(ServiceEvent::Notice(
        "Login successful. You have a pending OTP transaction.".to_string(),
    ));

    if let Some(token) = state.auth_token.clone() {
        match state.client.history(&token).await {
            Ok(records) => {
                if let Some(record) = records.iter().find(|r| r.id == id) {
                    let ttl = remaining_ttl(record.created_at, Utc::now());
                    if let Some(session) = state.session.as_mut() {
                        session.reset_ttl(ttl);
                        session.set_record(record.clone());
                    }
                }
            }
            Err(e) => log::debug!("Could not fetch transaction details: {}", e),
        }
    }
    state.send_view();
}

/// Confirm with the completed code. Success debits the cached balance and
/// clears the session; failure clears the entry buffer so the user can
/// retype (and a fresh completion can fire).
async fn confirm_payment(
    state: &mut ServiceState,
    timers: &mut Option<SessionTimers>,
    poll_inflight: &mut Option<(u64, PollHandle)>,
    code: String,
) {
    let (Some(token), Some(id)) = (
        state.auth_token.clone(),
        state.session.as_ref().map(|s| s.id()),
    ) else {
        return;
    };

    match state.client.confirm(&token, id, &code).await {
        Ok(resp) => {
            let amount = resp
                .amount
                .or_else(|| {
                    state
                        .session
                        .as_ref()
                        .and_then(|s| s.record().map(|r| r.amount))
                })
                .unwrap_or(0);
            if let Some(profile) = state.profile.as_mut() {
                profile.balance = profile.balance.saturating_sub(amount);
            }
            state.persist_auth();
            clear_session(state, timers, poll_inflight, None);
            state.send(ServiceEvent::PaymentConfirmed {
                message: resp.message,
                amount,
            });
        }
        Err(e) => {
            state.send(ServiceEvent::Error(e.to_string()));
            if let Some(session) = state.session.as_mut() {
                session.clear_entry();
            }
            state.send_view();
        }
    }
}

/// Apply the poller's decision table to the current session.
fn apply_reconciliation(
    state: &mut ServiceState,
    timers: &mut Option<SessionTimers>,
    poll_inflight: &mut Option<(u64, PollHandle)>,
    id: u64,
    records: &[TransactionRecord],
) {
    match reconcile(id, records) {
        Reconciliation::Active(record) => {
            if let Some(session) = state.session.as_mut() {
                session.set_record(record);
            }
        }
        Reconciliation::Ended { notice } => {
            log::info!("🔄 Server ended transaction {}, clearing session", id);
            let notice = notice.then(|| TRANSACTION_ENDED_NOTICE.to_string());
            clear_session(state, timers, poll_inflight, notice);
        }
    }
}

/// Install a new active session, overwriting any previous one, with its
/// popup open and timers running.
fn set_active_session(
    state: &mut ServiceState,
    timers: &mut Option<SessionTimers>,
    id: u64,
    ttl_seconds: u32,
) {
    state.session = Some(PaymentSession::new(id, ttl_seconds));
    *timers = Some(SessionTimers::start());
    state.send_view();
}

/// The one place the transaction session, OTP state, popup, and timers are
/// torn down. They are never cleared separately.
fn clear_session(
    state: &mut ServiceState,
    timers: &mut Option<SessionTimers>,
    poll_inflight: &mut Option<(u64, PollHandle)>,
    notice: Option<String>,
) {
    *timers = None;
    abort_poll(poll_inflight);
    if state.session.take().is_some() {
        state.send(ServiceEvent::SessionEnded { notice });
    }
}

fn abort_poll(poll_inflight: &mut Option<(u64, PollHandle)>) {
    if let Some((_, handle)) = poll_inflight.take() {
        handle.abort();
    }
}
