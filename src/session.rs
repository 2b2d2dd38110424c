//! The in-flight payment transaction and its OTP interaction state.
//!
//! [`PaymentSession`] is the client's owned mirror of the single active
//! transaction: at most one exists per customer, the server rejects a second
//! initiation with `409` while one is pending. The OTP interaction state
//! (countdown, entry buffer, popup) lives in an inner [`OtpSession`] that is
//! created when the popup opens and dropped when it closes, so "popup closed"
//! and "no OTP interaction state" cannot drift apart. Clearing the whole
//! session happens in exactly one place in the service task.

use chrono::{DateTime, Utc};

use crate::client::TransactionRecord;
use crate::countdown::{Countdown, DEFAULT_TTL_SECONDS, RESEND_COOLDOWN_SECONDS};
use crate::otp_entry::{OtpEntry, OTP_LEN};
use crate::popup::{Popup, PopupMode};

/// Server-side cap on resends per transaction. Not enforced client-side;
/// surfaced in UI copy only (the cooldown is the client's guard).
pub const MAX_RESENDS: u32 = 3;

#[derive(Debug, Clone)]
pub struct PaymentSession {
    id: u64,
    /// Latest server projection of the transaction, refreshed by the
    /// reconciliation poller.
    record: Option<TransactionRecord>,
    otp: Option<OtpSession>,
}

/// OTP interaction state; exists only while the popup is open or minimized.
#[derive(Debug, Clone)]
pub struct OtpSession {
    countdown: Countdown,
    entry: OtpEntry,
    popup: Popup,
    resend_in_flight: bool,
    resends_remaining: Option<u32>,
}

impl OtpSession {
    fn new(ttl_seconds: u32) -> Self {
        Self {
            countdown: Countdown::new(ttl_seconds),
            entry: OtpEntry::new(),
            popup: Popup::open(),
            resend_in_flight: false,
            resends_remaining: Some(MAX_RESENDS),
        }
    }
}

impl PaymentSession {
    /// A freshly initiated (or resumed) transaction with its popup open and
    /// an empty entry buffer.
    pub fn new(id: u64, ttl_seconds: u32) -> Self {
        Self {
            id,
            record: None,
            otp: Some(OtpSession::new(ttl_seconds)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn record(&self) -> Option<&TransactionRecord> {
        self.record.as_ref()
    }

    pub fn set_record(&mut self, record: TransactionRecord) {
        self.record = Some(record);
    }

    pub fn popup_mode(&self) -> PopupMode {
        self.otp
            .as_ref()
            .map(|o| o.popup.mode())
            .unwrap_or(PopupMode::Closed)
    }

    /// Whether any OTP interaction state (and therefore any timer) exists.
    pub fn popup_open(&self) -> bool {
        self.otp.is_some()
    }

    // ------------------------------------------------------------------
    // Entry
    // ------------------------------------------------------------------

    /// Forward typed input to the entry buffer. No-op unless the popup is
    /// maximized and the current OTP is still valid. Returns the completed
    /// code when this keystroke should trigger submission.
    pub fn type_digit(&mut self, slot: usize, input: &str) -> Option<String> {
        let otp = self.interactive_otp()?;
        otp.entry.type_digit(slot, input)
    }

    pub fn backspace(&mut self, slot: usize) {
        if let Some(otp) = self.interactive_otp() {
            otp.entry.backspace(slot);
        }
    }

    /// Forward pasted text. Same gating as typing; returns the completed
    /// code at most once per buffer fill.
    pub fn paste(&mut self, text: &str) -> Option<String> {
        let otp = self.interactive_otp()?;
        otp.entry.paste(text)
    }

    /// Clear the entry buffer (e.g. after a rejected confirm) so the user
    /// can retype and a fresh completion can fire.
    pub fn clear_entry(&mut self) {
        if let Some(otp) = self.otp.as_mut() {
            otp.entry.clear();
        }
    }

    fn interactive_otp(&mut self) -> Option<&mut OtpSession> {
        let otp = self.otp.as_mut()?;
        if otp.popup.mode() != PopupMode::Open || !otp.countdown.input_enabled() {
            return None;
        }
        Some(otp)
    }

    // ------------------------------------------------------------------
    // Resend
    // ------------------------------------------------------------------

    /// Guard a resend attempt: rejected while the cooldown is running or a
    /// resend is already in flight (single-flight per session). Returns
    /// `true` when the caller may send the request.
    pub fn begin_resend(&mut self) -> bool {
        let Some(otp) = self.otp.as_mut() else {
            return false;
        };
        if otp.resend_in_flight || !otp.countdown.can_resend() {
            return false;
        }
        otp.resend_in_flight = true;
        true
    }

    /// A resend succeeded: new OTP, fresh validity window, empty buffer,
    /// cooldown running, any pending auto-close disarmed.
    pub fn resend_succeeded(&mut self, ttl_seconds: u32, resends_remaining: Option<u32>) {
        if let Some(otp) = self.otp.as_mut() {
            otp.resend_in_flight = false;
            otp.countdown.reset_ttl(ttl_seconds);
            otp.countdown.start_cooldown(RESEND_COOLDOWN_SECONDS);
            otp.entry.clear();
            otp.popup.cancel_auto_close();
            otp.resends_remaining = resends_remaining
                .or_else(|| otp.resends_remaining.map(|r| r.saturating_sub(1)));
        }
    }

    /// A resend failed: nothing changes beyond releasing the guard.
    pub fn resend_failed(&mut self) {
        if let Some(otp) = self.otp.as_mut() {
            otp.resend_in_flight = false;
        }
    }

    // ------------------------------------------------------------------
    // Popup
    // ------------------------------------------------------------------

    pub fn minimize(&mut self) {
        if let Some(otp) = self.otp.as_mut() {
            otp.popup.minimize();
        }
    }

    pub fn maximize(&mut self) {
        if let Some(otp) = self.otp.as_mut() {
            otp.popup.maximize();
        }
    }

    /// Destroy the OTP interaction state. The transaction itself stays
    /// active (and keeps blocking new initiations) until the server ends it
    /// or the session is cleared.
    pub fn close_popup(&mut self) {
        self.otp = None;
    }

    /// Re-open the popup for a transaction whose interaction state was
    /// destroyed (popup closed earlier, login restore). The best available
    /// TTL estimate comes from the last server record when we have one.
    pub fn reopen(&mut self, fallback_ttl: u32) {
        match self.otp.as_mut() {
            Some(otp) => otp.popup.maximize(),
            None => {
                let ttl = self
                    .record
                    .as_ref()
                    .map(|r| remaining_ttl(r.created_at, Utc::now()))
                    .unwrap_or(fallback_ttl);
                self.otp = Some(OtpSession::new(ttl));
            }
        }
    }

    /// Restart the validity window without touching the cooldown, used when
    /// the server reports a fresh TTL outside the popup's resend button
    /// (initiate-while-active, login restore refinement).
    pub fn reset_ttl(&mut self, ttl_seconds: u32) {
        if let Some(otp) = self.otp.as_mut() {
            otp.countdown.reset_ttl(ttl_seconds);
            otp.entry.clear();
            otp.popup.cancel_auto_close();
        }
    }

    // ------------------------------------------------------------------
    // Ticking
    // ------------------------------------------------------------------

    /// One-second tick: advance both countdowns, then the popup's auto-close
    /// logic. Returns `true` when the popup auto-closed (minimized + expired
    /// for the full grace period); the OTP interaction state is gone then.
    pub fn tick(&mut self) -> bool {
        let Some(otp) = self.otp.as_mut() else {
            return false;
        };
        otp.countdown.tick();
        if otp.popup.tick(otp.countdown.expired()) {
            self.otp = None;
            true
        } else {
            false
        }
    }

    // ------------------------------------------------------------------
    // Projection
    // ------------------------------------------------------------------

    /// Snapshot for the UI. Everything the popup renders comes from here.
    pub fn view(&self) -> OtpView {
        match self.otp.as_ref() {
            Some(otp) => OtpView {
                transaction_id: self.id,
                mode: otp.popup.mode(),
                ttl_seconds: otp.countdown.ttl_seconds(),
                resend_cooldown_seconds: otp.countdown.resend_cooldown_seconds(),
                auto_close_seconds: otp.popup.auto_close_seconds(),
                digits: otp.entry.digits(),
                focus: otp.entry.focus(),
                input_enabled: otp.popup.mode() == PopupMode::Open
                    && otp.countdown.input_enabled(),
                resend_in_flight: otp.resend_in_flight,
                resends_remaining: otp.resends_remaining,
            },
            None => OtpView {
                transaction_id: self.id,
                mode: PopupMode::Closed,
                ttl_seconds: 0,
                resend_cooldown_seconds: 0,
                auto_close_seconds: None,
                digits: [None; OTP_LEN],
                focus: 0,
                input_enabled: false,
                resend_in_flight: false,
                resends_remaining: None,
            },
        }
    }
}

/// What the OTP popup renders; a pure projection of session state.
#[derive(Debug, Clone, PartialEq)]
pub struct OtpView {
    pub transaction_id: u64,
    pub mode: PopupMode,
    pub ttl_seconds: u32,
    pub resend_cooldown_seconds: u32,
    /// `Some` while the minimized-expiry auto-close countdown is running.
    pub auto_close_seconds: Option<u32>,
    pub digits: [Option<char>; OTP_LEN],
    pub focus: usize,
    pub input_enabled: bool,
    pub resend_in_flight: bool,
    pub resends_remaining: Option<u32>,
}

/// Remaining validity of an OTP issued at `created_at`, clamped to
/// `[0, DEFAULT_TTL_SECONDS]`. Used when resuming a pending transaction
/// whose challenge was issued before this client session started.
pub fn remaining_ttl(created_at: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
    let elapsed = (now - created_at).num_seconds();
    (DEFAULT_TTL_SECONDS as i64 - elapsed).clamp(0, DEFAULT_TTL_SECONDS as i64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_new_session_opens_with_empty_buffer() {
        let session = PaymentSession::new(42, 120);
        let view = session.view();
        assert_eq!(view.transaction_id, 42);
        assert_eq!(view.mode, PopupMode::Open);
        assert_eq!(view.ttl_seconds, 120);
        assert_eq!(view.digits, [None; OTP_LEN]);
        assert!(view.input_enabled);
    }

    #[test]
    fn test_typing_gated_by_expiry() {
        let mut session = PaymentSession::new(42, 1);
        assert!(session.type_digit(0, "1").is_none());
        session.tick();
        // TTL hit zero: input disabled, digit rejected
        assert!(session.type_digit(1, "2").is_none());
        assert_eq!(session.view().digits[1], None);
    }

    #[test]
    fn test_typing_gated_while_minimized() {
        let mut session = PaymentSession::new(42, 120);
        session.minimize();
        session.type_digit(0, "9");
        assert_eq!(session.view().digits[0], None);

        session.maximize();
        session.type_digit(0, "9");
        assert_eq!(session.view().digits[0], Some('9'));
    }

    #[test]
    fn test_resend_guard_single_flight_and_cooldown() {
        let mut session = PaymentSession::new(42, 120);
        assert!(session.begin_resend());
        // Second attempt while in flight is rejected
        assert!(!session.begin_resend());

        session.resend_succeeded(120, Some(2));
        let view = session.view();
        assert_eq!(view.resend_cooldown_seconds, RESEND_COOLDOWN_SECONDS);
        assert_eq!(view.resends_remaining, Some(2));

        // Cooldown running: rejected, nothing changes
        assert!(!session.begin_resend());
        assert_eq!(session.view(), view);

        for _ in 0..RESEND_COOLDOWN_SECONDS {
            session.tick();
        }
        assert!(session.begin_resend());
    }

    #[test]
    fn test_resend_failure_leaves_state_unchanged() {
        let mut session = PaymentSession::new(42, 100);
        session.type_digit(0, "1");
        assert!(session.begin_resend());
        let before = {
            let mut v = session.view();
            v.resend_in_flight = false;
            v
        };
        session.resend_failed();
        assert_eq!(session.view(), before);
        assert_eq!(session.view().digits[0], Some('1'));
    }

    #[test]
    fn test_resend_success_resets_ttl_and_buffer() {
        let mut session = PaymentSession::new(42, 120);
        session.type_digit(0, "1");
        for _ in 0..50 {
            session.tick();
        }
        assert!(session.begin_resend());
        session.resend_succeeded(120, None);

        let view = session.view();
        assert_eq!(view.ttl_seconds, 120);
        assert_eq!(view.digits, [None; OTP_LEN]);
        // Implicit local mirror: one resend consumed
        assert_eq!(view.resends_remaining, Some(MAX_RESENDS - 1));
    }

    #[test]
    fn test_close_popup_keeps_transaction() {
        let mut session = PaymentSession::new(42, 120);
        session.close_popup();
        assert_eq!(session.id(), 42);
        assert_eq!(session.popup_mode(), PopupMode::Closed);
        assert!(!session.popup_open());
        // Ticks are a no-op without interaction state
        assert!(!session.tick());
    }

    #[test]
    fn test_reopen_estimates_ttl_from_record() {
        let created = Utc.with_ymd_and_hms(2025, 9, 1, 8, 30, 0).unwrap();
        let mut session = PaymentSession::new(42, 120);
        session.set_record(crate::client::TransactionRecord {
            id: 42,
            student_id: "523H0054".to_string(),
            semester: "2025A".to_string(),
            amount: 12_500_000,
            status: crate::client::TransactionStatus::PendingOtp,
            created_at: created,
            completed_at: None,
        });
        session.close_popup();

        session.reopen(0);
        // The record is old, so the estimate clamps to zero: expired popup
        // with the resend affordance, never a phantom valid window.
        let view = session.view();
        assert_eq!(view.mode, PopupMode::Open);
        assert_eq!(view.ttl_seconds, 0);
        assert!(!view.input_enabled);
    }

    #[test]
    fn test_remaining_ttl_clamps() {
        let created = Utc.with_ymd_and_hms(2025, 9, 1, 8, 30, 0).unwrap();
        let now = created + chrono::Duration::seconds(45);
        assert_eq!(remaining_ttl(created, now), 75);

        let now = created + chrono::Duration::seconds(500);
        assert_eq!(remaining_ttl(created, now), 0);

        // Clock skew: never report more than the full window
        let now = created - chrono::Duration::seconds(10);
        assert_eq!(remaining_ttl(created, now), 120);
    }
}
