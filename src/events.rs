//! Event types for communication between UI and service task.
//!
//! These two enums are the *only* interface between the synchronous render
//! loop and the asynchronous service task. No shared state, no Arc, no Mutex.

use crate::client::{Profile, TransactionRecord, TuitionInfo};
use crate::session::OtpView;

// ============================================================================
// UI → Service
// ============================================================================

/// Commands sent from the UI thread to the background service task.
#[derive(Debug)]
pub enum UiEvent {
    /// Authenticate with the payment API.
    Login { username: String, password: String },

    /// Drop the persisted session and all local state.
    Logout,

    /// Look up the tuition owed for a student. Fires while the user types,
    /// so failures stay silent.
    LookupTuition { student_id: String },

    /// Start a payment for the looked-up student. If a transaction is
    /// already active this resends its OTP instead of initiating a second.
    InitiatePayment { student_id: String },

    /// Raw input typed into one of the six OTP slots.
    TypeDigit { slot: usize, input: String },

    /// Backspace pressed in a slot.
    Backspace { slot: usize },

    /// Clipboard text pasted into the OTP widget.
    Paste { text: String },

    /// "Resend OTP" pressed in the popup.
    ResendOtp,

    MinimizePopup,
    MaximizePopup,
    ClosePopup,

    /// Fetch the transaction history for display.
    LoadHistory,

    /// Clean shutdown.
    Shutdown,
}

// ============================================================================
// Service → UI
// ============================================================================

/// Events sent from the service task back to the UI thread.
#[derive(Debug)]
pub enum ServiceEvent {
    /// Login (or startup restore) succeeded.
    LoggedIn { profile: Profile },

    /// The persisted session was dropped.
    LoggedOut,

    /// Profile refetched from the server; authoritative for balance.
    ProfileSynced(Profile),

    /// Tuition lookup result.
    TuitionLoaded(TuitionInfo),

    /// Snapshot of the OTP popup after any session mutation or tick.
    OtpUpdated(OtpView),

    /// The active transaction is gone: confirmed elsewhere, expired, failed,
    /// closed by reconciliation, or cleared on logout. A notice is carried
    /// exactly once when the server ended it.
    SessionEnded { notice: Option<String> },

    /// The payment went through. `amount` is the debited amount in VND.
    PaymentConfirmed { message: String, amount: u64 },

    /// Transaction history for the history table.
    HistoryLoaded(Vec<TransactionRecord>),

    /// Transient success notice.
    Notice(String),

    /// Non-fatal error to display in the UI.
    Error(String),
}
