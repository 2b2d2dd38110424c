//! Application state: plain data, no async, no Arc.
//!
//! `AppState` holds everything a front end needs to render. The service task
//! sends [`ServiceEvent`]s which are applied via [`AppState::apply`]; the UI
//! reads fields directly. No locking, no channels.

use crate::client::{Profile, TransactionRecord, TuitionInfo};
use crate::events::ServiceEvent;
use crate::session::OtpView;

/// All application state needed for rendering.
#[derive(Debug, Default)]
pub struct AppState {
    // -- Auth --
    pub logged_in: bool,
    pub profile: Option<Profile>,

    // -- Tuition lookup --
    pub tuition: Option<TuitionInfo>,

    // -- OTP popup --
    /// `Some` while a transaction is active, even with `mode == Closed`
    /// (drives the "waiting for OTP" affordance and the initiate guard).
    pub otp: Option<OtpView>,

    // -- History table --
    pub history: Option<Vec<TransactionRecord>>,

    // -- Transient messages --
    pub notice: Option<String>,
    pub error: Option<String>,
}

impl AppState {
    /// Whether a payment transaction is currently blocking new initiations.
    pub fn transaction_active(&self) -> bool {
        self.otp.is_some()
    }

    /// Apply a service event to update state. Pure state-machine transition.
    pub fn apply(&mut self, event: ServiceEvent) {
        match event {
            ServiceEvent::LoggedIn { profile } => {
                // A fresh login resets everything below the auth line
                self.logged_in = true;
                self.profile = Some(profile);
                self.tuition = None;
                self.otp = None;
                self.history = None;
                self.notice = None;
                self.error = None;
            }

            ServiceEvent::LoggedOut => {
                *self = AppState {
                    notice: Some("Logged out successfully".to_string()),
                    ..AppState::default()
                };
            }

            ServiceEvent::ProfileSynced(profile) => {
                self.profile = Some(profile);
            }

            ServiceEvent::TuitionLoaded(tuition) => {
                self.tuition = Some(tuition);
            }

            ServiceEvent::OtpUpdated(view) => {
                self.otp = Some(view);
            }

            ServiceEvent::SessionEnded { notice } => {
                self.otp = None;
                if notice.is_some() {
                    self.notice = notice;
                }
            }

            ServiceEvent::PaymentConfirmed { message, amount } => {
                if let Some(profile) = self.profile.as_mut() {
                    profile.balance = profile.balance.saturating_sub(amount);
                }
                if let Some(tuition) = self.tuition.as_mut() {
                    tuition.amount = 0;
                    tuition.paid = true;
                }
                self.otp = None;
                self.notice = Some(message);
            }

            ServiceEvent::HistoryLoaded(records) => {
                self.history = Some(records);
            }

            ServiceEvent::Notice(msg) => {
                self.notice = Some(msg);
            }

            ServiceEvent::Error(msg) => {
                self.error = Some(msg);
            }
        }
    }
}
