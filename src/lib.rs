//! Client core for the iBanking tuition payment flow.
//!
//! A payment debits the customer's account balance and is authorized by a
//! one-time passcode (OTP) sent to the customer's email. This crate owns the
//! whole client side of that protocol: the transaction session, the OTP
//! countdown and resend-cooldown tickers, the popup state machine, the
//! 6-digit entry buffer, and the reconciliation poller that keeps local state
//! in agreement with the server.
//!
//! The crate ends at [`state::AppState`] and the two event enums in
//! [`events`]. A front end renders `AppState`, forwards user actions as
//! [`events::UiEvent`]s, and applies [`events::ServiceEvent`]s coming back
//! from the background service task ([`service::run`]).

pub mod auth;
pub mod client;
pub mod config;
pub mod countdown;
pub mod events;
pub mod otp_entry;
pub mod popup;
pub mod reconcile;
pub mod service;
pub mod session;
pub mod state;

pub use auth::{AuthBlob, AuthStore};
pub use client::{ApiClient, ApiError, Profile, TransactionRecord, TransactionStatus, TuitionInfo};
pub use config::Config;
pub use countdown::Countdown;
pub use events::{ServiceEvent, UiEvent};
pub use otp_entry::{OtpEntry, OTP_LEN};
pub use popup::{Popup, PopupMode};
pub use reconcile::{reconcile, Reconciliation};
pub use session::{OtpView, PaymentSession};
pub use state::AppState;
