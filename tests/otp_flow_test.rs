//! Scenario tests for the OTP transaction lifecycle.
//!
//! The whole protocol core is synchronous and timer-driven, so these tests
//! drive it with simulated one-second ticks instead of wall-clock time.

use chrono::{Duration, TimeZone, Utc};
use tuition_client::client::{TransactionRecord, TransactionStatus};
use tuition_client::events::ServiceEvent;
use tuition_client::session::{remaining_ttl, PaymentSession};
use tuition_client::{reconcile, AppState, PopupMode, Reconciliation, OTP_LEN};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn record(id: u64, status: TransactionStatus) -> TransactionRecord {
    TransactionRecord {
        id,
        student_id: "523H0054".to_string(),
        semester: "2025A".to_string(),
        amount: 12_500_000,
        status,
        created_at: Utc.with_ymd_and_hms(2025, 9, 1, 8, 30, 0).unwrap(),
        completed_at: None,
    }
}

#[test]
fn test_initiate_then_expiry_while_open() {
    init_logging();

    // Initiate: server returns {transactionId: 42, ttlSeconds: 120}
    let mut session = PaymentSession::new(42, 120);
    let view = session.view();
    assert_eq!(view.transaction_id, 42);
    assert_eq!(view.mode, PopupMode::Open);
    assert_eq!(view.ttl_seconds, 120);
    assert_eq!(view.digits, [None; OTP_LEN]);

    // 121 simulated seconds with no resend
    for _ in 0..121 {
        assert!(!session.tick(), "popup must not auto-close while open");
    }

    let view = session.view();
    assert_eq!(view.ttl_seconds, 0);
    assert!(!view.input_enabled);
    // Never minimized: stays open with the resend affordance
    assert_eq!(view.mode, PopupMode::Open);
    assert!(session.type_digit(0, "1").is_none());

    println!("✅ Open-popup expiry scenario passed");
}

#[test]
fn test_minimized_expiry_auto_closes_after_exactly_ten_seconds() {
    init_logging();

    let mut session = PaymentSession::new(42, 3);
    session.minimize();

    // TTL runs out on the third tick; that tick arms the auto-close
    for _ in 0..3 {
        assert!(!session.tick());
    }
    assert_eq!(session.view().ttl_seconds, 0);
    assert_eq!(session.view().auto_close_seconds, Some(10));

    // Nine further seconds: still alive and counting down
    for expected in (1..10).rev() {
        assert!(!session.tick());
        assert_eq!(session.view().auto_close_seconds, Some(expected));
    }

    // Tenth second: auto-close fires, interaction state is gone
    assert!(session.tick());
    assert_eq!(session.popup_mode(), PopupMode::Closed);
    assert!(!session.popup_open());

    println!("✅ Minimized auto-close scenario passed");
}

#[test]
fn test_successful_resend_cancels_auto_close() {
    init_logging();

    let mut session = PaymentSession::new(42, 1);
    session.minimize();
    session.tick(); // expiry observed, countdown armed
    session.tick();
    session.tick();
    assert!(session.view().auto_close_seconds.is_some());

    // Resend succeeds before the grace period elapses
    assert!(session.begin_resend());
    session.resend_succeeded(120, None);
    assert_eq!(session.view().auto_close_seconds, None);
    assert_eq!(session.view().ttl_seconds, 120);

    // A fresh OTP keeps the minimized popup alive indefinitely
    for _ in 0..30 {
        assert!(!session.tick());
    }
    assert_eq!(session.popup_mode(), PopupMode::Minimized);

    println!("✅ Resend-cancels-auto-close scenario passed");
}

#[test]
fn test_typing_six_digits_submits_exactly_once() {
    let mut session = PaymentSession::new(42, 120);

    let mut submissions = Vec::new();
    for (i, d) in ["1", "2", "3", "4", "5", "6"].iter().enumerate() {
        if let Some(code) = session.type_digit(i, d) {
            submissions.push(code);
        }
    }
    assert_eq!(submissions, vec!["123456".to_string()]);
}

#[test]
fn test_paste_fills_buffer_and_submits_exactly_once() {
    let mut session = PaymentSession::new(42, 120);

    let code = session.paste("ab12cd3456xyz");
    assert_eq!(code, Some("123456".to_string()));
    assert_eq!(
        session.view().digits,
        [Some('1'), Some('2'), Some('3'), Some('4'), Some('5'), Some('6')]
    );

    // No second submission until the buffer is cleared
    assert_eq!(session.paste("111111"), None);
    session.clear_entry();
    assert_eq!(session.paste("111111"), Some("111111".to_string()));
}

#[test]
fn test_resend_during_cooldown_is_a_silent_noop() {
    let mut session = PaymentSession::new(42, 120);
    assert!(session.begin_resend());
    session.resend_succeeded(120, Some(2));

    let before = session.view();
    assert!(!session.begin_resend());
    assert_eq!(session.view(), before, "a rejected resend must not change state");
}

#[test]
fn test_poll_discovering_expired_transaction_clears_state() {
    init_logging();

    // Poll result: transaction 42 is now EXPIRED on the server
    let records = vec![record(41, TransactionStatus::Completed), record(42, TransactionStatus::Expired)];
    let outcome = reconcile(42, &records);
    assert_eq!(outcome, Reconciliation::Ended { notice: true });

    // The service turns that into a one-time notice and a cleared session
    let mut state = AppState::default();
    state.apply(ServiceEvent::OtpUpdated(PaymentSession::new(42, 120).view()));
    assert!(state.transaction_active());

    state.apply(ServiceEvent::SessionEnded {
        notice: Some(
            "The pending transaction has expired or failed. You can now create a new transaction."
                .to_string(),
        ),
    });
    assert!(!state.transaction_active());
    assert!(state.notice.is_some());

    println!("✅ Reconciliation-clears-session scenario passed");
}

#[test]
fn test_poll_with_active_status_changes_nothing() {
    let records = vec![record(42, TransactionStatus::Processing)];
    assert!(matches!(reconcile(42, &records), Reconciliation::Active(_)));
}

#[test]
fn test_login_restore_recomputes_remaining_ttl() {
    // The OTP challenge was issued 45 seconds before login completed
    let created = Utc::now() - Duration::seconds(45);
    let ttl = remaining_ttl(created, Utc::now());
    assert!((74..=75).contains(&ttl), "expected ~75s, got {}", ttl);

    let mut session = PaymentSession::new(42, 120);
    session.reset_ttl(ttl);
    let view = session.view();
    assert_eq!(view.ttl_seconds, ttl);
    assert!(view.input_enabled);

    // A challenge older than the full window resumes already expired
    let stale = Utc::now() - Duration::seconds(600);
    assert_eq!(remaining_ttl(stale, Utc::now()), 0);
}

#[test]
fn test_full_payment_flow_through_app_state() {
    init_logging();

    let mut state = AppState::default();
    state.apply(ServiceEvent::LoggedIn {
        profile: tuition_client::Profile {
            full_name: "Nguyen Van A".to_string(),
            phone: "0900000000".to_string(),
            email: "a@example.com".to_string(),
            balance: 50_000_000,
        },
    });

    // Lookup, then initiate
    state.apply(ServiceEvent::TuitionLoaded(tuition_client::TuitionInfo {
        student_id: "523H0054".to_string(),
        student_name: "Tran Thi B".to_string(),
        semester: "2025A".to_string(),
        amount: 12_500_000,
        paid: false,
    }));
    let mut session = PaymentSession::new(42, 120);
    state.apply(ServiceEvent::OtpUpdated(session.view()));
    assert!(state.transaction_active());

    // User types the emailed code; the sixth digit completes the buffer
    for (i, d) in ["4", "8", "1", "5", "2", "6"].iter().enumerate() {
        let submit = session.type_digit(i, d);
        state.apply(ServiceEvent::OtpUpdated(session.view()));
        if i < 5 {
            assert!(submit.is_none());
        } else {
            assert_eq!(submit, Some("481526".to_string()));
        }
    }

    // Confirm succeeded server-side
    state.apply(ServiceEvent::SessionEnded { notice: None });
    state.apply(ServiceEvent::PaymentConfirmed {
        message: "Payment successful".to_string(),
        amount: 12_500_000,
    });

    assert_eq!(state.profile.as_ref().unwrap().balance, 37_500_000);
    assert!(state.tuition.as_ref().unwrap().paid);
    assert!(!state.transaction_active());

    println!("✅ Full payment flow scenario passed");
}
