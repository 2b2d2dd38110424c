//! Popup presentation state machine.
//!
//! The popup is a pure projection of session state: it never talks to the
//! network. Its one piece of owned logic is the auto-close countdown that
//! runs when the OTP expires while the popup is minimized.

/// Seconds between OTP expiry in minimized mode and automatic close.
pub const AUTO_CLOSE_SECONDS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopupMode {
    Closed,
    Open,
    Minimized,
}

#[derive(Debug, Clone)]
pub struct Popup {
    mode: PopupMode,
    auto_close_seconds: Option<u32>,
}

impl Popup {
    /// A freshly opened popup, maximized, with no auto-close armed.
    pub fn open() -> Self {
        Self {
            mode: PopupMode::Open,
            auto_close_seconds: None,
        }
    }

    pub fn mode(&self) -> PopupMode {
        self.mode
    }

    pub fn auto_close_seconds(&self) -> Option<u32> {
        self.auto_close_seconds
    }

    pub fn minimize(&mut self) {
        if self.mode == PopupMode::Open {
            self.mode = PopupMode::Minimized;
        }
    }

    /// Restore from minimized. The auto-close countdown only applies while
    /// minimized, so maximizing disarms it.
    pub fn maximize(&mut self) {
        if self.mode == PopupMode::Minimized {
            self.mode = PopupMode::Open;
            self.auto_close_seconds = None;
        }
    }

    pub fn close(&mut self) {
        self.mode = PopupMode::Closed;
        self.auto_close_seconds = None;
    }

    pub fn cancel_auto_close(&mut self) {
        self.auto_close_seconds = None;
    }

    /// One-second tick. While minimized with an expired OTP, the first tick
    /// arms a countdown of [`AUTO_CLOSE_SECONDS`]; subsequent ticks count it
    /// down. Returns `true` on the tick where the popup auto-closes. Any
    /// tick where the OTP is valid again disarms the countdown.
    pub fn tick(&mut self, otp_expired: bool) -> bool {
        if self.mode != PopupMode::Minimized || !otp_expired {
            self.auto_close_seconds = None;
            return false;
        }
        match self.auto_close_seconds {
            None => {
                self.auto_close_seconds = Some(AUTO_CLOSE_SECONDS);
                false
            }
            Some(remaining) => {
                let remaining = remaining.saturating_sub(1);
                if remaining == 0 {
                    self.close();
                    true
                } else {
                    self.auto_close_seconds = Some(remaining);
                    false
                }
            }
        }
    }
}
