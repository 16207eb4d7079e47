use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Backend-assigned account identifier, stable across refreshes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(u32);

impl AccountId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OtpType {
    Totp,
    Hotp,
}

impl fmt::Display for OtpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OtpType::Totp => write!(f, "TOTP"),
            OtpType::Hotp => write!(f, "HOTP"),
        }
    }
}

/// Code last generated by the backend for an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpValue {
    pub password: String,
    pub generated_at: Option<i64>,
    pub period: Option<u32>,
    pub otp_type: Option<String>,
}

/// Account as exposed by the OTP-management backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub service: Option<String>,
    pub account: Option<String>,
    pub icon: Option<String>,
    pub otp_type: OtpType,
    pub digits: u8,
    pub period: Option<u32>,
    pub counter: Option<u32>,
    pub algorithm: Option<String>,
    pub otp: Option<OtpValue>,
}

impl Account {
    pub fn new(id: u32, otp_type: OtpType) -> Self {
        Self {
            id: AccountId::new(id),
            service: None,
            account: None,
            icon: None,
            otp_type,
            digits: 6,
            period: None,
            counter: None,
            algorithm: None,
            otp: None,
        }
    }

    pub fn with_period(mut self, period: u32) -> Self {
        self.period = Some(period);
        self
    }

    pub fn with_otp(mut self, password: &str) -> Self {
        self.otp = Some(OtpValue {
            password: password.to_string(),
            generated_at: None,
            period: self.period,
            otp_type: None,
        });
        self
    }

    pub fn with_labels(mut self, service: &str, account: &str) -> Self {
        self.service = Some(service.to_string());
        self.account = Some(account.to_string());
        self
    }

    /// Period in seconds, falling back to `default_period` when absent or zero
    pub fn effective_period(&self, default_period: u32) -> u32 {
        self.period
            .filter(|p| *p > 0)
            .unwrap_or(default_period)
            .max(1)
    }

    /// Period to count down, or `None` when this account never ticks.
    ///
    /// Only TOTP accounts with a known code tick.
    pub fn countdown_period(&self, default_period: u32) -> Option<u32> {
        match (self.otp_type, &self.otp) {
            (OtpType::Totp, Some(_)) => Some(self.effective_period(default_period)),
            _ => None,
        }
    }

    /// Case-insensitive match against the service or account label
    pub fn matches(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        [&self.service, &self.account]
            .into_iter()
            .flatten()
            .any(|label| label.to_lowercase().contains(&query))
    }

    pub fn display_name(&self) -> String {
        match (&self.service, &self.account) {
            (Some(service), Some(account)) => format!("{} ({})", service, account),
            (Some(label), None) | (None, Some(label)) => label.clone(),
            (None, None) => format!("account #{}", self.id),
        }
    }
}

// ============================================================================
// Window geometry
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowPosition {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSize {
    pub width: u32,
    pub height: u32,
}

impl WindowSize {
    pub fn square(side: u32) -> Self {
        Self {
            width: side,
            height: side,
        }
    }

    pub fn is_square(&self) -> bool {
        self.width == self.height
    }
}

/// Screen area the scanner window last occupied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenRegion {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl ScreenRegion {
    pub fn from_window(position: WindowPosition, size: WindowSize) -> Self {
        Self {
            x: position.x,
            y: position.y,
            width: size.width,
            height: size.height,
        }
    }
}

/// Creation parameters of the scanner window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSpec {
    pub label: String,
    pub title: String,
    pub size: WindowSize,
    pub resizable: bool,
    pub decorations: bool,
    pub transparent: bool,
    pub always_on_top: bool,
    pub centered: bool,
}

impl WindowSpec {
    /// Frameless, transparent, always-on-top square overlay
    pub fn scan_overlay(label: &str, title: &str, side: u32) -> Self {
        Self {
            label: label.to_string(),
            title: title.to_string(),
            size: WindowSize::square(side),
            resizable: true,
            decorations: false,
            transparent: true,
            always_on_top: true,
            centered: true,
        }
    }
}

/// Lifecycle notifications delivered by the window system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEvent {
    Resized(WindowSize),
    Destroyed,
}

// ============================================================================
// Scan events
// ============================================================================

pub const SCAN_RESULT_EVENT: &str = "qr-scan-result";
pub const SCAN_CANCELLED_EVENT: &str = "qr-scan-cancelled";

/// Terminal event sent from the scanner window to the requesting context
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    Found { uri: String },
    Cancelled,
}

impl ScanEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ScanEvent::Found { .. } => SCAN_RESULT_EVENT,
            ScanEvent::Cancelled => SCAN_CANCELLED_EVENT,
        }
    }

    /// Payload as carried on the wire
    pub fn payload(&self) -> Value {
        match self {
            ScanEvent::Found { uri } => json!({ "uri": uri }),
            ScanEvent::Cancelled => Value::Null,
        }
    }

    /// Rebuild an event from its wire name and payload
    pub fn from_wire(name: &str, payload: &Value) -> Option<Self> {
        match name {
            SCAN_RESULT_EVENT => payload
                .get("uri")
                .and_then(Value::as_str)
                .map(|uri| ScanEvent::Found {
                    uri: uri.to_string(),
                }),
            SCAN_CANCELLED_EVENT => Some(ScanEvent::Cancelled),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Some(60), 60)]
    #[case(None, 30)]
    #[case(Some(0), 30)]
    fn test_effective_period(#[case] period: Option<u32>, #[case] expected: u32) {
        let mut account = Account::new(1, OtpType::Totp);
        account.period = period;
        assert_eq!(account.effective_period(30), expected);
    }

    #[test]
    fn test_countdown_only_for_totp_with_code() {
        let ticking = Account::new(1, OtpType::Totp).with_otp("123456");
        let no_code = Account::new(2, OtpType::Totp);
        let counter = Account::new(3, OtpType::Hotp).with_otp("654321");

        assert_eq!(ticking.countdown_period(30), Some(30));
        assert_eq!(no_code.countdown_period(30), None);
        assert_eq!(counter.countdown_period(30), None);
    }

    #[rstest]
    #[case("git", true)]
    #[case("HUB", true)]
    #[case("alice", true)]
    #[case("bob", false)]
    fn test_account_matches(#[case] query: &str, #[case] expected: bool) {
        let account = Account::new(1, OtpType::Totp).with_labels("GitHub", "alice@example.com");
        assert_eq!(account.matches(query), expected);
    }

    #[test]
    fn test_display_name() {
        let labelled = Account::new(1, OtpType::Totp).with_labels("GitHub", "alice");
        assert_eq!(labelled.display_name(), "GitHub (alice)");
        assert_eq!(Account::new(7, OtpType::Hotp).display_name(), "account #7");
    }

    #[test]
    fn test_account_deserializes_backend_shape() {
        let json = r#"{
            "id": 12,
            "service": "GitHub",
            "account": "alice",
            "icon": null,
            "otp_type": "totp",
            "digits": 6,
            "period": 30,
            "counter": null,
            "algorithm": "sha1",
            "otp": {"password": "123456", "generated_at": 1700000000, "period": 30, "otp_type": "totp"}
        }"#;

        let account: Account = serde_json::from_str(json).unwrap();

        assert_eq!(account.id, AccountId::new(12));
        assert_eq!(account.otp_type, OtpType::Totp);
        assert_eq!(account.otp.unwrap().password, "123456");
    }

    #[test]
    fn test_scan_event_wire_format() {
        let found = ScanEvent::Found {
            uri: "otpauth://totp/X".to_string(),
        };

        assert_eq!(found.name(), "qr-scan-result");
        assert_eq!(found.payload(), json!({ "uri": "otpauth://totp/X" }));
        assert_eq!(ScanEvent::Cancelled.name(), "qr-scan-cancelled");
        assert_eq!(ScanEvent::Cancelled.payload(), Value::Null);

        assert_eq!(
            ScanEvent::from_wire(found.name(), &found.payload()),
            Some(found)
        );
        assert_eq!(
            ScanEvent::from_wire("qr-scan-cancelled", &Value::Null),
            Some(ScanEvent::Cancelled)
        );
        assert_eq!(ScanEvent::from_wire("unrelated", &Value::Null), None);
    }

    #[test]
    fn test_window_spec_is_square_overlay() {
        let spec = WindowSpec::scan_overlay("scan-overlay", "Scan QR Code", 300);

        assert!(spec.size.is_square());
        assert!(!spec.decorations);
        assert!(spec.always_on_top);
        assert!(spec.resizable);
    }
}
