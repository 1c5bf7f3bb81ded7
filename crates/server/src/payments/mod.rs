//! Card capture through a third-party payment gateway.
//!
//! The engine only sees a normalized [`CaptureResult`]. A declined card is a
//! successful call with `success: false`; [`PaymentGatewayError`] is reserved
//! for transport failures so callers can tell "declined" from "try again".
//!
//! # Backends
//!
//! - [`HttpPaymentGateway`] - JSON capture API with bearer-key auth
//! - [`SandboxGateway`] - deterministic test cards, no network

mod http;
mod sandbox;

use std::future::Future;

use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

pub use http::HttpPaymentGateway;
pub use sandbox::{DECLINED_CARD, INSUFFICIENT_FUNDS_CARD, SandboxGateway, UNAVAILABLE_CARD};

/// Errors talking to the gateway. A decline is not one of these.
#[derive(Debug, Error)]
pub enum PaymentGatewayError {
    /// HTTP request failed (connect, timeout, TLS).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Gateway rejected the request itself.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Failed to parse response.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Gateway reported it cannot process right now.
    #[error("Gateway unavailable: {0}")]
    Unavailable(String),
}

/// Card input rejected before it reached the gateway.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CardError {
    #[error("card number must be 12-19 digits")]
    InvalidNumber,
    #[error("card number failed checksum")]
    BadChecksum,
    #[error("card verification code must be 3 or 4 digits")]
    InvalidCvv,
    #[error("expiry month must be 1-12")]
    InvalidExpiryMonth,
    #[error("expiry year must be four digits")]
    InvalidExpiryYear,
}

/// Card fields for a single capture.
///
/// The number and CVV are held as secrets and never logged; `Debug` prints the
/// masked number only.
#[derive(Clone)]
pub struct CardDetails {
    number: SecretString,
    cvv: SecretString,
    pub expiry_month: u8,
    pub expiry_year: u16,
    pub holder_name: Option<String>,
}

impl std::fmt::Debug for CardDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardDetails")
            .field("number", &self.masked_number())
            .field("cvv", &"[REDACTED]")
            .field("expiry_month", &self.expiry_month)
            .field("expiry_year", &self.expiry_year)
            .finish_non_exhaustive()
    }
}

impl CardDetails {
    /// Validate and normalize card input. Spaces and dashes in the number
    /// are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`CardError`] for the first malformed field.
    pub fn new(
        number: &str,
        cvv: &str,
        expiry_month: u8,
        expiry_year: u16,
        holder_name: Option<String>,
    ) -> Result<Self, CardError> {
        let digits: String = number
            .chars()
            .filter(|c| !matches!(c, ' ' | '-'))
            .collect();
        if !(12..=19).contains(&digits.len()) || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(CardError::InvalidNumber);
        }
        if !luhn_valid(&digits) {
            return Err(CardError::BadChecksum);
        }
        let cvv = cvv.trim();
        if !(3..=4).contains(&cvv.len()) || !cvv.chars().all(|c| c.is_ascii_digit()) {
            return Err(CardError::InvalidCvv);
        }
        if !(1..=12).contains(&expiry_month) {
            return Err(CardError::InvalidExpiryMonth);
        }
        if !(2000..=2099).contains(&expiry_year) {
            return Err(CardError::InvalidExpiryYear);
        }

        Ok(Self {
            number: SecretString::from(digits),
            cvv: SecretString::from(cvv.to_string()),
            expiry_month,
            expiry_year,
            holder_name: holder_name.filter(|n| !n.trim().is_empty()),
        })
    }

    /// Last four digits of the number.
    #[must_use]
    pub fn last4(&self) -> String {
        let number = self.number.expose_secret();
        number[number.len().saturating_sub(4)..].to_string()
    }

    /// `"**** 4242"`.
    #[must_use]
    pub fn masked_number(&self) -> String {
        parts_crm_core::mask_card_number(self.number.expose_secret())
    }

    /// Network inferred from the leading digits.
    #[must_use]
    pub fn brand(&self) -> Option<&'static str> {
        let number = self.number.expose_secret();
        match number.as_bytes().first()? {
            b'4' => Some("visa"),
            b'5' | b'2' => Some("mastercard"),
            b'3' if number.starts_with("34") || number.starts_with("37") => Some("amex"),
            b'6' => Some("discover"),
            _ => None,
        }
    }

    pub(crate) fn number(&self) -> &str {
        self.number.expose_secret()
    }

    pub(crate) fn cvv(&self) -> &str {
        self.cvv.expose_secret()
    }
}

fn luhn_valid(digits: &str) -> bool {
    let sum: u32 = digits
        .bytes()
        .rev()
        .enumerate()
        .map(|(i, b)| {
            let d = u32::from(b - b'0');
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

/// One capture call.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    /// Merchant reference (the order id).
    pub order_ref: String,
    pub amount: Decimal,
    pub card: CardDetails,
    /// Ask the gateway for a reusable card token.
    pub tokenize: bool,
}

/// Normalized gateway answer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureResult {
    pub success: bool,
    pub gateway_transaction_id: Option<String>,
    pub auth_code: Option<String>,
    pub response_code: Option<String>,
    pub last4: Option<String>,
    pub brand: Option<String>,
    /// Reusable token when tokenization was requested and granted.
    pub card_token: Option<String>,
    /// Decline reason, passed through to the caller verbatim.
    pub error: Option<String>,
}

/// A card capture backend.
pub trait PaymentGateway: Send + Sync {
    /// Charge the card.
    ///
    /// Returns `Ok` with `success: false` when the card is declined.
    fn capture(
        &self,
        request: CaptureRequest,
    ) -> impl Future<Output = Result<CaptureResult, PaymentGatewayError>> + Send;
}

/// The configured gateway.
#[derive(Clone)]
pub enum Gateway {
    Http(HttpPaymentGateway),
    Sandbox(SandboxGateway),
}

impl Gateway {
    /// Short backend name for logs.
    #[must_use]
    pub const fn backend(&self) -> &'static str {
        match self {
            Self::Http(_) => "http",
            Self::Sandbox(_) => "sandbox",
        }
    }
}

impl PaymentGateway for Gateway {
    async fn capture(&self, request: CaptureRequest) -> Result<CaptureResult, PaymentGatewayError> {
        match self {
            Self::Http(gateway) => gateway.capture(request).await,
            Self::Sandbox(gateway) => gateway.capture(request).await,
        }
    }
}
