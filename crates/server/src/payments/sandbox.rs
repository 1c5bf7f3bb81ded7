//! Offline gateway with deterministic test cards.
//!
//! | number | outcome |
//! |---|---|
//! | `4000 0000 0000 0002` | declined, `"Card declined"` |
//! | `4000 0000 0000 9995` | declined, `"Insufficient funds"` |
//! | `4000 0000 0000 0119` | gateway unavailable |
//! | anything else | approved |

use tracing::instrument;
use uuid::Uuid;

use super::{CaptureRequest, CaptureResult, PaymentGateway, PaymentGatewayError};

pub const DECLINED_CARD: &str = "4000000000000002";
pub const INSUFFICIENT_FUNDS_CARD: &str = "4000000000009995";
pub const UNAVAILABLE_CARD: &str = "4000000000000119";

/// Gateway used when no capture API is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct SandboxGateway;

impl SandboxGateway {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn declined(request: &CaptureRequest, code: &str, message: &str) -> CaptureResult {
    CaptureResult {
        success: false,
        response_code: Some(code.to_string()),
        last4: Some(request.card.last4()),
        brand: request.card.brand().map(str::to_string),
        error: Some(message.to_string()),
        ..CaptureResult::default()
    }
}

impl PaymentGateway for SandboxGateway {
    #[instrument(skip(self, request), fields(order_ref = %request.order_ref, amount = %request.amount))]
    async fn capture(&self, request: CaptureRequest) -> Result<CaptureResult, PaymentGatewayError> {
        match request.card.number() {
            DECLINED_CARD => return Ok(declined(&request, "05", "Card declined")),
            INSUFFICIENT_FUNDS_CARD => return Ok(declined(&request, "51", "Insufficient funds")),
            UNAVAILABLE_CARD => {
                return Err(PaymentGatewayError::Unavailable(
                    "sandbox processor offline".to_string(),
                ));
            }
            _ => {}
        }

        let id = Uuid::new_v4().simple().to_string();
        Ok(CaptureResult {
            success: true,
            gateway_transaction_id: Some(format!("sbx_{id}")),
            auth_code: Some(id[..6].to_ascii_uppercase()),
            response_code: Some("00".to_string()),
            last4: Some(request.card.last4()),
            brand: request.card.brand().map(str::to_string),
            card_token: request
                .tokenize
                .then(|| format!("tok_sbx_{}", Uuid::new_v4().simple())),
            error: None,
        })
    }
}
