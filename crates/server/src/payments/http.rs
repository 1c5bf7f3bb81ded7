//! HTTP card capture client.
//!
//! # API
//!
//! - `POST {base_url}/v1/charges` with a JSON body
//! - Authentication: `Authorization: Bearer <api key>`
//! - `2xx` and `402` carry a charge result (`approved` tells them apart)
//! - `429` and `5xx` mean the gateway cannot take the charge right now

use std::sync::Arc;

use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use url::Url;

use super::{CaptureRequest, CaptureResult, PaymentGateway, PaymentGatewayError};
use crate::config::GatewayConfig;

/// Client for the card capture API.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    inner: Arc<HttpPaymentGatewayInner>,
}

struct HttpPaymentGatewayInner {
    client: reqwest::Client,
    charges_url: Url,
}

#[derive(Serialize)]
struct ChargeBody<'a> {
    reference: &'a str,
    #[serde(with = "rust_decimal::serde::str")]
    amount: Decimal,
    card: CardBody<'a>,
    tokenize: bool,
}

#[derive(Serialize)]
struct CardBody<'a> {
    number: &'a str,
    cvv: &'a str,
    exp_month: u8,
    exp_year: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Deserialize)]
struct ChargeResponse {
    approved: bool,
    transaction_id: Option<String>,
    auth_code: Option<String>,
    response_code: Option<String>,
    message: Option<String>,
    card: Option<ChargeCard>,
}

#[derive(Deserialize)]
struct ChargeCard {
    last4: Option<String>,
    brand: Option<String>,
    token: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    error: Option<String>,
}

impl HttpPaymentGateway {
    /// Create a new gateway client.
    ///
    /// # Errors
    ///
    /// Returns error if the base URL cannot be joined or the HTTP client fails
    /// to build.
    pub fn new(config: &GatewayConfig) -> Result<Self, PaymentGatewayError> {
        let mut headers = HeaderMap::new();
        let auth_value = format!("Bearer {}", config.api_key.expose_secret());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth_value)
                .map_err(|e| PaymentGatewayError::Parse(format!("Invalid API key format: {e}")))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        let charges_url = config
            .base_url
            .join("v1/charges")
            .map_err(|e| PaymentGatewayError::Parse(format!("Invalid gateway URL: {e}")))?;

        Ok(Self {
            inner: Arc::new(HttpPaymentGatewayInner {
                client,
                charges_url,
            }),
        })
    }

    /// Parse error response from the gateway.
    async fn parse_error(response: reqwest::Response) -> PaymentGatewayError {
        let status = response.status();
        let message = response
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|body| body.message.or(body.error))
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string());

        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return PaymentGatewayError::Unavailable(format!("{}: {message}", status.as_u16()));
        }
        PaymentGatewayError::Api {
            status: status.as_u16(),
            message,
        }
    }
}

impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self, request), fields(order_ref = %request.order_ref, amount = %request.amount))]
    async fn capture(&self, request: CaptureRequest) -> Result<CaptureResult, PaymentGatewayError> {
        let body = ChargeBody {
            reference: &request.order_ref,
            amount: request.amount,
            card: CardBody {
                number: request.card.number(),
                cvv: request.card.cvv(),
                exp_month: request.card.expiry_month,
                exp_year: request.card.expiry_year,
                name: request.card.holder_name.as_deref(),
            },
            tokenize: request.tokenize,
        };

        let response = self
            .inner
            .client
            .post(self.inner.charges_url.clone())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !(status.is_success() || status == StatusCode::PAYMENT_REQUIRED) {
            return Err(Self::parse_error(response).await);
        }

        let charge: ChargeResponse = response
            .json()
            .await
            .map_err(|e| PaymentGatewayError::Parse(format!("Failed to parse response: {e}")))?;

        let (last4, brand, card_token) = charge
            .card
            .map(|c| (c.last4, c.brand, c.token))
            .unwrap_or_default();

        Ok(CaptureResult {
            success: charge.approved,
            gateway_transaction_id: charge.transaction_id,
            auth_code: charge.auth_code,
            response_code: charge.response_code,
            last4: last4.or_else(|| Some(request.card.last4())),
            brand: brand.or_else(|| request.card.brand().map(str::to_string)),
            card_token,
            error: if charge.approved {
                None
            } else {
                Some(
                    charge
                        .message
                        .unwrap_or_else(|| "Payment declined".to_string()),
                )
            },
        })
    }
}
