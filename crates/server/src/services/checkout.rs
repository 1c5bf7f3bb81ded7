//! Card capture for orders.
//!
//! A capture is one gateway call followed by one receipt write. Once the
//! gateway has taken the money the caller is always told so; if the receipt
//! cannot be written it is parked in a [`ReceiptBacklog`] and retried in the
//! background instead of failing the request.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

use parts_crm_core::{
    FulfillmentStatus, OrderId, PaymentStatus, TransactionId, TransitionPolicy, ensure_positive,
};

use super::access::{in_tenant, require_staff};
use crate::db::{CaptureReceipt, NewSavedCard, RecordStore};
use crate::error::AppError;
use crate::models::Principal;
use crate::payments::{CaptureRequest, CardDetails, PaymentGateway};

const DEFAULT_DECLINE_MESSAGE: &str = "Payment declined";

/// Result of a capture as reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentOutcome {
    pub success: bool,
    /// Stored transaction; `None` on decline or while the receipt is parked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TransactionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Receipts for captures the gateway approved but the store did not record.
#[derive(Debug, Clone, Default)]
pub struct ReceiptBacklog {
    pending: Arc<Mutex<Vec<CaptureReceipt>>>,
}

impl ReceiptBacklog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn park(&self, receipt: CaptureReceipt) {
        self.pending.lock().await.push(receipt);
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.is_empty()
    }

    /// Try to record every parked receipt once. Failures go back on the
    /// backlog. Returns how many were recorded.
    #[instrument(skip_all)]
    pub async fn retry_pending<S: RecordStore>(&self, store: &S) -> usize {
        let parked = std::mem::take(&mut *self.pending.lock().await);
        if parked.is_empty() {
            return 0;
        }

        let mut recorded = 0;
        let mut failed = Vec::new();
        for receipt in parked {
            match store.record_capture(receipt.clone()).await {
                Ok(transaction) => {
                    recorded += 1;
                    info!(
                        order_id = %receipt.order_id,
                        transaction_id = %transaction.id,
                        "Parked payment receipt recorded"
                    );
                }
                Err(e) => {
                    warn!(order_id = %receipt.order_id, error = %e, "Parked payment receipt still failing");
                    failed.push(receipt);
                }
            }
        }

        if !failed.is_empty() {
            self.pending.lock().await.extend(failed);
        }
        recorded
    }
}

/// Payment operations for one request.
pub struct PaymentService<'a, S, G> {
    store: &'a S,
    gateway: &'a G,
    policy: TransitionPolicy,
    backlog: &'a ReceiptBacklog,
}

impl<'a, S: RecordStore, G: PaymentGateway> PaymentService<'a, S, G> {
    #[must_use]
    pub const fn new(
        store: &'a S,
        gateway: &'a G,
        policy: TransitionPolicy,
        backlog: &'a ReceiptBacklog,
    ) -> Self {
        Self {
            store,
            gateway,
            policy,
            backlog,
        }
    }

    /// Charge the amount due on an order to a card.
    ///
    /// The amount is the discounted amount when one is set, else the total.
    /// Orders that are already partially paid are settled by hand, since the
    /// order keeps no record of how much was taken.
    /// A decline is a normal outcome with `success: false` and leaves the
    /// order untouched.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] when the order cannot take a payment,
    /// [`AppError::NotFound`] for unknown or foreign orders and
    /// [`AppError::Gateway`] when the gateway cannot be reached.
    #[instrument(skip(self, principal, card), fields(user_id = %principal.user_id))]
    pub async fn capture_payment(
        &self,
        principal: &Principal,
        order_id: OrderId,
        card: CardDetails,
        save_card: bool,
    ) -> Result<PaymentOutcome, AppError> {
        require_staff(principal)?;
        let order = in_tenant(
            principal,
            self.store.get_order(order_id).await?,
            "order",
            order_id,
        )?;

        if order.fulfillment_status == FulfillmentStatus::Cancelled {
            return Err(AppError::Validation(format!(
                "order {order_id} is cancelled and cannot take a payment"
            )));
        }
        if order.payment_status == PaymentStatus::Paid {
            return Err(AppError::Validation(format!(
                "order {order_id} is already paid"
            )));
        }
        if order.payment_status == PaymentStatus::Partial {
            warn!(%order_id, "Capture on a partially paid order");
            return Err(AppError::Validation(format!(
                "order {order_id} is partially paid; record the balance manually"
            )));
        }
        self.policy
            .check_payment(order.payment_status, PaymentStatus::Paid)
            .inspect_err(|e| warn!(%order_id, error = %e, "Capture rejected by payment status"))?;
        let amount = ensure_positive("amount due", order.amount_due())?;

        let last4 = card.last4();
        let masked = card.masked_number();
        let brand = card.brand();
        let result = self
            .gateway
            .capture(CaptureRequest {
                order_ref: order_id.to_string(),
                amount,
                card,
                tokenize: save_card,
            })
            .await
            .inspect_err(|e| error!(%order_id, error = %e, "Payment gateway call failed"))?;

        if !result.success {
            let reason = result
                .error
                .unwrap_or_else(|| DEFAULT_DECLINE_MESSAGE.to_string());
            info!(%order_id, reason = %reason, "Card declined");
            return Ok(PaymentOutcome {
                success: false,
                transaction_id: None,
                gateway_transaction_id: None,
                error: Some(reason),
            });
        }

        let last4 = result.last4.unwrap_or(last4);
        let brand = result.brand.or_else(|| brand.map(str::to_string));
        let saved_card = if save_card {
            result.card_token.map(|token| NewSavedCard {
                customer_id: order.customer_id,
                gateway_token: token,
                last4: last4.clone(),
                brand: brand.clone(),
            })
        } else {
            None
        };
        let receipt = CaptureReceipt {
            org_id: order.org_id,
            order_id,
            user_id: principal.user_id,
            amount,
            payment_method: "card".to_string(),
            gateway_transaction_id: result.gateway_transaction_id.clone(),
            auth_code: result.auth_code,
            response_code: result.response_code,
            metadata: json!({
                "last4": last4,
                "brand": brand,
                "masked_number": masked,
            }),
            stamp_sales_agent: principal
                .role
                .is_sales_capable()
                .then_some(principal.user_id),
            saved_card,
        };

        match self.store.record_capture(receipt.clone()).await {
            Ok(transaction) => {
                info!(
                    %order_id,
                    transaction_id = %transaction.id,
                    %amount,
                    "Payment captured"
                );
                Ok(PaymentOutcome {
                    success: true,
                    transaction_id: Some(transaction.id),
                    gateway_transaction_id: result.gateway_transaction_id,
                    error: None,
                })
            }
            Err(e) => {
                let event_id = sentry::capture_error(&e);
                error!(
                    %order_id,
                    error = %e,
                    sentry_event_id = %event_id,
                    gateway_transaction_id = ?result.gateway_transaction_id,
                    "Payment captured but receipt not recorded, parking for retry"
                );
                self.backlog.park(receipt).await;
                Ok(PaymentOutcome {
                    success: true,
                    transaction_id: None,
                    gateway_transaction_id: result.gateway_transaction_id,
                    error: None,
                })
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::payments::{CaptureResult, PaymentGatewayError};
    use crate::services::testing::Fixture;

    enum Script {
        Approve,
        Decline(Option<&'static str>),
        Unavailable,
    }

    /// Answers every capture the same way and remembers the amounts charged.
    struct ScriptedGateway {
        script: Script,
        charged: StdMutex<Vec<Decimal>>,
    }

    impl ScriptedGateway {
        fn new(script: Script) -> Self {
            Self {
                script,
                charged: StdMutex::new(Vec::new()),
            }
        }

        fn charged(&self) -> Vec<Decimal> {
            self.charged.lock().unwrap().clone()
        }
    }

    impl PaymentGateway for ScriptedGateway {
        async fn capture(
            &self,
            request: CaptureRequest,
        ) -> Result<CaptureResult, PaymentGatewayError> {
            self.charged.lock().unwrap().push(request.amount);
            match self.script {
                Script::Approve => Ok(CaptureResult {
                    success: true,
                    gateway_transaction_id: Some("gw_1001".to_string()),
                    auth_code: Some("A1B2C3".to_string()),
                    response_code: Some("00".to_string()),
                    last4: Some(request.card.last4()),
                    brand: Some("visa".to_string()),
                    card_token: request.tokenize.then(|| "tok_1001".to_string()),
                    error: None,
                }),
                Script::Decline(reason) => Ok(CaptureResult {
                    success: false,
                    error: reason.map(str::to_string),
                    ..CaptureResult::default()
                }),
                Script::Unavailable => Err(PaymentGatewayError::Unavailable(
                    "maintenance window".to_string(),
                )),
            }
        }
    }

    fn card() -> CardDetails {
        CardDetails::new("4242424242424242", "123", 12, 2030, Some("Dana Reyes".into())).unwrap()
    }

    fn service<'a, G: PaymentGateway>(
        fx: &'a Fixture,
        gateway: &'a G,
        backlog: &'a ReceiptBacklog,
    ) -> PaymentService<'a, crate::db::MemoryStore, G> {
        PaymentService::new(&fx.store, gateway, TransitionPolicy::Strict, backlog)
    }

    #[tokio::test]
    async fn test_decline_leaves_order_untouched() {
        let fx = Fixture::new().await;
        let order = fx.order().await.order;
        let gateway = ScriptedGateway::new(Script::Decline(Some("Card declined")));
        let backlog = ReceiptBacklog::new();

        let outcome = service(&fx, &gateway, &backlog)
            .capture_payment(&fx.sales, order.id, card(), false)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            PaymentOutcome {
                success: false,
                transaction_id: None,
                gateway_transaction_id: None,
                error: Some("Card declined".to_string()),
            }
        );
        let detail = fx.engine().order(&fx.sales, order.id).await.unwrap();
        assert_eq!(detail.order.payment_status, PaymentStatus::Unpaid);
        assert!(detail.transactions.is_empty());
    }

    #[tokio::test]
    async fn test_decline_without_reason_gets_default_message() {
        let fx = Fixture::new().await;
        let order = fx.order().await.order;
        let gateway = ScriptedGateway::new(Script::Decline(None));
        let backlog = ReceiptBacklog::new();

        let outcome = service(&fx, &gateway, &backlog)
            .capture_payment(&fx.sales, order.id, card(), false)
            .await
            .unwrap();
        assert_eq!(outcome.error.as_deref(), Some(DEFAULT_DECLINE_MESSAGE));
    }

    #[tokio::test]
    async fn test_capture_records_receipt_and_card() {
        let fx = Fixture::new().await;
        let mut draft = fx.draft(&[&fx.brake_pad]);
        draft.discounted_amount = Some(dec!(90.00));
        let order = fx
            .engine()
            .create_order(&fx.processing, draft)
            .await
            .unwrap()
            .order;
        assert_eq!(order.sales_agent, None);

        let gateway = ScriptedGateway::new(Script::Approve);
        let backlog = ReceiptBacklog::new();
        let outcome = service(&fx, &gateway, &backlog)
            .capture_payment(&fx.admin, order.id, card(), true)
            .await
            .unwrap();

        assert!(outcome.success);
        assert!(outcome.transaction_id.is_some());
        assert_eq!(outcome.gateway_transaction_id.as_deref(), Some("gw_1001"));
        assert_eq!(gateway.charged(), vec![dec!(90.00)]);

        let detail = fx.engine().order(&fx.admin, order.id).await.unwrap();
        assert_eq!(detail.order.payment_status, PaymentStatus::Paid);
        assert_eq!(detail.order.sales_agent, Some(fx.admin.user_id));
        let [transaction] = detail.transactions.as_slice() else {
            panic!("expected one transaction");
        };
        assert_eq!(transaction.amount, dec!(90.00));
        assert_eq!(transaction.metadata["last4"], "4242");
        assert_eq!(transaction.metadata["masked_number"], "**** 4242");

        let cards = fx
            .store
            .list_saved_cards(fx.org_id, order.customer_id)
            .await
            .unwrap();
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].gateway_token, "tok_1001");
        assert_eq!(cards[0].last4, "4242");
    }

    #[tokio::test]
    async fn test_processing_agent_capture_does_not_claim_sales() {
        let fx = Fixture::new().await;
        let order = fx
            .engine()
            .create_order(&fx.processing, fx.draft(&[&fx.rotor]))
            .await
            .unwrap()
            .order;
        let gateway = ScriptedGateway::new(Script::Approve);
        let backlog = ReceiptBacklog::new();

        service(&fx, &gateway, &backlog)
            .capture_payment(&fx.processing, order.id, card(), false)
            .await
            .unwrap();

        let order = fx.store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(order.sales_agent, None);
        assert!(
            fx.store
                .list_saved_cards(fx.org_id, order.customer_id)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_paid_and_cancelled_orders_are_rejected_before_charging() {
        let fx = Fixture::new().await;
        let gateway = ScriptedGateway::new(Script::Approve);
        let backlog = ReceiptBacklog::new();
        let payments = service(&fx, &gateway, &backlog);

        let paid = fx.order().await.order;
        payments
            .capture_payment(&fx.sales, paid.id, card(), false)
            .await
            .unwrap();
        assert!(matches!(
            payments.capture_payment(&fx.sales, paid.id, card(), false).await,
            Err(AppError::Validation(_))
        ));

        let cancelled = fx.order().await.order;
        fx.engine()
            .update_fulfillment_status(&fx.admin, cancelled.id, FulfillmentStatus::Cancelled)
            .await
            .unwrap();
        assert!(matches!(
            payments
                .capture_payment(&fx.sales, cancelled.id, card(), false)
                .await,
            Err(AppError::Validation(_))
        ));

        assert_eq!(gateway.charged().len(), 1);
    }

    #[tokio::test]
    async fn test_partially_paid_order_is_not_charged_in_full() {
        let fx = Fixture::new().await;
        let gateway = ScriptedGateway::new(Script::Approve);
        let backlog = ReceiptBacklog::new();
        let order = fx.order().await.order;
        fx.engine()
            .update_payment_status(&fx.sales, order.id, PaymentStatus::Partial)
            .await
            .unwrap();

        let err = service(&fx, &gateway, &backlog)
            .capture_payment(&fx.sales, order.id, card(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(gateway.charged().is_empty());
        assert_eq!(
            fx.store.get_order(order.id).await.unwrap().unwrap().payment_status,
            PaymentStatus::Partial
        );
    }

    #[tokio::test]
    async fn test_gateway_outage_is_an_upstream_error() {
        let fx = Fixture::new().await;
        let order = fx.order().await.order;
        let gateway = ScriptedGateway::new(Script::Unavailable);
        let backlog = ReceiptBacklog::new();

        let err = service(&fx, &gateway, &backlog)
            .capture_payment(&fx.sales, order.id, card(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Gateway(_)));
        assert_eq!(
            fx.store.get_order(order.id).await.unwrap().unwrap().payment_status,
            PaymentStatus::Unpaid
        );
    }

    #[tokio::test]
    async fn test_foreign_and_customer_callers() {
        let fx = Fixture::new().await;
        let order = fx.order().await.order;
        let gateway = ScriptedGateway::new(Script::Approve);
        let backlog = ReceiptBacklog::new();
        let payments = service(&fx, &gateway, &backlog);

        assert!(matches!(
            payments
                .capture_payment(&fx.outsider, order.id, card(), false)
                .await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            payments
                .capture_payment(&fx.customer, order.id, card(), false)
                .await,
            Err(AppError::Forbidden(_))
        ));
        assert!(gateway.charged().is_empty());
    }

    #[tokio::test]
    async fn test_unrecorded_receipt_is_parked_and_retried() {
        let fx = Fixture::new().await;
        let order = fx.order().await.order;
        let gateway = ScriptedGateway::new(Script::Approve);
        let backlog = ReceiptBacklog::new();

        fx.store.fail_captures(true).await;
        let outcome = service(&fx, &gateway, &backlog)
            .capture_payment(&fx.sales, order.id, card(), false)
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.transaction_id, None);
        assert_eq!(backlog.len().await, 1);

        assert_eq!(backlog.retry_pending(&fx.store).await, 0);
        assert_eq!(backlog.len().await, 1);

        fx.store.fail_captures(false).await;
        assert_eq!(backlog.retry_pending(&fx.store).await, 1);
        assert!(backlog.is_empty().await);

        let detail = fx.engine().order(&fx.sales, order.id).await.unwrap();
        assert_eq!(detail.order.payment_status, PaymentStatus::Paid);
        assert_eq!(detail.transactions.len(), 1);
    }
}
