//! Order workflow hooks driving confirm, release and extend.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::OrderId;
use reservation_store::{ReservationStore, StockSource};
use serde::{Deserialize, Serialize};

use crate::config::ReturnToCartPolicy;
use crate::engine::ReservationEngine;
use crate::error::Result;

/// Message returned when checkout is blocked by an expired hold.
pub const EXPIRED_RESERVATIONS_MESSAGE: &str =
    "Some items in your cart are no longer available. Please review your cart.";

/// States of the host order workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderState {
    Created,
    Draft,
    AddingItems,
    ArrangingPayment,
    PaymentAuthorized,
    PaymentSettled,
    PartiallyShipped,
    Shipped,
    PartiallyDelivered,
    Delivered,
    Modifying,
    ArrangingAdditionalPayment,
    Cancelled,
}

impl OrderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Created => "Created",
            OrderState::Draft => "Draft",
            OrderState::AddingItems => "AddingItems",
            OrderState::ArrangingPayment => "ArrangingPayment",
            OrderState::PaymentAuthorized => "PaymentAuthorized",
            OrderState::PaymentSettled => "PaymentSettled",
            OrderState::PartiallyShipped => "PartiallyShipped",
            OrderState::Shipped => "Shipped",
            OrderState::PartiallyDelivered => "PartiallyDelivered",
            OrderState::Delivered => "Delivered",
            OrderState::Modifying => "Modifying",
            OrderState::ArrangingAdditionalPayment => "ArrangingAdditionalPayment",
            OrderState::Cancelled => "Cancelled",
        }
    }

    /// States in which payment has been secured.
    pub fn is_paid(&self) -> bool {
        matches!(
            self,
            OrderState::PaymentAuthorized | OrderState::PaymentSettled
        )
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The order being transitioned, as seen by the hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRef {
    pub id: OrderId,
    /// Human-readable order code, used in logs only.
    pub code: Option<String>,
}

impl OrderRef {
    pub fn new(id: impl Into<OrderId>) -> Self {
        Self {
            id: id.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    fn label(&self) -> &str {
        self.code.as_deref().unwrap_or_else(|| self.id.as_str())
    }
}

/// Hook points the host order workflow calls around every transition.
#[async_trait]
pub trait OrderProcessHooks: Send + Sync {
    /// Runs before the transition. `Some(message)` blocks it and is shown to
    /// the shopper; the check itself never mutates reservations.
    async fn before_transition(
        &self,
        from: OrderState,
        to: OrderState,
        order: &OrderRef,
    ) -> Result<Option<String>>;

    /// Runs after the transition has been committed by the host.
    async fn after_transition(&self, from: OrderState, to: OrderState, order: &OrderRef)
    -> Result<()>;
}

/// Maps order transitions onto the reservation engine.
///
/// | transition | action |
/// |---|---|
/// | before `AddingItems -> ArrangingPayment` | block if an active hold has expired |
/// | after `* -> PaymentAuthorized / PaymentSettled` | `confirm` |
/// | after `* -> Cancelled` | `release` |
/// | after `ArrangingPayment -> AddingItems` | `extend` unexpired holds, per policy |
pub struct OrderLifecycleAdapter<S, K>
where
    S: ReservationStore,
    K: StockSource,
{
    engine: Arc<ReservationEngine<S, K>>,
    return_to_cart: ReturnToCartPolicy,
}

impl<S, K> OrderLifecycleAdapter<S, K>
where
    S: ReservationStore,
    K: StockSource,
{
    /// Creates an adapter using the engine's configured return-to-cart policy.
    pub fn new(engine: Arc<ReservationEngine<S, K>>) -> Self {
        let return_to_cart = engine.config().return_to_cart_policy();
        Self {
            engine,
            return_to_cart,
        }
    }

    pub fn with_return_to_cart_policy(mut self, policy: ReturnToCartPolicy) -> Self {
        self.return_to_cart = policy;
        self
    }

    pub fn engine(&self) -> &Arc<ReservationEngine<S, K>> {
        &self.engine
    }

    async fn extend_unexpired(&self, order: &OrderRef) -> Result<usize> {
        let ttl = self.engine.config().reservation_ttl;
        let now = Utc::now();
        let mut extended = 0;

        for reservation in self.engine.list_active(&order.id).await? {
            // An expired hold no longer counts against stock; reviving it here
            // would bypass the availability check.
            if reservation.is_expired_at(now) {
                continue;
            }
            if self
                .engine
                .extend(&order.id, &reservation.stock_unit(), ttl)
                .await?
            {
                extended += 1;
            }
        }

        Ok(extended)
    }
}

#[async_trait]
impl<S, K> OrderProcessHooks for OrderLifecycleAdapter<S, K>
where
    S: ReservationStore + 'static,
    K: StockSource + 'static,
{
    #[tracing::instrument(skip(self, order), fields(order = %order.label()))]
    async fn before_transition(
        &self,
        from: OrderState,
        to: OrderState,
        order: &OrderRef,
    ) -> Result<Option<String>> {
        if from != OrderState::AddingItems || to != OrderState::ArrangingPayment {
            return Ok(None);
        }

        let now = Utc::now();
        let expired = self
            .engine
            .list_active(&order.id)
            .await?
            .iter()
            .filter(|r| r.is_expired_at(now))
            .count();

        if expired > 0 {
            tracing::warn!(expired, "order has expired reservations, blocking checkout");
            return Ok(Some(EXPIRED_RESERVATIONS_MESSAGE.to_string()));
        }

        Ok(None)
    }

    #[tracing::instrument(skip(self, order), fields(order = %order.label()))]
    async fn after_transition(
        &self,
        from: OrderState,
        to: OrderState,
        order: &OrderRef,
    ) -> Result<()> {
        if to.is_paid() {
            let confirmed = self.engine.confirm(&order.id).await?;
            tracing::info!(confirmed, "payment received, reservations confirmed");
        } else if to == OrderState::Cancelled {
            let released = self.engine.release(&order.id).await?;
            tracing::info!(released, "order cancelled, reservations released");
        } else if from == OrderState::ArrangingPayment && to == OrderState::AddingItems {
            match self.return_to_cart {
                ReturnToCartPolicy::ExtendReservations => {
                    let extended = self.extend_unexpired(order).await?;
                    tracing::info!(extended, "returned to cart, reservations extended");
                }
                ReturnToCartPolicy::KeepExpiry => {
                    tracing::debug!("returned to cart, reservation expiry kept");
                }
            }
        }

        Ok(())
    }
}
