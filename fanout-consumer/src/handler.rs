use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use thiserror::Error;

use crate::DecodedOrder;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Business action applied to every decoded order.
///
/// Delivery is at-least-once, so implementations must be idempotent: handling
/// the same order twice must have the same observable effect as handling it
/// once.
pub trait Handler: Send + Sync {
    fn handle(&self, order: &DecodedOrder) -> impl Future<Output = Result<(), HandleError>> + Send;
}

#[derive(Debug, Error)]
pub enum HandleError {
    /// Worth retrying; the message is left for redelivery.
    #[error("transient failure: {0}")]
    Transient(BoxError),
    /// Will never succeed; the message is dead-lettered or dropped.
    #[error("permanent failure: {0}")]
    Permanent(BoxError),
}

impl HandleError {
    pub fn transient(e: impl Into<BoxError>) -> Self {
        Self::Transient(e.into())
    }

    pub fn permanent(e: impl Into<BoxError>) -> Self {
        Self::Permanent(e.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[derive(Debug, Error)]
#[error("order {order_id} was already recorded with different contents")]
pub struct ConflictingOrder {
    pub order_id: String,
}

/// Records each order once, keyed by `order_id`, and logs it.
///
/// Redelivered duplicates are accepted without effect. An order id that
/// reappears with different contents is a permanent failure.
#[derive(Clone, Debug, Default)]
pub struct OrderLedger {
    orders: Arc<Mutex<HashMap<String, DecodedOrder>>>,
}

impl OrderLedger {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, DecodedOrder>> {
        self.orders.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, order_id: &str) -> Option<DecodedOrder> {
        self.lock().get(order_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Handler for OrderLedger {
    async fn handle(&self, order: &DecodedOrder) -> Result<(), HandleError> {
        let mut orders = self.lock();
        match orders.get(&order.order_id) {
            Some(recorded) if recorded == order => {
                tracing::debug!(order_id = %order.order_id, "order already recorded");
                Ok(())
            }
            Some(_) => Err(HandleError::permanent(ConflictingOrder {
                order_id: order.order_id.clone(),
            })),
            None => {
                tracing::info!(
                    order_id = %order.order_id,
                    customer_id = %order.customer_id,
                    amount = %order.amount,
                    "order received"
                );
                orders.insert(order.order_id.clone(), order.clone());
                Ok(())
            }
        }
    }
}
