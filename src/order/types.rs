//! Flash-sale domain types and the order error taxonomy

use crate::store::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A voucher on flash sale, as read from the relational store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeckillVoucher {
    pub voucher_id: u64,
    pub begin_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub stock: i64,
}

/// A persisted flash-sale order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoucherOrder {
    pub id: i64,
    pub voucher_id: u64,
    pub user_id: u64,
    pub created_at: DateTime<Utc>,
}

/// Successful result of placing an order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderReceipt {
    pub order_id: i64,
}

/// Why an order was not created
///
/// Business and contention rejections are expected outcomes under load and
/// carry a user-facing reason; the two infrastructure variants are retryable
/// faults.
#[derive(Debug)]
pub enum OrderError {
    /// No such voucher
    VoucherNotFound,

    /// The sale window has not opened yet
    SaleNotStarted,

    /// The sale window has closed
    SaleEnded,

    /// No stock left
    StockInsufficient,

    /// This user already ordered this voucher
    DuplicateOrder,

    /// Another request by the same user is being processed right now
    RequestInFlight,

    /// The key-value store failed
    Store(StoreError),

    /// The relational store failed
    Repository(anyhow::Error),
}

impl OrderError {
    /// True for business or contention rejections, false for infrastructure faults
    pub fn is_rejection(&self) -> bool {
        !matches!(self, OrderError::Store(_) | OrderError::Repository(_))
    }
}

impl fmt::Display for OrderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderError::VoucherNotFound => write!(f, "voucher does not exist"),
            OrderError::SaleNotStarted => write!(f, "the sale has not started yet"),
            OrderError::SaleEnded => write!(f, "the sale has ended"),
            OrderError::StockInsufficient => write!(f, "no stock left"),
            OrderError::DuplicateOrder => write!(f, "this user already ordered this voucher"),
            OrderError::RequestInFlight => {
                write!(f, "another order request by this user is in flight")
            }
            OrderError::Store(e) => write!(f, "store failure: {}", e),
            OrderError::Repository(e) => write!(f, "repository failure: {}", e),
        }
    }
}

impl std::error::Error for OrderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OrderError::Store(e) => Some(e),
            OrderError::Repository(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<StoreError> for OrderError {
    fn from(e: StoreError) -> Self {
        OrderError::Store(e)
    }
}
