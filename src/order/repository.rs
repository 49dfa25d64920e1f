//! Relational-store collaborator interface
//!
//! The workflow never talks to the relational store directly; it goes through
//! this seam. A transaction is an explicit value: the workflow runs its
//! checks and writes against it, commits, and only then performs post-commit
//! actions (releasing the per-user lock). Dropping an uncommitted transaction
//! rolls it back.

use super::types::{SeckillVoucher, VoucherOrder};
use async_trait::async_trait;

/// Access to the vouchers and orders tables
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Load a flash-sale voucher by id
    async fn seckill_voucher(
        &self,
        voucher_id: u64,
    ) -> Result<Option<SeckillVoucher>, anyhow::Error>;

    /// Open a transaction covering the duplicate check, the stock decrement
    /// and the order insert
    async fn begin(&self) -> Result<Box<dyn OrderTransaction + Send + '_>, anyhow::Error>;
}

/// One local transaction on the relational store
///
/// All methods run inside the same transaction boundary. Implementations
/// must roll back on drop when `commit` was never called.
#[async_trait]
pub trait OrderTransaction: Send {
    /// Number of existing orders for this (voucher, user) pair
    async fn order_count(&mut self, voucher_id: u64, user_id: u64) -> Result<u64, anyhow::Error>;

    /// Conditional decrement: `stock = stock - 1 WHERE voucher_id = ? AND stock > 0`
    ///
    /// Returns the number of affected rows; zero means the stock is gone,
    /// which is an expected outcome and not an error.
    async fn reserve_stock(&mut self, voucher_id: u64) -> Result<u64, anyhow::Error>;

    /// Insert the new order row
    async fn insert_order(&mut self, order: &VoucherOrder) -> Result<(), anyhow::Error>;

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> Result<(), anyhow::Error>;
}
