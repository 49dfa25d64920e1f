//! In-memory order repository
//!
//! Backs the concurrency tests and embedded single-process use. Transactions
//! take the table lock for their whole lifetime, like a single-connection
//! database would, and keep an undo log so that dropping an uncommitted
//! transaction restores the previous state.

use super::repository::{OrderRepository, OrderTransaction};
use super::types::{SeckillVoucher, VoucherOrder};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
struct Tables {
    vouchers: HashMap<u64, SeckillVoucher>,
    orders: Vec<VoucherOrder>,
}

/// Mutex-guarded voucher and order tables
#[derive(Clone, Default)]
pub struct InMemoryOrderRepository {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a voucher (test and bootstrap helper)
    pub async fn put_voucher(&self, voucher: SeckillVoucher) {
        self.tables
            .lock()
            .await
            .vouchers
            .insert(voucher.voucher_id, voucher);
    }

    /// Remaining stock of a voucher
    pub async fn stock_of(&self, voucher_id: u64) -> Option<i64> {
        self.tables
            .lock()
            .await
            .vouchers
            .get(&voucher_id)
            .map(|v| v.stock)
    }

    /// Snapshot of all persisted orders
    pub async fn orders(&self) -> Vec<VoucherOrder> {
        self.tables.lock().await.orders.clone()
    }
}

enum Undo {
    RestoreStock { voucher_id: u64 },
    RemoveOrder { order_id: i64 },
}

struct MemTransaction {
    guard: OwnedMutexGuard<Tables>,
    undo: Vec<Undo>,
    committed: bool,
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn seckill_voucher(
        &self,
        voucher_id: u64,
    ) -> Result<Option<SeckillVoucher>, anyhow::Error> {
        Ok(self.tables.lock().await.vouchers.get(&voucher_id).cloned())
    }

    async fn begin(&self) -> Result<Box<dyn OrderTransaction + Send + '_>, anyhow::Error> {
        let guard = self.tables.clone().lock_owned().await;
        Ok(Box::new(MemTransaction {
            guard,
            undo: Vec::new(),
            committed: false,
        }))
    }
}

#[async_trait]
impl OrderTransaction for MemTransaction {
    async fn order_count(&mut self, voucher_id: u64, user_id: u64) -> Result<u64, anyhow::Error> {
        let count = self
            .guard
            .orders
            .iter()
            .filter(|o| o.voucher_id == voucher_id && o.user_id == user_id)
            .count();
        Ok(count as u64)
    }

    async fn reserve_stock(&mut self, voucher_id: u64) -> Result<u64, anyhow::Error> {
        match self.guard.vouchers.get_mut(&voucher_id) {
            Some(voucher) if voucher.stock > 0 => {
                voucher.stock -= 1;
                self.undo.push(Undo::RestoreStock { voucher_id });
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn insert_order(&mut self, order: &VoucherOrder) -> Result<(), anyhow::Error> {
        self.guard.orders.push(order.clone());
        self.undo.push(Undo::RemoveOrder { order_id: order.id });
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), anyhow::Error> {
        self.committed = true;
        Ok(())
    }
}

impl Drop for MemTransaction {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        // Roll back in reverse order
        while let Some(step) = self.undo.pop() {
            match step {
                Undo::RestoreStock { voucher_id } => {
                    if let Some(voucher) = self.guard.vouchers.get_mut(&voucher_id) {
                        voucher.stock += 1;
                    }
                }
                Undo::RemoveOrder { order_id } => {
                    self.guard.orders.retain(|o| o.id != order_id);
                }
            }
        }
    }
}
