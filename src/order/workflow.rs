//! Flash-sale order creation
//!
//! Enforces one order per user per voucher and a never-negative stock under
//! concurrent load. The duplicate check only means something inside the
//! per-user lock, and the lock is only released after the transaction has
//! committed: releasing earlier lets a second request from the same user
//! pass the duplicate check before the first order becomes visible.

use super::repository::OrderRepository;
use super::types::{OrderError, OrderReceipt, VoucherOrder};
use crate::id::IdGenerator;
use crate::lock::{DistributedLock, ReentrantLock};
use crate::store::KeyValueStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Tuning knobs for the order workflow
#[derive(Debug, Clone)]
pub struct OrderConfig {
    /// Lease of the per-user lock; must outlast the worst-case transaction
    pub lock_ttl: Duration,
}

impl Default for OrderConfig {
    fn default() -> Self {
        OrderConfig {
            lock_ttl: Duration::from_secs(30),
        }
    }
}

/// Orchestrates validation, per-user locking, stock decrement and persistence
pub struct OrderWorkflow<R> {
    repo: Arc<R>,
    store: Arc<dyn KeyValueStore>,
    ids: IdGenerator,
    config: OrderConfig,
}

impl<R: OrderRepository> OrderWorkflow<R> {
    pub fn new(repo: Arc<R>, store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_config(repo, store, OrderConfig::default())
    }

    pub fn with_config(repo: Arc<R>, store: Arc<dyn KeyValueStore>, config: OrderConfig) -> Self {
        OrderWorkflow {
            ids: IdGenerator::new(store.clone()),
            repo,
            store,
            config,
        }
    }

    /// Place a flash-sale order for a user
    ///
    /// Rejections ([`OrderError::is_rejection`]) are expected outcomes under
    /// load; infrastructure variants are retryable faults.
    pub async fn place_order(
        &self,
        voucher_id: u64,
        user_id: u64,
    ) -> Result<OrderReceipt, OrderError> {
        let voucher = self
            .repo
            .seckill_voucher(voucher_id)
            .await
            .map_err(OrderError::Repository)?
            .ok_or(OrderError::VoucherNotFound)?;

        let now = Utc::now();
        if now < voucher.begin_time {
            return Err(OrderError::SaleNotStarted);
        }
        if now >= voucher.end_time {
            return Err(OrderError::SaleEnded);
        }
        if voucher.stock < 1 {
            return Err(OrderError::StockInsufficient);
        }

        // Per-user scope: distinct users proceed in parallel, the same
        // user's concurrent attempts serialize
        let lock = ReentrantLock::new(self.store.clone(), &format!("order:{}", user_id));
        if !lock.try_lock(self.config.lock_ttl).await? {
            debug!(user_id, voucher_id, "per-user lock busy, rejecting");
            return Err(OrderError::RequestInFlight);
        }

        // The transaction fully resolves (commit or rollback) inside the
        // lock; only then is the lock released
        let result = self.create_order(voucher_id, user_id).await;

        if let Err(e) = lock.unlock().await {
            warn!(user_id, error = %e, "per-user lock release failed, lease will expire it");
        }
        result
    }

    /// The transactional step: duplicate recheck, stock decrement, insert
    async fn create_order(
        &self,
        voucher_id: u64,
        user_id: u64,
    ) -> Result<OrderReceipt, OrderError> {
        let mut tx = self.repo.begin().await.map_err(OrderError::Repository)?;

        // Must happen under the per-user lock; checking before acquiring it
        // is the check-then-act race the lock exists to close
        let existing = tx
            .order_count(voucher_id, user_id)
            .await
            .map_err(OrderError::Repository)?;
        if existing > 0 {
            return Err(OrderError::DuplicateOrder);
        }

        let affected = tx
            .reserve_stock(voucher_id)
            .await
            .map_err(OrderError::Repository)?;
        if affected == 0 {
            return Err(OrderError::StockInsufficient);
        }

        let order_id = self.ids.next_id("order").await?;
        let order = VoucherOrder {
            id: order_id,
            voucher_id,
            user_id,
            created_at: Utc::now(),
        };
        tx.insert_order(&order).await.map_err(OrderError::Repository)?;
        tx.commit().await.map_err(OrderError::Repository)?;

        info!(order_id, voucher_id, user_id, "voucher order created");
        Ok(OrderReceipt { order_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::memory::InMemoryOrderRepository;
    use crate::order::types::SeckillVoucher;
    use crate::store::InMemoryStore;
    use chrono::Duration as ChronoDuration;

    fn open_voucher(voucher_id: u64, stock: i64) -> SeckillVoucher {
        SeckillVoucher {
            voucher_id,
            begin_time: Utc::now() - ChronoDuration::hours(1),
            end_time: Utc::now() + ChronoDuration::hours(1),
            stock,
        }
    }

    async fn workflow_with(
        voucher: SeckillVoucher,
    ) -> (Arc<OrderWorkflow<InMemoryOrderRepository>>, Arc<InMemoryOrderRepository>) {
        let repo = Arc::new(InMemoryOrderRepository::new());
        repo.put_voucher(voucher).await;
        let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());
        (Arc::new(OrderWorkflow::new(repo.clone(), store)), repo)
    }

    #[tokio::test]
    async fn test_successful_order() {
        let (workflow, repo) = workflow_with(open_voucher(1, 10)).await;

        let receipt = workflow.place_order(1, 42).await.unwrap();
        assert!(receipt.order_id > 0);
        assert_eq!(repo.stock_of(1).await, Some(9));

        let orders = repo.orders().await;
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].user_id, 42);
        assert_eq!(orders[0].voucher_id, 1);
    }

    #[tokio::test]
    async fn test_unknown_voucher() {
        let (workflow, _) = workflow_with(open_voucher(1, 10)).await;
        assert!(matches!(
            workflow.place_order(99, 42).await,
            Err(OrderError::VoucherNotFound)
        ));
    }

    #[tokio::test]
    async fn test_sale_window_enforced() {
        let mut early = open_voucher(1, 10);
        early.begin_time = Utc::now() + ChronoDuration::hours(1);
        early.end_time = Utc::now() + ChronoDuration::hours(2);
        let (workflow, _) = workflow_with(early).await;
        assert!(matches!(
            workflow.place_order(1, 42).await,
            Err(OrderError::SaleNotStarted)
        ));

        let mut late = open_voucher(2, 10);
        late.begin_time = Utc::now() - ChronoDuration::hours(2);
        late.end_time = Utc::now() - ChronoDuration::hours(1);
        let (workflow, _) = workflow_with(late).await;
        assert!(matches!(
            workflow.place_order(2, 42).await,
            Err(OrderError::SaleEnded)
        ));
    }

    #[tokio::test]
    async fn test_sequential_duplicate_rejected() {
        let (workflow, repo) = workflow_with(open_voucher(1, 10)).await;

        workflow.place_order(1, 42).await.unwrap();
        assert!(matches!(
            workflow.place_order(1, 42).await,
            Err(OrderError::DuplicateOrder)
        ));
        // Only the first order decremented stock
        assert_eq!(repo.stock_of(1).await, Some(9));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_one_order_per_user_under_concurrency() {
        let (workflow, repo) = workflow_with(open_voucher(1, 10)).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let workflow = workflow.clone();
            handles.push(tokio::spawn(async move { workflow.place_order(1, 42).await }));
        }

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                // Loser of the lock or of the duplicate recheck
                Err(OrderError::RequestInFlight) | Err(OrderError::DuplicateOrder) => {}
                Err(other) => panic!("unexpected error: {}", other),
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(repo.orders().await.len(), 1);
        assert_eq!(repo.stock_of(1).await, Some(9));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stock_never_negative() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
        let (workflow, repo) = workflow_with(open_voucher(1, 5)).await;

        let mut handles = Vec::new();
        for user_id in 0..20u64 {
            let workflow = workflow.clone();
            handles.push(tokio::spawn(
                async move { workflow.place_order(1, user_id).await },
            ));
        }

        let mut successes = 0;
        let mut exhausted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(OrderError::StockInsufficient) => exhausted += 1,
                Err(other) => panic!("unexpected error: {}", other),
            }
        }
        assert_eq!(successes, 5);
        assert_eq!(exhausted, 15);
        assert_eq!(repo.stock_of(1).await, Some(0));
        assert_eq!(repo.orders().await.len(), 5);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_last_unit_single_winner() {
        // Stock of one, two distinct users racing for it
        let (workflow, repo) = workflow_with(open_voucher(1, 1)).await;

        let a = {
            let workflow = workflow.clone();
            tokio::spawn(async move { workflow.place_order(1, 1).await })
        };
        let b = {
            let workflow = workflow.clone();
            tokio::spawn(async move { workflow.place_order(1, 2).await })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        let successes = results.iter().filter(|r| r.is_ok()).count();
        let rejected = results
            .iter()
            .filter(|r| matches!(r, Err(OrderError::StockInsufficient)))
            .count();
        assert_eq!(successes, 1);
        assert_eq!(rejected, 1);
        assert_eq!(repo.stock_of(1).await, Some(0));
    }

    #[tokio::test]
    async fn test_distinct_ids_across_orders() {
        let (workflow, _) = workflow_with(open_voucher(1, 10)).await;
        let first = workflow.place_order(1, 1).await.unwrap();
        let second = workflow.place_order(1, 2).await.unwrap();
        assert_ne!(first.order_id, second.order_id);
        assert!(second.order_id > first.order_id);
    }
}
