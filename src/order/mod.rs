//! Flash-sale order creation
//!
//! Composes the distributed lock, the id generator and the relational-store
//! collaborator into the order-creation protocol: validate the sale window,
//! serialize the user's concurrent attempts behind a per-user lock, recheck
//! for duplicates inside the lock, decrement stock conditionally, persist,
//! commit, and only then release the lock.

mod repository;
mod types;
mod workflow;

pub mod memory;

pub use memory::InMemoryOrderRepository;
pub use repository::{OrderRepository, OrderTransaction};
pub use types::{OrderError, OrderReceipt, SeckillVoucher, VoucherOrder};
pub use workflow::{OrderConfig, OrderWorkflow};
