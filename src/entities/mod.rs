//! sea-orm entities backing the catalog, the site directory, the inventory
//! ledger and the transaction log.

pub mod inventory;
pub mod location;
pub mod product;
pub mod stock_movement;
pub mod transaction;
pub mod transaction_item;

pub use stock_movement::MovementType;
pub use transaction::{PaymentMethod, ReturnReason, TransactionStatus, TransactionType};
