// Reference data
pub mod catalog;
pub mod locations;

// Stock ledger and the transactions that drive it
pub mod ledger;
pub mod transactions;
