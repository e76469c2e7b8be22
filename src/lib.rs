//! Savings-circle ledger: contributions, penalty accrual, the payment
//! waterfall, loan eligibility and amortization, over an injected store.

pub mod amortization;
pub mod analysis;
pub mod config;
pub mod contributions;
pub mod eligibility;
pub mod error;
pub mod events;
pub mod ledger;
pub mod loans;
pub mod model;
pub mod penalty;
pub mod roles;
pub mod simulation;
pub mod store;
pub mod types;
pub mod waterfall;
