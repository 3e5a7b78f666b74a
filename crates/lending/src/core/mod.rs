pub mod collateral_vault;
pub mod context;
pub mod credit_risk;
pub mod health_monitor;
pub mod liquidation_engine;
pub mod loan_originator;
pub mod pool_ledger;
pub mod repayment_processor;
pub mod retry;

pub use context::EngineContext;
