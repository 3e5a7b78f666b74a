pub mod amount;
pub mod credit;
pub mod events;
pub mod health;
pub mod liquidation;
pub mod loan;
pub mod price;
pub mod repayment;

pub use amount::Amount;
pub use credit::*;
pub use events::*;
pub use health::*;
pub use liquidation::*;
pub use loan::*;
pub use price::*;
pub use repayment::*;
