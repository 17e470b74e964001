pub mod config;
pub mod csv;
pub mod engine;
pub mod lock;
pub mod memory;
pub mod model;
pub mod price;
pub mod promo;
pub mod provider;
pub mod replay;
pub mod store;
pub mod trade_no;

pub use config::{ConfigStore, RebatePolicy, Settings};
pub use engine::{CreatedOrder, Settlement, TopupEngine, TopupError};
pub use model::{Ack, Order, OrderStatus, Quota, ReferralSource, UserId};
