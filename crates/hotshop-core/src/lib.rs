pub mod error;
pub mod model;
pub mod time;

pub use error::{CoreError, Result};
pub use model::{
    Order, OrderId, OrderStatus, PurchaseIntent, Shop, ShopId, ShopType, UserId, VoucherId, VoucherStock,
};
pub use time::{now_unix_millis, now_utc};
