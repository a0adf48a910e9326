//! Domain records shared between the cache, admission and persistence layers.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{CoreError, Result};

pub type ShopId = i64;
pub type VoucherId = i64;
pub type UserId = i64;
pub type OrderId = i64;

/// A catalog shop, the canonical hot read served through the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shop {
    pub id: ShopId,
    pub name: String,
    pub type_id: i64,
    #[serde(default)]
    pub images: String,
    #[serde(default)]
    pub area: Option<String>,
    pub address: String,
    pub x: f64,
    pub y: f64,
    /// Average price in cents
    #[serde(default)]
    pub avg_price: Option<i64>,
    #[serde(default)]
    pub sold: i32,
    #[serde(default)]
    pub comments: i32,
    /// Score multiplied by 10
    #[serde(default)]
    pub score: i32,
    #[serde(default)]
    pub open_hours: Option<String>,
}

impl Shop {
    /// Rejects records that cannot be written back to the system of record.
    pub fn validate(&self) -> Result<()> {
        if self.id <= 0 {
            return Err(CoreError::invalid_id(self.id.to_string()));
        }
        if self.name.trim().is_empty() {
            return Err(CoreError::invalid_data("shop name must not be empty"));
        }
        Ok(())
    }
}

/// Shop category, cached as a list ordered by `sort`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShopType {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub icon: String,
    pub sort: i32,
}

/// Authoritative stock row of a flash-sale voucher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoucherStock {
    pub voucher_id: VoucherId,
    pub stock: i32,
}

/// Message published after a successful admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseIntent {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub voucher_id: VoucherId,
}

impl PurchaseIntent {
    pub fn new(order_id: OrderId, user_id: UserId, voucher_id: VoucherId) -> Self {
        Self {
            order_id,
            user_id,
            voucher_id,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}

/// Order status as stored in the order table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Unpaid,
    Paid,
    Consumed,
    Cancelled,
    Refunding,
    Refunded,
}

impl OrderStatus {
    pub fn code(self) -> i16 {
        match self {
            OrderStatus::Unpaid => 1,
            OrderStatus::Paid => 2,
            OrderStatus::Consumed => 3,
            OrderStatus::Cancelled => 4,
            OrderStatus::Refunding => 5,
            OrderStatus::Refunded => 6,
        }
    }

    pub fn from_code(code: i16) -> Result<Self> {
        match code {
            1 => Ok(OrderStatus::Unpaid),
            2 => Ok(OrderStatus::Paid),
            3 => Ok(OrderStatus::Consumed),
            4 => Ok(OrderStatus::Cancelled),
            5 => Ok(OrderStatus::Refunding),
            6 => Ok(OrderStatus::Refunded),
            other => Err(CoreError::invalid_data(format!(
                "unknown order status code {other}"
            ))),
        }
    }
}

/// A persisted voucher order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub voucher_id: VoucherId,
    pub status: OrderStatus,
    pub created_at: OffsetDateTime,
}

impl Order {
    /// Builds the unpaid order for an admitted purchase.
    pub fn from_intent(intent: &PurchaseIntent) -> Self {
        Self {
            id: intent.order_id,
            user_id: intent.user_id,
            voucher_id: intent.voucher_id,
            status: OrderStatus::Unpaid,
            created_at: crate::time::now_utc(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_purchase_intent_wire_format() {
        let intent = PurchaseIntent::new(7, 3, 11);
        let json = intent.to_json().unwrap();
        assert_eq!(json, r#"{"orderId":7,"userId":3,"voucherId":11}"#);
        assert_eq!(PurchaseIntent::from_json(&json).unwrap(), intent);
    }

    #[test]
    fn test_order_status_codes() {
        for status in [
            OrderStatus::Unpaid,
            OrderStatus::Paid,
            OrderStatus::Consumed,
            OrderStatus::Cancelled,
            OrderStatus::Refunding,
            OrderStatus::Refunded,
        ] {
            assert_eq!(OrderStatus::from_code(status.code()).unwrap(), status);
        }
        assert!(OrderStatus::from_code(9).is_err());
    }

    #[test]
    fn test_shop_validation() {
        let mut shop = Shop {
            id: 1,
            name: "Tea House".into(),
            type_id: 1,
            images: String::new(),
            area: None,
            address: "1 Main St".into(),
            x: 120.1,
            y: 30.2,
            avg_price: Some(8000),
            sold: 0,
            comments: 0,
            score: 45,
            open_hours: None,
        };
        assert!(shop.validate().is_ok());
        shop.name = "  ".into();
        assert!(shop.validate().is_err());
        shop.id = 0;
        assert!(matches!(shop.validate(), Err(CoreError::InvalidId(_))));
    }

    #[test]
    fn test_order_from_intent_is_unpaid() {
        let order = Order::from_intent(&PurchaseIntent::new(1, 2, 3));
        assert_eq!(order.status, OrderStatus::Unpaid);
        assert_eq!((order.id, order.user_id, order.voucher_id), (1, 2, 3));
    }
}
