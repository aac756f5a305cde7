//! Order management: the order/position data model and the per-key trade
//! engine that matches orders against candles.

pub mod engine;
pub mod types;

pub use engine::TradeEngine;
pub use types::{
    next_order_id, next_position_id, Order, OrderId, OrderStatus, OrderType, Overridable,
    Position, PositionId, PositionSummary,
};
