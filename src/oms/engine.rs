//! Order matching and position tracking
//!
//! One `TradeEngine` per (strategy, symbol, timeframe) triple. On each tick it
//! evaluates every open order against the latest candle with an intra-candle
//! touch test, fills or activates them, and applies fills to the current
//! position. Lifecycle events are published synchronously through the bus the
//! caller passes in.

use crate::error::ReplayError;
use crate::events::{Event, EventBus};
use crate::oms::types::{next_order_id, Order, OrderId, OrderStatus, Position};
use crate::{Candle, Side, Symbol, Timeframe};
use std::collections::BTreeMap;
use tracing::debug;

/// Order matching and position state for one (strategy, symbol, timeframe) key
pub struct TradeEngine {
    strategy_id: u32,
    symbol: Symbol,
    timeframe: Timeframe,
    price_precision: u32,

    /// Open orders keyed by id. Ids are monotonic, so BTreeMap iteration
    /// order equals insertion order and fills stay deterministic.
    open_orders: BTreeMap<OrderId, Order>,

    /// Current position; replaced with a fresh value when one fully closes
    position: Position,

    /// Timestamp of the latest tick, stamped onto submitted/canceled orders
    clock: i64,
}

impl TradeEngine {
    pub fn new(
        strategy_id: u32,
        symbol: Symbol,
        timeframe: Timeframe,
        price_precision: u32,
    ) -> Self {
        let position = Position::new(strategy_id, symbol.clone(), timeframe, price_precision);
        Self {
            strategy_id,
            symbol,
            timeframe,
            price_precision,
            open_orders: BTreeMap::new(),
            position,
            clock: 0,
        }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    /// Current position (open, partially exited, or still empty)
    pub fn position(&self) -> &Position {
        &self.position
    }

    /// Open orders in insertion order
    pub fn open_orders(&self) -> impl Iterator<Item = &Order> {
        self.open_orders.values()
    }

    pub fn get_order(&self, id: OrderId) -> Result<&Order, ReplayError> {
        self.open_orders.get(&id).ok_or(ReplayError::OrderNotFound(id))
    }

    /// Align the engine clock with the global replay clock; submissions made
    /// before this engine's own tick are stamped with the current timestamp.
    pub(crate) fn set_clock(&mut self, timestamp: i64) {
        self.clock = timestamp;
    }

    /// Register a new order and publish the open-order event. The order is
    /// first evaluated on the next `tick`, never re-entrantly on this one.
    pub fn submit_order(
        &mut self,
        side: Side,
        percentage: f64,
        limit_price: Option<f64>,
        stop_price: Option<f64>,
        reduce_only: bool,
        comment: impl Into<String>,
        bus: &mut EventBus,
    ) -> Result<Order, ReplayError> {
        if !(percentage > 0.0 && percentage <= 100.0) {
            return Err(ReplayError::InvalidOrder(format!(
                "percentage {percentage} outside (0, 100]"
            )));
        }
        for (name, price) in [("limit_price", limit_price), ("stop_price", stop_price)] {
            if let Some(price) = price {
                if !price.is_finite() || price <= 0.0 {
                    return Err(ReplayError::InvalidOrder(format!(
                        "{name} {price} is not a positive finite price"
                    )));
                }
            }
        }

        let order = Order {
            id: next_order_id(),
            strategy_id: self.strategy_id,
            symbol: self.symbol.clone(),
            timeframe: self.timeframe,
            side,
            percentage,
            limit_price,
            stop_price,
            reduce_only,
            comment: comment.into(),
            activated: stop_price.is_none(),
            status: OrderStatus::Open,
            open_timestamp: self.clock,
            close_timestamp: None,
            filled_price: None,
        };
        debug!(
            id = order.id,
            symbol = %order.symbol,
            side = %order.side,
            percentage,
            order_type = ?order.order_type(),
            "order submitted"
        );
        self.open_orders.insert(order.id, order.clone());
        bus.publish(&Event::OpenOrder(order.clone()))?;
        Ok(order)
    }

    /// Submit an entry order (grows the position)
    pub fn entry(
        &mut self,
        side: Side,
        percentage: f64,
        limit_price: Option<f64>,
        stop_price: Option<f64>,
        comment: impl Into<String>,
        bus: &mut EventBus,
    ) -> Result<Order, ReplayError> {
        self.submit_order(side, percentage, limit_price, stop_price, false, comment, bus)
    }

    /// Submit a reduce-only exit order against the open position, on the
    /// opposite side of the position.
    pub fn exit(
        &mut self,
        percentage: f64,
        limit_price: Option<f64>,
        stop_price: Option<f64>,
        comment: impl Into<String>,
        bus: &mut EventBus,
    ) -> Result<Order, ReplayError> {
        let side = match self.position.side() {
            Some(side) if self.position.is_open() => side.opposite(),
            _ => {
                return Err(ReplayError::NoPosition {
                    symbol: self.symbol.clone(),
                    timeframe: self.timeframe,
                })
            }
        };
        self.submit_order(side, percentage, limit_price, stop_price, true, comment, bus)
    }

    /// Cancel a still-open order
    pub fn cancel_order(&mut self, id: OrderId, bus: &mut EventBus) -> Result<Order, ReplayError> {
        let mut order = self
            .open_orders
            .remove(&id)
            .ok_or(ReplayError::OrderNotFound(id))?;
        order.status = OrderStatus::Canceled;
        order.close_timestamp = Some(self.clock);
        debug!(id = order.id, symbol = %order.symbol, "order canceled");
        bus.publish(&Event::CanceledOrder(order.clone()))?;
        Ok(order)
    }

    /// Cancel every open order, in insertion order
    pub fn cancel_all_orders(&mut self, bus: &mut EventBus) -> Result<(), ReplayError> {
        let ids: Vec<OrderId> = self.open_orders.keys().copied().collect();
        for id in ids {
            self.cancel_order(id, bus)?;
        }
        Ok(())
    }

    /// Evaluate all open orders against the tick's candle, then absorb the
    /// candle range into the position's run-up/drawdown extremes.
    ///
    /// Orders are evaluated in insertion order against a snapshot of the
    /// open set, so orders registered by event handlers during this tick are
    /// first matched on the next one.
    pub fn tick(&mut self, candle: &Candle, bus: &mut EventBus) -> Result<(), ReplayError> {
        self.clock = candle.timestamp;

        let ids: Vec<OrderId> = self.open_orders.keys().copied().collect();
        for id in ids {
            self.evaluate_order(id, candle, bus)?;
        }

        // Extremes accrue every tick, not only on fills
        self.position.track_range(candle.high, candle.low);
        Ok(())
    }

    fn evaluate_order(
        &mut self,
        id: OrderId,
        candle: &Candle,
        bus: &mut EventBus,
    ) -> Result<(), ReplayError> {
        let fill_price = {
            let Some(order) = self.open_orders.get_mut(&id) else {
                return Ok(());
            };

            // Stop orders activate on a touch of the candle's full range.
            // An activated stop can fill within the same tick.
            if !order.activated {
                match order.stop_price {
                    Some(stop) if candle.touches(stop) => {
                        order.activated = true;
                        debug!(id = order.id, stop, "stop order activated");
                    }
                    _ => return Ok(()),
                }
            }

            match order.limit_price {
                // Market (or activated stop-market): fills at the candle open
                None => candle.open,
                Some(limit) if candle.touches(limit) => limit,
                Some(_) => return Ok(()),
            }
        };

        let Some(mut order) = self.open_orders.remove(&id) else {
            return Ok(());
        };
        order.status = OrderStatus::Filled;
        order.close_timestamp = Some(candle.timestamp);
        order.filled_price = Some(fill_price);
        debug!(
            id = order.id,
            symbol = %order.symbol,
            side = %order.side,
            price = fill_price,
            "order filled"
        );
        bus.publish(&Event::FilledOrder(order.clone()))?;

        self.apply_to_position(order, bus)
    }

    fn apply_to_position(&mut self, order: Order, bus: &mut EventBus) -> Result<(), ReplayError> {
        if order.reduce_only {
            if self.position.entry_orders.is_empty() {
                // A leftover protective order filled after its position
                // already closed; exits require an entry first.
                return Err(ReplayError::NoPosition {
                    symbol: self.symbol.clone(),
                    timeframe: self.timeframe,
                });
            }
            self.position.record_exit(order);
            if self.position.is_closed() {
                let closed = std::mem::replace(
                    &mut self.position,
                    Position::new(
                        self.strategy_id,
                        self.symbol.clone(),
                        self.timeframe,
                        self.price_precision,
                    ),
                );
                debug!(%closed, "position closed");
                bus.publish(&Event::ClosedPosition(closed))?;
            }
        } else {
            self.position.record_entry(order);
            if self.position.entry_orders.len() == 1 {
                bus.publish(&Event::OpenPosition(self.position.clone()))?;
            }
        }
        Ok(())
    }
}
