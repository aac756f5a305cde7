//! Synchronous lifecycle event fan-out
//!
//! Five event kinds cover the order/position lifecycle. Handlers run inline
//! within `publish`, in subscription order, before `publish` returns; there
//! is no queuing and no retry. A handler error propagates to the publisher
//! and fails the simulation step as a whole rather than silently dropping a
//! notification.
//!
//! The bus is a plain value owned by the simulation context and passed by
//! reference wherever events are produced — never a process-wide singleton.

use crate::error::ReplayError;
use crate::oms::{Order, Position};
use std::collections::HashMap;

/// The five lifecycle event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    OpenOrder,
    FilledOrder,
    CanceledOrder,
    OpenPosition,
    ClosedPosition,
}

/// A lifecycle event with its payload
#[derive(Debug, Clone)]
pub enum Event {
    OpenOrder(Order),
    FilledOrder(Order),
    CanceledOrder(Order),
    OpenPosition(Position),
    ClosedPosition(Position),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::OpenOrder(_) => EventKind::OpenOrder,
            Event::FilledOrder(_) => EventKind::FilledOrder,
            Event::CanceledOrder(_) => EventKind::CanceledOrder,
            Event::OpenPosition(_) => EventKind::OpenPosition,
            Event::ClosedPosition(_) => EventKind::ClosedPosition,
        }
    }

    /// The order payload, if this is an order event
    pub fn order(&self) -> Option<&Order> {
        match self {
            Event::OpenOrder(order) | Event::FilledOrder(order) | Event::CanceledOrder(order) => {
                Some(order)
            }
            _ => None,
        }
    }

    /// The position payload, if this is a position event
    pub fn position(&self) -> Option<&Position> {
        match self {
            Event::OpenPosition(position) | Event::ClosedPosition(position) => Some(position),
            _ => None,
        }
    }
}

/// Handler invoked synchronously for each published event of its kind
pub type EventHandler = Box<dyn FnMut(&Event) -> anyhow::Result<()>>;

/// Publish/subscribe fan-out for the five lifecycle event kinds
#[derive(Default)]
pub struct EventBus {
    handlers: HashMap<EventKind, Vec<EventHandler>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event kind. Handlers fire in subscription
    /// order.
    pub fn subscribe(&mut self, kind: EventKind, handler: EventHandler) {
        self.handlers.entry(kind).or_default().push(handler);
    }

    /// Deliver an event to every handler registered for its kind, in order.
    /// The first handler error aborts delivery and propagates.
    pub fn publish(&mut self, event: &Event) -> Result<(), ReplayError> {
        if let Some(handlers) = self.handlers.get_mut(&event.kind()) {
            for handler in handlers.iter_mut() {
                handler(event).map_err(ReplayError::Handler)?;
            }
        }
        Ok(())
    }

    /// Number of handlers registered for a kind
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.handlers.iter().map(|(kind, handlers)| (kind, handlers.len())))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Symbol, Timeframe};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn closed_position_event() -> Event {
        Event::ClosedPosition(Position::new(1, Symbol::new("BTCUSDT"), Timeframe::MIN1, 2))
    }

    #[test]
    fn test_handlers_fire_in_subscription_order() {
        let mut bus = EventBus::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = Rc::clone(&seen);
            bus.subscribe(
                EventKind::ClosedPosition,
                Box::new(move |_| {
                    seen.borrow_mut().push(tag);
                    Ok(())
                }),
            );
        }

        bus.publish(&closed_position_event()).unwrap();
        assert_eq!(*seen.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_only_matching_kind_is_notified() {
        let mut bus = EventBus::new();
        let count = Rc::new(RefCell::new(0));

        let counter = Rc::clone(&count);
        bus.subscribe(
            EventKind::OpenOrder,
            Box::new(move |_| {
                *counter.borrow_mut() += 1;
                Ok(())
            }),
        );

        bus.publish(&closed_position_event()).unwrap();
        assert_eq!(*count.borrow(), 0);
    }

    #[test]
    fn test_handler_error_propagates_and_halts_delivery() {
        let mut bus = EventBus::new();
        let reached = Rc::new(RefCell::new(false));

        bus.subscribe(
            EventKind::ClosedPosition,
            Box::new(|_| anyhow::bail!("subscriber rejected the position")),
        );
        let reached_flag = Rc::clone(&reached);
        bus.subscribe(
            EventKind::ClosedPosition,
            Box::new(move |_| {
                *reached_flag.borrow_mut() = true;
                Ok(())
            }),
        );

        let err = bus.publish(&closed_position_event()).unwrap_err();
        assert!(matches!(err, ReplayError::Handler(_)));
        assert!(!*reached.borrow(), "later handlers must not run after an error");
    }

    #[test]
    fn test_publish_without_subscribers_is_a_no_op() {
        let mut bus = EventBus::new();
        assert!(bus.publish(&closed_position_event()).is_ok());
        assert_eq!(bus.subscriber_count(EventKind::ClosedPosition), 0);
    }
}
