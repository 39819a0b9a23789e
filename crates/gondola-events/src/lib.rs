#![forbid(unsafe_code)]

//! # gondola-events
//!
//! Host-facing event bus for the gondola update runtime.
//!
//! The engine publishes two families of events: [`StateChange`] snapshots
//! emitted by the update state machine on every accepted transition, and
//! legacy one-shot [`UpdateNotice`] notifications kept for hosts that
//! predate the state machine. Both travel over the same [`EventBus`],
//! which drops out-of-order snapshots and caches the newest one for
//! subscribers that arrive after cold start.
//!
//! [`StateChange`]: Event::StateChange
//! [`UpdateNotice`]: Event::Notice

mod bus;
mod context;
mod event;

pub use bus::EventBus;
pub use context::{RollbackInfo, UpdateContext};
pub use event::{Event, StateChangeEventType, StateChangePayload, UpdateNotice};
