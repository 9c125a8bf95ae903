//! In-process event dispatch

pub mod bus;
pub mod handler;
pub mod types;

pub use bus::{EventBus, EventBusStats};
pub use handler::{async_handler_fn, handler_fn, EventHandler, HandlerError, HandlerResult};
pub use types::{Event, EventType};
