//! Order aggregate and its status state machine.

mod model;
mod status;

pub use model::{Address, Order, OrderItem};
pub use status::{OrderStatus, Transition};
