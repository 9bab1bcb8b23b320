//! Live AIS client: drives the subscription state machine over websockets.

pub mod driver;
pub mod transport;

pub use driver::{spawn, LiveHandle};
pub use transport::{SocketEvent, SocketHandle};
