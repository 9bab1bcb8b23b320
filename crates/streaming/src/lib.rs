pub mod client;
pub mod config;
pub mod protocol;
pub mod state;
pub mod store;
pub mod target;
pub mod tracker;

pub use client::*;
pub use config::*;
pub use protocol::*;
pub use state::*;
pub use store::*;
pub use target::*;
pub use tracker::*;
