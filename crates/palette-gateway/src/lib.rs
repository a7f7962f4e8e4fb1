//! HTTP and WebSocket gateway.
//!
//! Chat requests are acknowledged immediately and run as background turns;
//! everything a turn produces reaches the client over its session's socket.

pub mod connection;
pub mod error;
pub mod server;
pub mod state;

pub use error::ApiError;
pub use server::{build_router, start_gateway};
pub use state::GatewayState;
