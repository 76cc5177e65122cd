pub mod connection;
pub mod handler;
pub mod manager;
pub mod protocol;

pub use connection::Connection;
pub use handler::{run_event_forwarder, websocket_handler};
pub use manager::ConnectionManager;
pub use protocol::{channel_for, ClientMessage, ServerMessage};
