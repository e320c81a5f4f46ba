//! Network subsystem: ingest socket and its connection target

pub mod channel;
pub mod endpoint;
pub mod token;

pub use channel::{ChannelEvent, ChannelOptions, ConnectionState, TransportChannel};
pub use endpoint::ConnectionTarget;
pub use token::{extract_csrf_token, fetch_csrf_token};
