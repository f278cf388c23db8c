pub mod connection;
mod broadcast;
mod registry;
mod router;
mod server;
mod signaling;

pub use registry::{now_millis, SessionRecord, SessionStatus};
pub use server::MonitorServer;
pub use signaling::{SignalMessage, SignalingHandler};
