//! Device session: state machine, lifecycle driver and inbound handlers

pub mod handler;
pub mod manager;
pub mod state;

pub use handler::{ForwardingHandler, InboundHandler, LoggingHandler};
pub use manager::SessionManager;
pub use state::{SessionEvent, SessionState};
