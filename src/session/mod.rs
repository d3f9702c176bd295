//! Session management
//!
//! A session is one signaling connection: what it owns and how requests made
//! on its behalf are dispatched.

pub mod handler;
pub mod state;

pub use handler::SignalHandler;
pub use state::{NotificationSender, SessionPhase, SessionState};
