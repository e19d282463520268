// Session module - Serial session lifecycle
pub mod session;
pub mod state;

pub use session::SerialSession;
pub use state::{DisconnectReason, SessionState};
