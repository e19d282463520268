// Core module - Session lifecycle and receive pipeline
pub mod catalog;
pub mod framer;
pub mod record;
pub mod session;
pub mod sink;
pub mod transport;
