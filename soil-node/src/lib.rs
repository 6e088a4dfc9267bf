//! SoilLink for Linux: telemetry sender, hub responder and the transports they run over.

pub mod ack;
pub mod air;
pub mod config;
pub mod hub;
pub mod sender;
pub mod sim;
pub mod state;

pub use sender::{InitError, SendOutcome, Sender};
