//! Short-lived HTTP listener that captures one authorization redirect.

mod config;
mod http;
mod server;

pub use config::LocalServerConfig;
pub use server::{CaptureHandle, CapturePhase, LocalServer};
