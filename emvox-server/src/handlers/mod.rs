//! HTTP and WebSocket request handlers organized by surface

pub mod realtime;
pub mod system;
pub mod tasks;
