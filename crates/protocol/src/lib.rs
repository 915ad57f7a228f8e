//! Workbay Protocol
//!
//! Shared types for communication between the Workbay server and observers.
//! These types are serialized as JSON over WebSocket.

use uuid::Uuid;

// Re-exports
pub mod observer;
pub mod types;

pub use observer::ObserverEvent;
pub use types::*;

/// Generate a new unique ID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
