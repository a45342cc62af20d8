// Re-export needed modules for testing
pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod reconciler;
pub mod session; // Live channel per identity
pub mod state;

// Re-export main types for convenience
pub use error::{ChatError, Result};
pub use models::*;
pub use reconciler::{ConversationKey, Reconciler};
pub use session::{ConnectionState, SessionConnector, SessionEvent};
pub use state::{ChatState, HistoryRequest};
