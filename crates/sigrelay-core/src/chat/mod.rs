//! Per-chat state: rolling history, privacy mode, session overrides.

pub mod privacy;
pub mod state;
pub mod store;

pub use state::{ChatDefaults, ChatState, Override};
pub use store::ChatStore;
