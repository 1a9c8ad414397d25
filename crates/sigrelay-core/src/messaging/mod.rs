//! Messenger abstractions (Signal today).

pub mod port;
pub mod throttled;
pub mod types;
