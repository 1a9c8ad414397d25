//! Provider-agnostic model ports and the dispatcher that routes to them.

pub mod client;
pub mod dispatch;
pub mod image;
pub mod types;

pub use dispatch::Dispatcher;
