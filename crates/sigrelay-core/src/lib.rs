//! Core domain + application logic for the Signal chat relay.
//!
//! This crate is framework-agnostic. The Signal gateway and the AI providers
//! live behind ports (traits) implemented in adapter crates.

pub mod catalog;
pub mod chat;
pub mod commands;
pub mod config;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod logging;
pub mod messaging;
pub mod model;
pub mod relay;

pub use errors::{Error, Result};
