//! Core infrastructure for bulwark.
//!
//! This crate provides functionality shared by every bulwark component:
//! - [`ComponentEvent`] and the [`EventListeners`] each component reports to
//! - The [`ResilienceError`] taxonomy that component errors convert into

pub mod error;
pub mod events;

pub use error::ResilienceError;
pub use events::{ComponentEvent, EventListener, EventListeners, FnListener};
