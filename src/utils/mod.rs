//! Shared helpers that do not belong to any one layer.

pub mod form;

pub use form::*;
