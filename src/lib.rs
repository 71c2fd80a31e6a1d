//! rtu_client: a Modbus RTU client for coils, discrete inputs, input
//! registers and holding registers on a serial line.
//!
//! The interesting part lives in [`api`]: a [`Transport`] hands out one
//! owned [`Reply`] per request, and each control of a [`RegisterPanel`]
//! keeps at most one of them in flight through a [`SingleFlight`] slot.
//! [`core`] drives the panels from a single-threaded event loop and
//! [`cli`] puts a command line and an interactive shell on top.

pub mod api;
#[doc(hidden)]
pub mod boot;
#[doc(hidden)]
pub mod cli;
pub mod core;
pub mod protocol;
#[doc(hidden)]
pub mod utils;

pub use api::*;
pub use boot::init_common;
