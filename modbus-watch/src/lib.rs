//! Modbus TCP monitor.
//!
//! Polls a controller's input registers, decodes the identifier, position
//! and force fields and displays the latest reading.
//!
//! # Register layout
//!
//! ```text
//! offset 0..=2   identifier (ASCII, byte-swapped per register)
//! offset 20      position
//! offset 21      force
//! ```
//!
//! Each monitored address gets its own [`poller::Poller`], which owns its
//! [`supervisor::ConnectionSupervisor`], transport and display sink.

pub mod clock;
pub mod config;
pub mod decoder;
pub mod display;
pub mod poller;
pub mod supervisor;
pub mod transport;
