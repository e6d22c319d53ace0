//! Network subsystem.
//!
//! The snapshot service as a set of warp filters, served on a listener the service binds
//! itself so that ephemeral ports and shutdown stay under its control.
//!
//! Re-exports:
//! - [`ReceiverService`]: binds the listener and serves the snapshot slot.
//! - [`ReceiverHandle`]: running instance, used to find the bound address and to stop it.
//! - [`ReceiverSettings`]: listener parameters.

pub mod idle_timeout;
pub mod receiver;

pub use receiver::{ReceiverHandle, ReceiverService, ReceiverSettings};
