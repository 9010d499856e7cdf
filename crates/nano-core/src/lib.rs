//! # nano-core
//!
//! Foundation types shared by the NanoDesigner crates.
//!
//! - **IDs**: [`ids::JobId`] from the backend and locally generated [`ids::ConnectionId`]
//! - **Constants**: package name and version
//! - **Clock**: millisecond Unix timestamps used on the wire

#![deny(unsafe_code)]

pub mod clock;
pub mod constants;
pub mod ids;
