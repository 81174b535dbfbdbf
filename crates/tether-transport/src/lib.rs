//! # Tether Transport
//!
//! Peer-side plumbing every traversal technique builds on:
//!
//! - [`control_channel`]: the lazily connected link to the mediator carrying
//!   register, deregister and connection-request traffic
//! - [`keep_alive`]: the cancellable periodic registration refresh
//! - [`socket`]: address-reuse sockets sharing the control connection's port
//! - [`config`]: timeouts, keep-alive period and local port

#![forbid(unsafe_code)]

pub mod config;
pub mod control_channel;
pub mod keep_alive;
pub mod socket;

pub use config::ControlChannelConfig;
pub use control_channel::ControlChannel;
pub use keep_alive::{KeepAliveFailure, KeepAliveTask, SharedWriter};
