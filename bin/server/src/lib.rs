//! missionctl trigger server.
//!
//! Hosts the listener supervisor behind an HTTP API: the workflow engine
//! reconciles trigger nodes here, and external services deliver webhook
//! events to the inbound routes.

pub mod bridge;
pub mod config;
pub mod error;
pub mod routes;
