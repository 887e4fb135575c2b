//! Core domain types and utilities for missionctl.
//!
//! This crate provides the identifiers and error plumbing shared by the
//! scheduler, integration and trigger crates.

pub mod error;
pub mod id;

pub use error::{Result, flatten_report};
pub use id::{ParseIdError, TriggerNodeId, UserId, WorkflowId};
