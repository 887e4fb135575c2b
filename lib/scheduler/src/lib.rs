//! Scheduling for timer-driven workflow triggers.
//!
//! This crate provides:
//!
//! - **Schedule specs**: validated recurrence definitions parsed from trigger config
//! - **Recurrence engine**: pure next-fire computation for six recurrence modes
//! - **Timers**: tokio tasks that fire a handler and re-arm until cancelled

pub mod error;
pub mod recurrence;
pub mod schedule;
pub mod timer;

pub use error::{FireError, ScheduleError};
pub use recurrence::{NextFire, Rearm, next_fire};
pub use schedule::{ScheduleMode, ScheduleSpec, TimeOfDay};
pub use timer::{FireHandler, TimerHandle, TimerKind, arm};
