//! Trigger listener lifecycle for missionctl workflows.
//!
//! This crate provides:
//!
//! - **Trigger contract**: validate, start and stop listeners for every [`TriggerKind`]
//! - **Adapters**: scheduled timers, chat bots, spreadsheet watchers and passive routes
//! - **Listener registry**: at most one listener per node and per external identity
//! - **Event filtering**: debounce, dedup and mention rules for chat messages
//! - **Shutdown**: one coordinator that releases every listener on exit
//! - **Supervisor**: reconciles a workflow's trigger nodes with running listeners

mod adapters;
pub mod config;
pub mod context;
pub mod debounce;
pub mod dedup;
pub mod error;
pub mod filter;
pub mod inbound;
pub mod kind;
pub mod registry;
pub mod services;
pub mod settings;
pub mod shutdown;
pub mod supervisor;
pub mod trigger;

pub use config::{MessageMode, Secret, TriggerConfig, UniqueKey};
pub use context::{
    ExecutionBridge, ListenerStore, ListenerTarget, PayloadFormat, RawStartRequest, RawStopRequest, ResourceDetail,
    ResourceInfo, StartContext, StopContext, TriggerDetails, TriggerPayload,
};
pub use dedup::DedupCache;
pub use error::{ErrorType, ExecutionError, RegistryError, TriggerFailure};
pub use inbound::{InboundHandler, InboundKey, InboundRouter};
pub use kind::{ConfigField, FieldType, TriggerCategory, TriggerKind, TriggerMetadata};
pub use registry::{ListenerHandle, ListenerRecord, ListenerRegistry};
pub use services::TriggerServices;
pub use settings::{PlatformEndpoints, TriggerSettings};
pub use shutdown::ShutdownCoordinator;
pub use supervisor::{ListenerSupervisor, NodeFailure, ReconcileReport, TriggerNode};
pub use trigger::TriggerRuntime;
