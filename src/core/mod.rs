//! Core orchestration logic.
//!
//! This module contains:
//! - Manifest: target declarations, selection and validation
//! - PinResolver: aligns upstream checkouts with downstream commit pins
//! - Executor: builds the target graph in topological order
//! - Packager: bundles runtime dependencies into install trees
//! - Publisher: attaches artifacts to a tagged release
//! - EventStore: append-only run log
//! - Orchestrator: composes all of the above into one run

pub mod event_store;
pub mod executor;
pub mod fetch_parser;
pub mod graph;
pub mod lock;
pub mod manifest;
pub mod orchestrator;
pub mod packaging;
pub mod patch;
pub mod pin_resolver;
pub mod publisher;
pub mod search;
pub mod template;

// Re-export commonly used types
pub use event_store::{EventStore, RunLog};
pub use executor::{ExecuteOptions, ExecutionReport, Executor, InstallMarker};
pub use graph::topological_order;
pub use lock::RunLock;
pub use manifest::Manifest;
pub use orchestrator::{Adapters, BuildRequest, Orchestrator, PlanEntry, RunOutcome};
pub use packaging::{Packager, PackagingSettings};
pub use patch::PatchOutcome;
pub use pin_resolver::PinResolver;
pub use publisher::{PublishRequest, PublishResult, Publisher};
