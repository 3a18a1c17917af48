//! Domain types for the sfmforge orchestrator.
//!
//! This module contains the core data structures:
//! - Target: declared buildable units
//! - Pins: commit constraints and sync results
//! - BuildRecord / BuildRun: execution state
//! - Events: immutable records of state changes
//! - Artifact: packaged outputs

pub mod artifact;
pub mod events;
pub mod pin;
pub mod record;
pub mod run;
pub mod target;

// Re-export commonly used types
pub use artifact::Artifact;
pub use events::{Event, EventType};
pub use pin::{CommitId, PinDeclaration, SyncResult};
pub use record::{BuildRecord, BuildStatus};
pub use run::{BuildRun, RunState};
pub use target::{BuildSpec, PackageSpec, PatchSpec, PinSpec, Target};
