//! sfmforge - Declarative multi-target build orchestrator
//!
//! Builds a fixed graph of native C++ projects (and a Python binding) from
//! source, keeping upstream checkouts aligned with the exact commits their
//! downstream consumers pin, then bundles runtime libraries and publishes
//! the results as release assets.
//!
//! # Architecture
//!
//! - Targets are declared in a YAML manifest; the built-in one covers the
//!   Ceres / COLMAP / GLOMAP / PoseLib / pycolmap stack
//! - Pins are read from the downstream's CMake fetch declarations and
//!   enforced before anything is built
//! - Every run is recorded as an append-only event log
//!
//! # Modules
//!
//! - `adapters`: External tools (git, CMake, objdump/dumpbin, wheel repair, GitHub)
//! - `core`: Manifest, pin resolution, graph execution, packaging, publishing
//! - `domain`: Data structures (Target, Event, BuildRun, Artifact)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Build everything, syncing pins first
//! sfmforge build
//!
//! # Rebuild glomap and its prerequisites from scratch, then package
//! sfmforge build glomap --clean --package --archive
//!
//! # Publish the archives
//! sfmforge publish v1.2.0 --dir dist
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;

// Re-export main types at crate root for convenience
pub use core::{Manifest, Orchestrator};
pub use domain::{BuildRun, Event, EventType, RunState, Target};
pub use error::ForgeError;
