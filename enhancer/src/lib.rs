//! Incremental, module-scoped bytecode enhancement.
//!
//! This crate discovers persistence metadata and annotated class files in
//! the modules of a build, and drives a persistence enhancer once per module
//! inside an execution environment built for that module alone. Passes are
//! incremental: only classes whose fingerprint changed are resubmitted, and
//! a pass that does not account for every submitted class consumes nothing.
//! It is used by the `bytecode-enhancer` CLI binary and can be embedded in
//! other build tools through the [`host::CompileContext`] trait.
//!
//! # Modules
//!
//! - [`api`] - Persistence APIs and their annotations
//! - [`bridge`] - Version-probing enhancer binding
//! - [`classfile`] - Minimal JVM class-file reader
//! - [`cli`] - Command-line argument definitions
//! - [`config`] - Enhancer configuration and pass settings
//! - [`datanucleus`] - Built-in DataNucleus enhancer support
//! - [`discovery`] - Metadata and annotated class discovery
//! - [`environment`] - Isolated per-module execution environments
//! - [`error`] - Semantic error types
//! - [`exclusion`] - Dependency path normalisation and exclusion
//! - [`executor`] - External command execution
//! - [`host`] - Host build system collaborator
//! - [`list`] - Listing of discovered classes
//! - [`metadata`] - Persistence metadata file parsing
//! - [`module_name`] - Semantic wrapper for module names
//! - [`orchestrator`] - Module-by-module enhancement passes
//! - [`output`] - Message and summary formatting
//! - [`pipeline`] - Enhancement pipeline behind the CLI
//! - [`project`] - Project files and the filesystem host
//! - [`registry`] - Processing items and fingerprint state
//! - [`support`] - Enhancer descriptors and registry

pub mod api;
pub mod bridge;
pub mod classfile;
pub mod cli;
pub mod config;
pub mod datanucleus;
pub mod discovery;
pub mod environment;
pub mod error;
pub mod exclusion;
pub mod executor;
pub mod host;
pub mod list;
pub mod metadata;
pub mod module_name;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod project;
pub mod registry;
pub mod support;

#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;
