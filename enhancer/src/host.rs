//! Host build-system collaborator.
//!
//! The orchestrator never inspects the host's project model directly. It
//! asks a [`CompileContext`] for the affected modules, their output
//! directories and dependencies, and reports progress and messages back
//! through it. The CLI implements this trait over a project file (see
//! [`crate::project`]); IDE or build-tool integrations provide their own.

use crate::module_name::ModuleName;
use camino::Utf8PathBuf;
use std::fmt;

/// Severity of a user-visible message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MessageCategory {
    /// Diagnostic detail, hidden unless verbose output is requested.
    Debug,
    /// Informational progress.
    Information,
    /// Something was skipped or looks wrong but the pass continues.
    Warning,
    /// A module or the whole pass failed.
    Error,
}

impl fmt::Display for MessageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Debug => "debug",
            Self::Information => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

/// The host surface used during a single enhancement pass.
///
/// Implementations are driven from one thread; methods take `&self` so the
/// host can be shared by reference with the orchestrator, discovery, and the
/// environment factory at the same time.
pub trait CompileContext {
    /// Modules affected by the current build, in host order.
    fn affected_modules(&self) -> Vec<ModuleName>;

    /// The module's production class output directory, if it has one.
    fn output_directory(&self, module: &ModuleName) -> Option<Utf8PathBuf>;

    /// The module's test class output directory, if it has one.
    fn test_output_directory(&self, module: &ModuleName) -> Option<Utf8PathBuf>;

    /// Every compiler output directory in the project, for cross-module
    /// resolution.
    fn all_output_directories(&self) -> Vec<Utf8PathBuf>;

    /// The module's resolved compile-time library dependencies.
    fn project_libraries(&self, module: &ModuleName) -> Vec<Utf8PathBuf>;

    /// Qualified names of classes in `module` carrying any of `annotations`.
    fn annotated_classes(&self, module: &ModuleName, annotations: &[&str]) -> Vec<String>;

    /// Returns `true` once the user asked to cancel the build.
    fn is_cancelled(&self) -> bool;

    /// Reports progress as a fraction in `0.0..=1.0`.
    fn set_progress(&self, fraction: f64);

    /// Reports a user-visible message.
    fn add_message(&self, category: MessageCategory, message: &str);
}
