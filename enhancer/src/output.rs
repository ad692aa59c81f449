//! Output formatting for enhancement passes.
//!
//! This module formats the tagged messages reported to the host, the pass
//! summary line, and the dry-run description printed by the CLI.

use crate::api::PersistenceApi;
use crate::module_name::ModuleName;
use camino::Utf8Path;
use std::io::Write;
use std::time::Duration;

/// Placeholder for absent message fields.
const ABSENT: &str = "-";

/// Context attached to every user-visible message.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageContext<'a> {
    /// Display name of the enhancer, if one is selected.
    pub enhancer: Option<&'a str>,
    /// Persistence API, if one is selected.
    pub api: Option<PersistenceApi>,
    /// Module being processed, if any.
    pub module: Option<&'a ModuleName>,
}

impl<'a> MessageContext<'a> {
    /// Returns a copy of the context scoped to `module`.
    #[must_use]
    pub fn for_module(self, module: &'a ModuleName) -> Self {
        Self {
            module: Some(module),
            ..self
        }
    }

    /// Formats `text` with the context tag.
    ///
    /// # Example
    ///
    /// ```
    /// use bytecode_enhancer::api::PersistenceApi;
    /// use bytecode_enhancer::module_name::ModuleName;
    /// use bytecode_enhancer::output::MessageContext;
    ///
    /// let module = ModuleName::from("core");
    /// let context = MessageContext {
    ///     enhancer: Some("DataNucleus"),
    ///     api: Some(PersistenceApi::Jdo),
    ///     module: Some(&module),
    /// };
    /// assert_eq!(
    ///     context.format("2 classes enhanced"),
    ///     "Enhancer | DataNucleus[JDO] |core| 2 classes enhanced"
    /// );
    /// ```
    #[must_use]
    pub fn format(&self, text: &str) -> String {
        let enhancer = self.enhancer.unwrap_or(ABSENT);
        let api = self.api.map_or(ABSENT, PersistenceApi::name);
        let module = self.module.map_or(ABSENT, ModuleName::as_str);
        format!("Enhancer | {enhancer}[{api}] |{module}| {text}")
    }
}

/// Format the completion message of a pass.
#[must_use]
pub fn success_message(count: usize, elapsed: Duration) -> String {
    let seconds = elapsed.as_secs();
    format!(
        "Successfully enhanced {count} class(es) in {} ms: {} min {} sec",
        elapsed.as_millis(),
        seconds / 60,
        seconds % 60
    )
}

/// Writes `message` and a newline to `stderr`, ignoring write failures.
pub fn write_stderr_line(stderr: &mut dyn Write, message: impl std::fmt::Display) {
    if writeln!(stderr, "{message}").is_err() {
        // Best-effort reporting; ignore write failures.
    }
}

/// Message reported when no module has anything to enhance.
pub const NOTHING_FOUND: &str = "no JDO/JPA metadata or annotated class files found";

/// Pass information for dry-run output.
///
/// # Example
///
/// ```
/// use bytecode_enhancer::api::PersistenceApi;
/// use bytecode_enhancer::module_name::ModuleName;
/// use bytecode_enhancer::output::DryRunInfo;
/// use camino::Utf8PathBuf;
///
/// let project = Utf8PathBuf::from("/work/shop/enhancer.toml");
/// let state = Utf8PathBuf::from("/work/shop/.enhancer/fingerprints.json");
/// let modules = vec![(ModuleName::from("core"), 2)];
///
/// let info = DryRunInfo {
///     project_file: &project,
///     state_file: &state,
///     enhancer: "DataNucleus",
///     api: PersistenceApi::Jpa,
///     full: false,
///     manual_dependencies: 0,
///     modules: &modules,
/// };
///
/// let output = info.display_text();
/// assert!(output.contains("Dry run"));
/// assert!(output.contains("core: 2 class(es)"));
/// ```
#[derive(Debug)]
pub struct DryRunInfo<'a> {
    /// Path to the project file.
    pub project_file: &'a Utf8Path,
    /// Path to the incremental state file.
    pub state_file: &'a Utf8Path,
    /// Display name of the selected enhancer.
    pub enhancer: &'a str,
    /// Selected persistence API.
    pub api: PersistenceApi,
    /// Whether fingerprints are ignored.
    pub full: bool,
    /// Number of manually pinned dependencies in use.
    pub manual_dependencies: usize,
    /// Modules with scheduled work and their item counts.
    pub modules: &'a [(ModuleName, usize)],
}

impl DryRunInfo<'_> {
    /// Format the dry-run information for display.
    #[must_use]
    pub fn display_text(&self) -> String {
        let mut lines = vec![
            "Dry run - no class files will be modified".to_owned(),
            String::new(),
            format!("Project file: {}", self.project_file),
            format!("State file: {}", self.state_file),
            format!("Enhancer: {}[{}]", self.enhancer, self.api),
            format!("Full rebuild: {}", self.full),
            format!("Manual dependencies: {}", self.manual_dependencies),
            String::new(),
        ];

        if self.modules.is_empty() {
            lines.push(NOTHING_FOUND.to_owned());
        } else {
            lines.push("Modules to enhance:".to_owned());
            for (module, count) in self.modules {
                lines.push(format!("  - {module}: {count} class(es)"));
            }
        }

        lines.join("\n")
    }
}
