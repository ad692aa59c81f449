//! Project files and the filesystem-backed host.
//!
//! A project file (`enhancer.toml`) carries the `[enhancer]` configuration
//! table and one `[[module]]` table per module of the build graph:
//!
//! ```toml
//! [enhancer]
//! api = "jdo"
//!
//! [[module]]
//! name = "core"
//! output_dir = "core/target/classes"
//! test_output_dir = "core/target/test-classes"
//! libraries = ["lib/datanucleus-core-6.0.1.jar"]
//! ```
//!
//! Relative paths are resolved against the directory holding the project
//! file. [`ProjectHost`] answers the orchestrator's host queries from the
//! loaded modules and writes messages to a stream.

use crate::classfile;
use crate::config::EnhancerConfig;
use crate::error::{EnhanceError, Result};
use crate::host::{CompileContext, MessageCategory};
use crate::module_name::ModuleName;
use crate::output::write_stderr_line;
use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::io::Write;
use walkdir::WalkDir;

/// Default project file name.
pub const PROJECT_FILENAME: &str = "enhancer.toml";

/// One module of the build graph.
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ModuleSpec {
    /// Module name.
    pub name: ModuleName,
    /// Production class output directory.
    pub output_dir: Option<Utf8PathBuf>,
    /// Test class output directory.
    #[serde(default)]
    pub test_output_dir: Option<Utf8PathBuf>,
    /// Resolved compile-time libraries, in classpath order.
    #[serde(default)]
    pub libraries: Vec<Utf8PathBuf>,
}

/// A parsed project file.
#[derive(Clone, Debug, Default, Deserialize, Serialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectFile {
    /// Enhancement configuration.
    pub enhancer: EnhancerConfig,
    /// Modules in host order.
    #[serde(rename = "module")]
    pub modules: Vec<ModuleSpec>,
}

impl ProjectFile {
    /// Reads and parses the project file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`EnhanceError::InvalidProjectFile`] when the file cannot be
    /// read, is not valid TOML for a project, or names a module twice.
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| invalid(path, e.to_string()))?;
        Self::parse(&content, path)
    }

    /// Parses project file `content` read from `path`.
    ///
    /// # Errors
    ///
    /// See [`Self::load`].
    pub fn parse(content: &str, path: &Utf8Path) -> Result<Self> {
        let mut project: Self = toml::from_str(content).map_err(|e| invalid(path, e.to_string()))?;

        let mut seen: Vec<&ModuleName> = Vec::new();
        for module in &project.modules {
            if seen.contains(&&module.name) {
                return Err(invalid(path, format!("module {} is declared twice", module.name)));
            }
            seen.push(&module.name);
        }

        project.resolve_paths(&project_root(path));
        Ok(project)
    }

    fn resolve_paths(&mut self, root: &Utf8Path) {
        for module in &mut self.modules {
            resolve_option(root, &mut module.output_dir);
            resolve_option(root, &mut module.test_output_dir);
            for library in &mut module.libraries {
                resolve(root, library);
            }
        }
        for dependency in &mut self.enhancer.dependencies {
            resolve(root, &mut dependency.path);
        }
        for excluded in &mut self.enhancer.excluded_dependencies {
            resolve(root, excluded);
        }
    }
}

/// Directory holding the project file at `path`.
#[must_use]
pub fn project_root(path: &Utf8Path) -> Utf8PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent.to_owned(),
        _ => Utf8PathBuf::from("."),
    }
}

fn invalid(path: &Utf8Path, reason: String) -> EnhanceError {
    EnhanceError::InvalidProjectFile {
        path: path.to_owned(),
        reason,
    }
}

fn resolve(root: &Utf8Path, path: &mut Utf8PathBuf) {
    if path.is_relative() {
        *path = root.join(&*path);
    }
}

fn resolve_option(root: &Utf8Path, path: &mut Option<Utf8PathBuf>) {
    if let Some(path) = path {
        resolve(root, path);
    }
}

/// Output settings for [`ProjectHost`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Reporting {
    /// Suppress information messages.
    pub quiet: bool,
    /// Verbosity level; debug messages need 1, progress lines need 2.
    pub verbosity: u8,
}

impl Reporting {
    fn shows(self, category: MessageCategory) -> bool {
        match category {
            MessageCategory::Debug => self.verbosity > 0,
            MessageCategory::Information => !self.quiet,
            MessageCategory::Warning | MessageCategory::Error => true,
        }
    }
}

/// A host backed by a project file's modules.
///
/// Class output directories are scanned directly; annotated classes are
/// found by decoding every class file under the module's output
/// directories. Passes run to completion: the host never reports
/// cancellation.
pub struct ProjectHost<'a> {
    modules: &'a [ModuleSpec],
    include_test_classes: bool,
    reporting: Reporting,
    sink: RefCell<&'a mut dyn Write>,
}

impl<'a> ProjectHost<'a> {
    /// Creates a host over `modules` writing messages to `sink`.
    pub fn new(
        modules: &'a [ModuleSpec],
        include_test_classes: bool,
        reporting: Reporting,
        sink: &'a mut dyn Write,
    ) -> Self {
        Self {
            modules,
            include_test_classes,
            reporting,
            sink: RefCell::new(sink),
        }
    }

    fn module(&self, name: &ModuleName) -> Option<&'a ModuleSpec> {
        self.modules.iter().find(|module| module.name == *name)
    }

    fn class_directories(&self, spec: &'a ModuleSpec) -> Vec<&'a Utf8Path> {
        let mut directories: Vec<&Utf8Path> =
            spec.output_dir.iter().map(Utf8PathBuf::as_path).collect();
        if self.include_test_classes {
            directories.extend(spec.test_output_dir.iter().map(Utf8PathBuf::as_path));
        }
        directories
    }

    fn write_line(&self, message: impl std::fmt::Display) {
        let mut sink = self.sink.borrow_mut();
        write_stderr_line(&mut **sink, message);
    }
}

impl CompileContext for ProjectHost<'_> {
    fn affected_modules(&self) -> Vec<ModuleName> {
        self.modules.iter().map(|module| module.name.clone()).collect()
    }

    fn output_directory(&self, module: &ModuleName) -> Option<Utf8PathBuf> {
        self.module(module)
            .and_then(|spec| spec.output_dir.clone())
            .filter(|dir| dir.is_dir())
    }

    fn test_output_directory(&self, module: &ModuleName) -> Option<Utf8PathBuf> {
        self.module(module)
            .and_then(|spec| spec.test_output_dir.clone())
            .filter(|dir| dir.is_dir())
    }

    fn all_output_directories(&self) -> Vec<Utf8PathBuf> {
        self.modules
            .iter()
            .flat_map(|module| module.output_dir.iter().chain(&module.test_output_dir))
            .filter(|dir| dir.is_dir())
            .cloned()
            .collect()
    }

    fn project_libraries(&self, module: &ModuleName) -> Vec<Utf8PathBuf> {
        self.module(module)
            .map(|spec| spec.libraries.clone())
            .unwrap_or_default()
    }

    fn annotated_classes(&self, module: &ModuleName, annotations: &[&str]) -> Vec<String> {
        let Some(spec) = self.module(module) else {
            return Vec::new();
        };
        let mut found: Vec<String> = Vec::new();
        for directory in self.class_directories(spec) {
            for class_name in scan_annotated(directory, annotations) {
                if !found.contains(&class_name) {
                    found.push(class_name);
                }
            }
        }
        found
    }

    fn is_cancelled(&self) -> bool {
        false
    }

    fn set_progress(&self, fraction: f64) {
        if self.reporting.verbosity > 1 {
            let percent = (fraction.clamp(0.0, 1.0) * 100.0).round();
            self.write_line(format!("progress: {percent}%"));
        }
    }

    fn add_message(&self, category: MessageCategory, message: &str) {
        if self.reporting.shows(category) {
            self.write_line(format!("{category}: {message}"));
        }
    }
}

/// Qualified names of the classes under `directory` carrying any of
/// `annotations`, in path order. Unreadable or malformed class files are
/// skipped.
#[must_use]
pub fn scan_annotated(directory: &Utf8Path, annotations: &[&str]) -> Vec<String> {
    if !directory.is_dir() {
        return Vec::new();
    }
    let mut found = Vec::new();
    for entry in WalkDir::new(directory).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("cannot scan {directory}: {err}");
                continue;
            }
        };
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().is_none_or(|ext| ext != "class") {
            continue;
        }
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("cannot read {}: {err}", path.display());
                continue;
            }
        };
        match classfile::parse(&bytes) {
            Some(class) if class.has_any_annotation(annotations) => {
                found.push(class.class_name().to_owned());
            }
            Some(_) => {}
            None => debug!("skipping malformed class file {}", path.display()),
        }
    }
    found
}
