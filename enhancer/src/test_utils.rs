//! Shared test utilities for the enhancer crate.
//!
//! [`ScriptedHost`] is an in-memory [`CompileContext`] and
//! [`ScriptedSupport`] an [`EnhancerSupport`] that records every invocation
//! instead of spawning a JVM. Both are driven from a single thread and use
//! interior mutability for their recorded state.
#![allow(clippy::expect_used, reason = "fixtures fail loudly on broken test setup")]

use crate::api::PersistenceApi;
use crate::bridge::{BindFailure, BoundHandle, EnhancerContext, EnhancerHandle};
use crate::classfile::{class_file_path, fixtures::class_bytes};
use crate::discovery::ResolvedClass;
use crate::environment::ExecutionEnvironment;
use crate::error::{EnhanceError, Result};
use crate::host::{CompileContext, MessageCategory};
use crate::module_name::ModuleName;
use crate::support::{EnhancerDescriptor, EnhancerSupport, VersionTier};
use camino::{Utf8Path, Utf8PathBuf};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::process::{ExitStatus, Output};
use std::rc::Rc;

/// Creates an `ExitStatus` from an exit code (Unix implementation).
#[cfg(unix)]
#[must_use]
pub fn exit_status(code: i32) -> ExitStatus {
    use std::os::unix::process::ExitStatusExt;

    ExitStatus::from_raw(code << 8)
}

/// Creates an `ExitStatus` from an exit code (Windows implementation).
#[cfg(windows)]
#[must_use]
pub fn exit_status(code: i32) -> ExitStatus {
    use std::os::windows::process::ExitStatusExt;

    ExitStatus::from_raw(code as u32)
}

/// Creates a command `Output` with the given exit code and streams.
#[must_use]
pub fn output_with(code: i32, stdout: &str, stderr: &str) -> Output {
    Output {
        status: exit_status(code),
        stdout: stdout.as_bytes().to_vec(),
        stderr: stderr.as_bytes().to_vec(),
    }
}

/// Writes a minimal compiled class for `class_name` under `root`, creating
/// package directories, and returns its path.
///
/// # Panics
///
/// Panics if the file cannot be written.
pub fn write_class(root: &Utf8Path, class_name: &str, annotations: &[&str]) -> Utf8PathBuf {
    let path = root.join(class_file_path(class_name));
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create package directories");
    }
    std::fs::write(&path, class_bytes(class_name, &[], annotations)).expect("write class file");
    path
}

/// Writes a jar at `path` holding `entries`.
///
/// # Panics
///
/// Panics if the archive cannot be written.
pub fn write_jar(path: &Utf8Path, entries: &[(&str, &[u8])]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create jar directory");
    }
    let file = std::fs::File::create(path).expect("create jar");
    let mut writer = zip::ZipWriter::new(file);
    for (name, bytes) in entries {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .expect("start jar entry");
        writer.write_all(bytes).expect("write jar entry");
    }
    writer.finish().expect("finish jar");
}

#[derive(Debug, Clone, Default)]
struct ModuleLayout {
    output: Option<Utf8PathBuf>,
    test_output: Option<Utf8PathBuf>,
    libraries: Vec<Utf8PathBuf>,
    annotated: Vec<String>,
}

/// In-memory host build system.
#[derive(Debug, Default)]
pub struct ScriptedHost {
    modules: Vec<(ModuleName, ModuleLayout)>,
    cancel_after_checks: Option<usize>,
    cancellation_checks: Cell<usize>,
    progress: RefCell<Vec<f64>>,
    messages: RefCell<Vec<(MessageCategory, String)>>,
}

impl ScriptedHost {
    /// Creates a host with no modules.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn layout_mut(&mut self, name: &str) -> &mut ModuleLayout {
        let module = ModuleName::from(name);
        let index = match self.modules.iter().position(|(m, _)| *m == module) {
            Some(index) => index,
            None => {
                self.modules.push((module, ModuleLayout::default()));
                self.modules.len() - 1
            }
        };
        &mut self.modules[index].1
    }

    /// Adds (or updates) a module with its output directories.
    #[must_use]
    pub fn with_module(
        mut self,
        name: &str,
        output: &Utf8Path,
        test_output: Option<&Utf8PathBuf>,
    ) -> Self {
        let layout = self.layout_mut(name);
        layout.output = Some(output.to_owned());
        layout.test_output = test_output.cloned();
        self
    }

    /// Adds a module without any output directory.
    #[must_use]
    pub fn with_module_without_output(mut self, name: &str) -> Self {
        let layout = self.layout_mut(name);
        layout.output = None;
        self
    }

    /// Sets a module's project libraries.
    #[must_use]
    pub fn with_libraries<P: AsRef<Utf8Path>>(mut self, name: &str, libraries: &[P]) -> Self {
        self.layout_mut(name).libraries =
            libraries.iter().map(|p| p.as_ref().to_owned()).collect();
        self
    }

    /// Sets the classes the host reports as persistence-annotated.
    #[must_use]
    pub fn with_annotated(mut self, name: &str, classes: &[&str]) -> Self {
        self.layout_mut(name).annotated = classes.iter().map(|c| (*c).to_owned()).collect();
        self
    }

    /// Reports cancellation once `checks` cancellation checks have passed.
    #[must_use]
    pub fn cancel_after_checks(mut self, checks: usize) -> Self {
        self.cancel_after_checks = Some(checks);
        self
    }

    /// Every progress fraction reported so far.
    #[must_use]
    pub fn progress(&self) -> Vec<f64> {
        self.progress.borrow().clone()
    }

    /// Every message reported so far.
    #[must_use]
    pub fn messages(&self) -> Vec<(MessageCategory, String)> {
        self.messages.borrow().clone()
    }

    /// Returns `true` when any message of `category` contains `needle`.
    #[must_use]
    pub fn has_message(&self, category: MessageCategory, needle: &str) -> bool {
        self.messages
            .borrow()
            .iter()
            .any(|(c, text)| *c == category && text.contains(needle))
    }

    fn layout(&self, module: &ModuleName) -> Option<&ModuleLayout> {
        self.modules
            .iter()
            .find(|(name, _)| name == module)
            .map(|(_, layout)| layout)
    }
}

impl CompileContext for ScriptedHost {
    fn affected_modules(&self) -> Vec<ModuleName> {
        self.modules.iter().map(|(name, _)| name.clone()).collect()
    }

    fn output_directory(&self, module: &ModuleName) -> Option<Utf8PathBuf> {
        self.layout(module).and_then(|layout| layout.output.clone())
    }

    fn test_output_directory(&self, module: &ModuleName) -> Option<Utf8PathBuf> {
        self.layout(module)
            .and_then(|layout| layout.test_output.clone())
    }

    fn all_output_directories(&self) -> Vec<Utf8PathBuf> {
        self.modules
            .iter()
            .flat_map(|(_, layout)| layout.output.iter().chain(&layout.test_output))
            .filter(|dir| dir.is_dir())
            .cloned()
            .collect()
    }

    fn project_libraries(&self, module: &ModuleName) -> Vec<Utf8PathBuf> {
        self.layout(module)
            .map(|layout| layout.libraries.clone())
            .unwrap_or_default()
    }

    fn annotated_classes(&self, module: &ModuleName, _annotations: &[&str]) -> Vec<String> {
        self.layout(module)
            .map(|layout| layout.annotated.clone())
            .unwrap_or_default()
    }

    fn is_cancelled(&self) -> bool {
        let checks = self.cancellation_checks.get();
        self.cancellation_checks.set(checks + 1);
        self.cancel_after_checks.is_some_and(|limit| checks >= limit)
    }

    fn set_progress(&self, fraction: f64) {
        self.progress.borrow_mut().push(fraction);
    }

    fn add_message(&self, category: MessageCategory, message: &str) {
        self.messages.borrow_mut().push((category, message.to_owned()));
    }
}

/// A handle that records registrations and reports one enhanced class per
/// registered class.
#[derive(Debug, Default)]
pub struct RecordingHandle {
    /// Registered classes.
    pub classes: Vec<ResolvedClass>,
    /// Registered metadata files.
    pub metadata: Vec<Utf8PathBuf>,
}

impl EnhancerHandle for RecordingHandle {
    fn add_classes(&mut self, classes: &[ResolvedClass]) {
        self.classes.extend_from_slice(classes);
    }

    fn add_metadata_sources(&mut self, paths: &[Utf8PathBuf]) {
        self.metadata.extend_from_slice(paths);
    }

    fn run(&mut self) -> Result<usize> {
        Ok(self.classes.len())
    }
}

/// One recorded enhancer run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Module the run belonged to.
    pub module: ModuleName,
    /// API the run targeted.
    pub api: PersistenceApi,
    /// Contract tier that was bound.
    pub tier: VersionTier,
    /// Qualified names of the registered classes, in order.
    pub classes: Vec<String>,
    /// Registered metadata files, in order.
    pub metadata: Vec<Utf8PathBuf>,
    /// Classpath of the module's environment.
    pub classpath: Vec<Utf8PathBuf>,
}

/// Shared log of recorded runs.
pub type InvocationLog = Rc<RefCell<Vec<Invocation>>>;

/// An enhancer support that records runs instead of enhancing.
#[derive(Debug)]
pub struct ScriptedSupport {
    descriptor: EnhancerDescriptor,
    log: InvocationLog,
    binding_failures: HashSet<ModuleName>,
    execution_failures: HashSet<ModuleName>,
    reported_counts: HashMap<ModuleName, usize>,
}

impl ScriptedSupport {
    fn with_tier(id: &str, tier: VersionTier) -> Self {
        Self {
            descriptor: EnhancerDescriptor::new(
                id,
                format!("Scripted {id}"),
                tier,
                vec![PersistenceApi::Jdo, PersistenceApi::Jpa],
                PersistenceApi::Jdo,
            ),
            log: Rc::default(),
            binding_failures: HashSet::new(),
            execution_failures: HashSet::new(),
            reported_counts: HashMap::new(),
        }
    }

    /// A current-tier support enhancing every registered class.
    #[must_use]
    pub fn enhancing(id: &str) -> Self {
        Self::with_tier(id, VersionTier::Current)
    }

    /// A legacy-tier support that only binds through the legacy contract.
    #[must_use]
    pub fn legacy(id: &str) -> Self {
        Self::with_tier(id, VersionTier::Legacy)
    }

    /// Makes both contracts fail to bind in `module`.
    #[must_use]
    pub fn with_binding_failure(mut self, module: &str) -> Self {
        self.binding_failures.insert(ModuleName::from(module));
        self
    }

    /// Makes the run fail in `module`.
    #[must_use]
    pub fn with_execution_failure(mut self, module: &str) -> Self {
        self.execution_failures.insert(ModuleName::from(module));
        self
    }

    /// Makes the run in `module` report `count` enhanced classes.
    #[must_use]
    pub fn with_reported_count(mut self, module: &str, count: usize) -> Self {
        self.reported_counts.insert(ModuleName::from(module), count);
        self
    }

    /// Shared handle on the recorded runs.
    #[must_use]
    pub fn log(&self) -> InvocationLog {
        Rc::clone(&self.log)
    }

    fn handle<'a>(
        &'a self,
        tier: VersionTier,
        api: PersistenceApi,
        module: &ModuleName,
        environment: &ExecutionEnvironment,
    ) -> std::result::Result<BoundHandle<'a>, BindFailure> {
        if self.binding_failures.contains(module) {
            return Err(BindFailure::EntryPointMissing {
                class_name: format!("scripted.{tier}.Enhancer"),
            });
        }
        Ok(Box::new(ScriptedHandle {
            support: self,
            invocation: Invocation {
                module: module.clone(),
                api,
                tier,
                classes: Vec::new(),
                metadata: Vec::new(),
                classpath: environment.classpath().to_vec(),
            },
        }))
    }
}

impl EnhancerSupport for ScriptedSupport {
    fn descriptor(&self) -> &EnhancerDescriptor {
        &self.descriptor
    }

    fn new_current<'a>(
        &'a self,
        context: &EnhancerContext<'a>,
    ) -> std::result::Result<BoundHandle<'a>, BindFailure> {
        if self.descriptor.tier() != VersionTier::Current {
            return Err(BindFailure::ContractNotProvided);
        }
        self.handle(
            VersionTier::Current,
            context.api,
            context.module,
            context.environment,
        )
    }

    fn new_legacy<'a>(
        &'a self,
        environment: &'a ExecutionEnvironment,
        api: PersistenceApi,
        _host: &'a dyn CompileContext,
        module: &'a ModuleName,
        _persistence_unit: Option<&'a str>,
    ) -> std::result::Result<BoundHandle<'a>, BindFailure> {
        if self.descriptor.tier() != VersionTier::Legacy && !self.binding_failures.contains(module)
        {
            return Err(BindFailure::ContractNotProvided);
        }
        self.handle(VersionTier::Legacy, api, module, environment)
    }
}

struct ScriptedHandle<'a> {
    support: &'a ScriptedSupport,
    invocation: Invocation,
}

impl EnhancerHandle for ScriptedHandle<'_> {
    fn add_classes(&mut self, classes: &[ResolvedClass]) {
        self.invocation
            .classes
            .extend(classes.iter().map(|class| class.name.clone()));
    }

    fn add_metadata_sources(&mut self, paths: &[Utf8PathBuf]) {
        self.invocation.metadata.extend_from_slice(paths);
    }

    fn run(&mut self) -> Result<usize> {
        let module = self.invocation.module.clone();
        let count = self
            .support
            .reported_counts
            .get(&module)
            .copied()
            .unwrap_or(self.invocation.classes.len());
        self.support.log.borrow_mut().push(self.invocation.clone());
        if self.support.execution_failures.contains(&module) {
            return Err(EnhanceError::Execution {
                enhancer: self.support.descriptor.display_name().to_owned(),
                module,
                reason: "scripted failure".to_owned(),
            });
        }
        Ok(count)
    }
}
