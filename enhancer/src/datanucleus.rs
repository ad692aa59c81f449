//! Built-in DataNucleus enhancer support.
//!
//! Binding resolves the DataNucleus enhancer class inside the module's
//! environment and reads its constructor descriptors to pick an entry-point
//! shape. Older releases take `(String api, String enhancerName)`; newer
//! ones take only `(String api)`. The bound handle runs the enhancer's
//! command-line entry point in a fresh JVM over the module's classpath.

use crate::api::PersistenceApi;
use crate::bridge::{BindFailure, BoundHandle, EnhancerContext, EnhancerHandle};
use crate::classfile;
use crate::discovery::ResolvedClass;
use crate::environment::ExecutionEnvironment;
use crate::error::{EnhanceError, Result};
use crate::executor::{CommandExecutor, SystemCommandExecutor, failure_text};
use crate::module_name::ModuleName;
use crate::support::{EnhancerDescriptor, EnhancerSupport, VersionTier};
use camino::Utf8PathBuf;
use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;

/// Registry id of the DataNucleus support.
pub const DATANUCLEUS_ID: &str = "DATANUCLEUS";
/// Qualified name of the enhancer entry point.
pub const ENTRY_POINT: &str = "org.datanucleus.enhancer.DataNucleusEnhancer";
/// Byte-code engine selected for two-argument entry points.
pub const LEGACY_ENGINE: &str = "ASM";
/// Default Java launcher.
pub const DEFAULT_JAVA: &str = "java";

const SINGLE_ARGUMENT: &str = "(Ljava/lang/String;)V";
const TWO_ARGUMENT: &str = "(Ljava/lang/String;Ljava/lang/String;)V";
const ENHANCED_RECORD: &str = "ENHANCED (";

static COMPLETED: Lazy<Regex> =
    Lazy::new(|| compile(r"completed with success for (\d+) class"));

#[expect(clippy::expect_used, reason = "patterns are compile-time constants")]
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static pattern compiles")
}

/// Constructor shape offered by the enhancer entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPointShape {
    /// `(String api)`.
    SingleArgument,
    /// `(String api, String enhancerName)`.
    TwoArgument,
}

/// Reads the entry point from `environment` and reports its shape.
///
/// # Errors
///
/// Returns a [`BindFailure`] when the class is missing, unreadable, or
/// offers neither constructor.
pub fn probe_entry_point(
    environment: &ExecutionEnvironment,
) -> std::result::Result<EntryPointShape, BindFailure> {
    let environment_failure = |err: EnhanceError| BindFailure::Environment {
        reason: err.to_string(),
    };
    let location = environment
        .resolve_class(ENTRY_POINT)
        .ok_or_else(|| BindFailure::EntryPointMissing {
            class_name: ENTRY_POINT.to_owned(),
        })?;
    let bytes = location.read().map_err(environment_failure)?;
    let class = classfile::parse(&bytes).ok_or_else(|| BindFailure::Environment {
        reason: format!("{ENTRY_POINT} is not a readable class file"),
    })?;

    if class.has_constructor(SINGLE_ARGUMENT) {
        Ok(EntryPointShape::SingleArgument)
    } else if class.has_constructor(TWO_ARGUMENT) {
        Ok(EntryPointShape::TwoArgument)
    } else {
        Err(BindFailure::UnsupportedEntryPoint {
            class_name: ENTRY_POINT.to_owned(),
            found: class.constructor_descriptors().to_vec(),
        })
    }
}

/// Extracts the number of enhanced classes from enhancer output.
///
/// Lines starting with the enhancer's `ENHANCED (<kind>)` record are
/// counted; when there are none, the completion summary is used.
#[must_use]
pub fn parse_enhanced_count(output: &str) -> usize {
    let enhanced = output
        .lines()
        .filter(|line| line.trim_start().starts_with(ENHANCED_RECORD))
        .count();
    if enhanced > 0 {
        return enhanced;
    }
    COMPLETED
        .captures(output)
        .and_then(|captures| captures.get(1))
        .and_then(|count| count.as_str().parse().ok())
        .unwrap_or(0)
}

/// DataNucleus enhancer support.
pub struct DataNucleusSupport {
    descriptor: EnhancerDescriptor,
    executor: Box<dyn CommandExecutor>,
    java: String,
}

impl Default for DataNucleusSupport {
    fn default() -> Self {
        Self::new()
    }
}

impl DataNucleusSupport {
    /// Creates the support running enhancers through the system `java`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_executor(Box::new(SystemCommandExecutor))
    }

    /// Creates the support with a custom command executor.
    #[must_use]
    pub fn with_executor(executor: Box<dyn CommandExecutor>) -> Self {
        Self {
            descriptor: EnhancerDescriptor::new(
                DATANUCLEUS_ID,
                "DataNucleus",
                VersionTier::Current,
                vec![PersistenceApi::Jpa, PersistenceApi::Jdo],
                PersistenceApi::Jpa,
            ),
            executor,
            java: DEFAULT_JAVA.to_owned(),
        }
    }

    /// Uses `java` as the launcher instead of the one on `PATH`.
    #[must_use]
    pub fn with_java(mut self, java: impl Into<String>) -> Self {
        self.java = java.into();
        self
    }
}

impl EnhancerSupport for DataNucleusSupport {
    fn descriptor(&self) -> &EnhancerDescriptor {
        &self.descriptor
    }

    fn new_current<'a>(
        &'a self,
        context: &EnhancerContext<'a>,
    ) -> std::result::Result<BoundHandle<'a>, BindFailure> {
        if !self.descriptor.supports(context.api) {
            return Err(BindFailure::UnsupportedApi { api: context.api });
        }
        let shape = probe_entry_point(context.environment)?;
        debug!("{ENTRY_POINT} offers the {shape:?} constructor");
        Ok(Box::new(DataNucleusHandle {
            executor: self.executor.as_ref(),
            java: &self.java,
            display_name: self.descriptor.display_name(),
            module: context.module.clone(),
            classpath: context.environment.classpath_string(),
            api: context.api,
            shape,
            persistence_unit: context.persistence_unit.map(str::to_owned),
            metadata: Vec::new(),
            classes: Vec::new(),
        }))
    }
}

struct DataNucleusHandle<'a> {
    executor: &'a dyn CommandExecutor,
    java: &'a str,
    display_name: &'a str,
    module: ModuleName,
    classpath: String,
    api: PersistenceApi,
    shape: EntryPointShape,
    persistence_unit: Option<String>,
    metadata: Vec<Utf8PathBuf>,
    classes: Vec<Utf8PathBuf>,
}

impl DataNucleusHandle<'_> {
    fn arguments(&self) -> Vec<String> {
        let mut args = vec![
            "-cp".to_owned(),
            self.classpath.clone(),
            ENTRY_POINT.to_owned(),
            "-api".to_owned(),
            self.api.name().to_owned(),
        ];
        if self.shape == EntryPointShape::TwoArgument {
            args.extend(["-enhancerName".to_owned(), LEGACY_ENGINE.to_owned()]);
        }
        if let Some(unit) = &self.persistence_unit {
            args.extend(["-pu".to_owned(), unit.clone()]);
        }
        args.push("-v".to_owned());
        args.extend(self.metadata.iter().map(ToString::to_string));
        args.extend(self.classes.iter().map(ToString::to_string));
        args
    }

    fn execution_error(&self, reason: String) -> EnhanceError {
        EnhanceError::Execution {
            enhancer: self.display_name.to_owned(),
            module: self.module.clone(),
            reason,
        }
    }
}

impl EnhancerHandle for DataNucleusHandle<'_> {
    fn add_classes(&mut self, classes: &[ResolvedClass]) {
        for class in classes {
            if !self.classes.contains(&class.file) {
                self.classes.push(class.file.clone());
            }
        }
    }

    fn add_metadata_sources(&mut self, paths: &[Utf8PathBuf]) {
        for path in paths {
            if !self.metadata.contains(path) {
                self.metadata.push(path.clone());
            }
        }
    }

    fn run(&mut self) -> Result<usize> {
        if self.classes.is_empty() && self.metadata.is_empty() && self.persistence_unit.is_none() {
            return Ok(0);
        }
        let args = self.arguments();
        info!(
            "running {} enhancer for {} in {} ({} metadata files, {} classes)",
            self.display_name,
            self.api,
            self.module,
            self.metadata.len(),
            self.classes.len()
        );
        let output = self
            .executor
            .run(self.java, &args)
            .map_err(|err| self.execution_error(err.to_string()))?;
        if !output.status.success() {
            return Err(self.execution_error(failure_text(&output)));
        }
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push('\n');
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        for line in text.lines().filter(|line| !line.trim().is_empty()) {
            debug!("{}: {line}", self.display_name);
        }
        Ok(parse_enhanced_count(&text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::fixtures::class_bytes;
    use crate::executor::MockCommandExecutor;
    use crate::test_utils::{output_with, write_jar};
    use rstest::rstest;
    use tempfile::TempDir;

    const ENTRY_POINT_FILE: &str = "org/datanucleus/enhancer/DataNucleusEnhancer.class";

    fn environment_with(temp: &TempDir, constructors: &[&str]) -> ExecutionEnvironment {
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).expect("utf8");
        let jar = root.join("datanucleus-core-6.0.0.jar");
        let bytes = class_bytes(ENTRY_POINT, constructors, &[]);
        write_jar(&jar, &[(ENTRY_POINT_FILE, bytes.as_slice())]);
        ExecutionEnvironment::new(ModuleName::from("M"), vec![jar])
    }

    fn context<'a>(
        environment: &'a ExecutionEnvironment,
        api: PersistenceApi,
    ) -> EnhancerContext<'a> {
        EnhancerContext {
            api,
            module: environment.module(),
            environment,
            persistence_unit: None,
        }
    }

    fn class(name: &str) -> ResolvedClass {
        ResolvedClass {
            name: name.to_owned(),
            file: Utf8PathBuf::from(format!("/out/{}.class", name.replace('.', "/"))),
        }
    }

    #[rstest]
    #[case::single(&[SINGLE_ARGUMENT], EntryPointShape::SingleArgument)]
    #[case::two(&[TWO_ARGUMENT], EntryPointShape::TwoArgument)]
    #[case::both_prefers_single(&[TWO_ARGUMENT, SINGLE_ARGUMENT], EntryPointShape::SingleArgument)]
    fn probe_selects_constructor_shape(
        #[case] constructors: &[&str],
        #[case] expected: EntryPointShape,
    ) {
        let temp = TempDir::new().expect("temp dir");
        let environment = environment_with(&temp, constructors);
        assert_eq!(probe_entry_point(&environment), Ok(expected));
    }

    #[test]
    fn probe_rejects_unknown_constructors() {
        let temp = TempDir::new().expect("temp dir");
        let environment = environment_with(&temp, &["()V"]);
        assert!(matches!(
            probe_entry_point(&environment),
            Err(BindFailure::UnsupportedEntryPoint { .. })
        ));
    }

    #[test]
    fn probe_looks_past_non_archive_libraries() {
        let temp = TempDir::new().expect("temp dir");
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).expect("utf8");
        let pom = root.join("libfoo-1.0.pom");
        std::fs::write(&pom, "<project/>").expect("write pom");
        let jar = root.join("datanucleus-core-5.2.0.jar");
        let bytes = class_bytes(ENTRY_POINT, &[SINGLE_ARGUMENT], &[]);
        write_jar(&jar, &[(ENTRY_POINT_FILE, bytes.as_slice())]);

        let environment = ExecutionEnvironment::new(ModuleName::from("M"), vec![pom, jar]);
        assert_eq!(
            probe_entry_point(&environment),
            Ok(EntryPointShape::SingleArgument)
        );
    }

    #[test]
    fn probe_reports_missing_entry_point() {
        let environment = ExecutionEnvironment::new(ModuleName::from("M"), Vec::new());
        assert!(matches!(
            probe_entry_point(&environment),
            Err(BindFailure::EntryPointMissing { .. })
        ));
    }

    #[rstest]
    #[case::enhanced_lines("ENHANCED (Persistable) : com.x.A\nENHANCED (Persistable) : com.x.B\n", 2)]
    #[case::summary("DataNucleus Enhancer completed with success for 3 classes. Timings : input=1 ms", 3)]
    #[case::nothing("nothing to see", 0)]
    #[case::mentions_are_not_records(
        "ENHANCED (Persistable) : com.x.A\nSkipping com.x.B: already ENHANCED\nclasses ENHANCED so far: 1\n",
        1
    )]
    #[case::indented_records("  ENHANCED (Persistable) : com.x.A\n  ENHANCED (Detachable) : com.x.B\n", 2)]
    fn parses_enhanced_count(#[case] output: &str, #[case] expected: usize) {
        assert_eq!(parse_enhanced_count(output), expected);
    }

    #[test]
    fn two_argument_entry_point_selects_legacy_engine() {
        let temp = TempDir::new().expect("temp dir");
        let environment = environment_with(&temp, &[TWO_ARGUMENT]);
        let mut executor = MockCommandExecutor::new();
        executor
            .expect_run()
            .withf(|program, args| {
                program == "java"
                    && args.iter().any(|a| a == "-enhancerName")
                    && args.iter().any(|a| a == LEGACY_ENGINE)
                    && args.iter().any(|a| a == "JDO")
                    && args.last().is_some_and(|a| a == "/out/com/x/A.class")
            })
            .times(1)
            .returning(|_, _| Ok(output_with(0, "ENHANCED (Persistable) : com.x.A", "")));

        let support = DataNucleusSupport::with_executor(Box::new(executor));
        let Ok(mut handle) = support.new_current(&context(&environment, PersistenceApi::Jdo)) else {
            panic!("binding should succeed");
        };
        handle.add_metadata_sources(&[Utf8PathBuf::from("/out/package.jdo")]);
        handle.add_classes(&[class("com.x.A")]);
        assert_eq!(handle.run().expect("run succeeds"), 1);
    }

    #[test]
    fn single_argument_entry_point_omits_engine() {
        let temp = TempDir::new().expect("temp dir");
        let environment = environment_with(&temp, &[SINGLE_ARGUMENT]);
        let mut executor = MockCommandExecutor::new();
        executor
            .expect_run()
            .withf(|_, args| !args.iter().any(|a| a == "-enhancerName"))
            .times(1)
            .returning(|_, _| Ok(output_with(0, "ENHANCED (Persistable) : a\nENHANCED (Persistable) : b", "")));

        let support = DataNucleusSupport::with_executor(Box::new(executor));
        let Ok(mut handle) = support.new_current(&context(&environment, PersistenceApi::Jpa)) else {
            panic!("binding should succeed");
        };
        handle.add_classes(&[class("com.x.A"), class("com.x.B"), class("com.x.A")]);
        assert_eq!(handle.run().expect("run succeeds"), 2);
    }

    #[test]
    fn non_zero_exit_is_an_execution_error() {
        let temp = TempDir::new().expect("temp dir");
        let environment = environment_with(&temp, &[SINGLE_ARGUMENT]);
        let mut executor = MockCommandExecutor::new();
        executor
            .expect_run()
            .returning(|_, _| Ok(output_with(1, "", "NoClassDefFoundError: javax/jdo/Foo")));

        let support = DataNucleusSupport::with_executor(Box::new(executor));
        let Ok(mut handle) = support.new_current(&context(&environment, PersistenceApi::Jdo)) else {
            panic!("binding should succeed");
        };
        handle.add_classes(&[class("com.x.A")]);
        let err = handle.run().expect_err("enhancer fails");
        assert!(matches!(err, EnhanceError::Execution { .. }));
        assert!(err.to_string().contains("NoClassDefFoundError"));
    }

    #[test]
    fn empty_handle_does_not_spawn() {
        let temp = TempDir::new().expect("temp dir");
        let environment = environment_with(&temp, &[SINGLE_ARGUMENT]);
        let mut executor = MockCommandExecutor::new();
        executor.expect_run().times(0);

        let support = DataNucleusSupport::with_executor(Box::new(executor));
        let Ok(mut handle) = support.new_current(&context(&environment, PersistenceApi::Jdo)) else {
            panic!("binding should succeed");
        };
        assert_eq!(handle.run().expect("nothing to do"), 0);
    }

    #[test]
    fn legacy_contract_is_not_provided() {
        let environment = ExecutionEnvironment::new(ModuleName::from("M"), Vec::new());
        let host = crate::test_utils::ScriptedHost::new();
        let support = DataNucleusSupport::new();
        let result = support.new_legacy(
            &environment,
            PersistenceApi::Jdo,
            &host,
            environment.module(),
            None,
        );
        assert!(matches!(result, Err(BindFailure::ContractNotProvided)));
    }
}
