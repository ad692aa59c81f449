//! Enhancement pass pipeline behind the CLI.
//!
//! This module ties a loaded project file to an enhancement pass: it resolves
//! the configuration, loads the fingerprint state, runs the orchestrator over
//! a [`ProjectHost`], and records the consumed classes once the pass is
//! fully successful.

use crate::cli::EnhanceArgs;
use crate::config::{EnhancerConfig, PassSettings};
use crate::datanucleus::DataNucleusSupport;
use crate::error::Result;
use crate::module_name::ModuleName;
use crate::orchestrator::{ModuleEnhancementOrchestrator, PassReport};
use crate::output::{DryRunInfo, write_stderr_line};
use crate::project::{ProjectFile, ProjectHost, Reporting, project_root};
use crate::registry::{FingerprintStore, group_by_module};
use crate::support::EnhancerRegistry;
use camino::{Utf8Path, Utf8PathBuf};
use log::info;
use std::io::Write;

/// Context for one pipeline run.
#[derive(Debug, Clone, Copy)]
pub struct PipelineContext<'a> {
    /// Path to the project file.
    pub project_file: &'a Utf8Path,
    /// Explicit state file, overriding the default location.
    pub state_file: Option<&'a Utf8Path>,
    /// Ignore recorded fingerprints.
    pub full: bool,
    /// Describe the pass without running it.
    pub dry_run: bool,
    /// Verbosity level.
    pub verbosity: u8,
    /// Suppress progress output.
    pub quiet: bool,
}

impl<'a> PipelineContext<'a> {
    /// Creates a context from parsed CLI arguments.
    #[must_use]
    pub fn from_args(args: &'a EnhanceArgs) -> Self {
        Self {
            project_file: &args.project,
            state_file: args.state.as_deref(),
            full: args.full,
            dry_run: args.dry_run,
            verbosity: args.verbosity,
            quiet: args.quiet,
        }
    }

    fn reporting(&self) -> Reporting {
        Reporting {
            quiet: self.quiet,
            verbosity: self.verbosity,
        }
    }
}

/// How a pipeline run ended.
#[derive(Debug)]
pub enum EnhanceStatus {
    /// Enhancement is disabled in the project file.
    Disabled,
    /// The pass was only described.
    DryRun,
    /// The pass ran.
    Completed(PassReport),
}

impl EnhanceStatus {
    /// Returns `true` unless a pass ran and was unsuccessful or had failing
    /// modules.
    #[must_use]
    pub fn is_success(&self) -> bool {
        match self {
            Self::Disabled | Self::DryRun => true,
            Self::Completed(report) => report.is_successful() && !report.has_failures(),
        }
    }
}

/// Builds the registry of built-in enhancers for `config`.
#[must_use]
pub fn default_registry(config: &EnhancerConfig) -> EnhancerRegistry {
    let mut support = DataNucleusSupport::new();
    if let Some(java) = config.java.as_deref() {
        support = support.with_java(java);
    }
    let mut registry = EnhancerRegistry::new();
    registry.register(Box::new(support));
    registry
}

/// Resolves the state file location for `project_file`.
#[must_use]
pub fn state_path(project_file: &Utf8Path, explicit: Option<&Utf8Path>) -> Utf8PathBuf {
    explicit.map_or_else(
        || FingerprintStore::default_path(&project_root(project_file)),
        Utf8Path::to_owned,
    )
}

/// Loads the fingerprint store at `path`, warning on `stderr` when a
/// malformed file was discarded.
///
/// # Errors
///
/// Returns an error if an existing state file cannot be read.
pub fn load_store(path: &Utf8Path, stderr: &mut dyn Write) -> Result<FingerprintStore> {
    let loaded = FingerprintStore::load(path)?;
    if loaded.recovered_from_corrupt_file() {
        write_stderr_line(
            stderr,
            format!("Warning: ignoring malformed state file {path}; every class will be re-evaluated."),
        );
    }
    Ok(loaded.into_store())
}

/// Runs (or describes) an enhancement pass over `project`.
///
/// # Errors
///
/// Returns an error when the configuration cannot be resolved, the state
/// file cannot be read or written, or the pass aborts.
pub fn run_enhance(
    context: &PipelineContext<'_>,
    project: &ProjectFile,
    registry: &EnhancerRegistry,
    stderr: &mut dyn Write,
) -> Result<EnhanceStatus> {
    if !project.enhancer.enabled {
        if !context.quiet {
            write_stderr_line(stderr, "Enhancement is disabled in the project file.");
        }
        return Ok(EnhanceStatus::Disabled);
    }

    let settings = project.enhancer.resolve(registry)?;
    let state_file = state_path(context.project_file, context.state_file);
    let mut store = load_store(&state_file, stderr)?;

    if context.dry_run {
        describe_pass(context, project, registry, &settings, &store, &state_file, stderr)?;
        return Ok(EnhanceStatus::DryRun);
    }

    let report = {
        let host = ProjectHost::new(
            &project.modules,
            settings.include_test_classes,
            context.reporting(),
            &mut *stderr,
        );
        let orchestrator = ModuleEnhancementOrchestrator::new(&host, registry, &settings);
        orchestrator.run((!context.full).then_some(&store))?
    };

    if report.consumed.is_empty() {
        info!("no classes consumed; state file {state_file} left unchanged");
    } else {
        store.commit(&report.consumed);
        store.save(&state_file)?;
    }
    Ok(EnhanceStatus::Completed(report))
}

fn describe_pass(
    context: &PipelineContext<'_>,
    project: &ProjectFile,
    registry: &EnhancerRegistry,
    settings: &PassSettings,
    store: &FingerprintStore,
    state_file: &Utf8Path,
    stderr: &mut dyn Write,
) -> Result<()> {
    let modules: Vec<(ModuleName, usize)> = {
        let host = ProjectHost::new(
            &project.modules,
            settings.include_test_classes,
            context.reporting(),
            &mut *stderr,
        );
        let orchestrator = ModuleEnhancementOrchestrator::new(&host, registry, settings);
        let discovery = orchestrator.discover()?;
        let selected = if context.full {
            discovery.items.into_items()
        } else {
            discovery.items.select_changed(store)
        };
        group_by_module(&selected)
            .iter()
            .map(|group| (group.module.clone(), group.item_count()))
            .collect()
    };

    let support = registry.get(&settings.enhancer_id)?;
    let info = DryRunInfo {
        project_file: context.project_file,
        state_file,
        enhancer: support.descriptor().display_name(),
        api: settings.api,
        full: context.full,
        manual_dependencies: settings.manual_dependencies.as_ref().map_or(0, Vec::len),
        modules: &modules,
    };
    write_stderr_line(stderr, info.display_text());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EnhanceError;
    use crate::test_utils::{ScriptedSupport, write_class};
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    const SCRIPTED: &str = "SCRIPTED";

    struct Workspace {
        _temp: TempDir,
        project_file: Utf8PathBuf,
    }

    #[fixture]
    fn workspace() -> Workspace {
        let temp = tempfile::tempdir().expect("create temp dir");
        let root = Utf8Path::from_path(temp.path())
            .expect("temp dir is UTF-8")
            .to_owned();
        let classes = root.join("core/classes");
        write_class(&classes, "com.shop.Order", &[]);
        std::fs::write(
            classes.join("package.jdo"),
            r#"<jdo><package name="com.shop"><class name="Order"/></package></jdo>"#,
        )
        .expect("write metadata");
        let project_file = root.join("enhancer.toml");
        std::fs::write(
            &project_file,
            concat!(
                "[enhancer]\n",
                "enhancer = \"SCRIPTED\"\n",
                "include_test_classes = false\n",
                "\n",
                "[[module]]\n",
                "name = \"core\"\n",
                "output_dir = \"core/classes\"\n",
            ),
        )
        .expect("write project file");
        Workspace {
            _temp: temp,
            project_file,
        }
    }

    fn scripted_registry() -> EnhancerRegistry {
        let mut registry = EnhancerRegistry::new();
        registry.register(Box::new(ScriptedSupport::enhancing(SCRIPTED)));
        registry
    }

    fn context(project_file: &Utf8Path) -> PipelineContext<'_> {
        PipelineContext {
            project_file,
            state_file: None,
            full: false,
            dry_run: false,
            verbosity: 0,
            quiet: true,
        }
    }

    #[rstest]
    fn successful_pass_records_fingerprints(workspace: Workspace) {
        let project = ProjectFile::load(&workspace.project_file).expect("project loads");
        let registry = scripted_registry();
        let mut stderr = Vec::new();

        let status = run_enhance(&context(&workspace.project_file), &project, &registry, &mut stderr)
            .expect("pass runs");

        assert!(status.is_success());
        let state_file = state_path(&workspace.project_file, None);
        let store = FingerprintStore::load(&state_file)
            .expect("state loads")
            .into_store();
        assert_eq!(store.len(), 1);
    }

    #[rstest]
    fn second_pass_submits_nothing(workspace: Workspace) {
        let project = ProjectFile::load(&workspace.project_file).expect("project loads");
        let registry = scripted_registry();
        let mut stderr = Vec::new();
        let ctx = context(&workspace.project_file);

        run_enhance(&ctx, &project, &registry, &mut stderr).expect("first pass");
        let status = run_enhance(&ctx, &project, &registry, &mut stderr).expect("second pass");

        match status {
            EnhanceStatus::Completed(report) => assert_eq!(report.submitted, 0),
            other => panic!("expected a completed pass, got {other:?}"),
        }
    }

    #[rstest]
    fn dry_run_lists_scheduled_modules_without_writing_state(workspace: Workspace) {
        let project = ProjectFile::load(&workspace.project_file).expect("project loads");
        let registry = scripted_registry();
        let mut stderr = Vec::new();
        let ctx = PipelineContext {
            dry_run: true,
            ..context(&workspace.project_file)
        };

        let status = run_enhance(&ctx, &project, &registry, &mut stderr).expect("dry run");

        assert!(matches!(status, EnhanceStatus::DryRun));
        let text = String::from_utf8(stderr).expect("stderr is UTF-8");
        assert!(text.contains("core: 1 class(es)"));
        assert!(!state_path(&workspace.project_file, None).exists());
    }

    #[rstest]
    fn configuration_error_stops_before_discovery(workspace: Workspace) {
        let mut project = ProjectFile::load(&workspace.project_file).expect("project loads");
        project.enhancer.dependencies_manual = true;
        let registry = scripted_registry();
        let mut stderr = Vec::new();

        let err = run_enhance(&context(&workspace.project_file), &project, &registry, &mut stderr)
            .expect_err("manual mode without dependencies");

        assert!(matches!(err, EnhanceError::Configuration { .. }));
        assert!(stderr.is_empty());
        assert!(!state_path(&workspace.project_file, None).exists());
    }

    #[rstest]
    fn disabled_project_does_nothing(workspace: Workspace) {
        let mut project = ProjectFile::load(&workspace.project_file).expect("project loads");
        project.enhancer.enabled = false;
        let mut stderr = Vec::new();

        let status = run_enhance(
            &context(&workspace.project_file),
            &project,
            &scripted_registry(),
            &mut stderr,
        )
        .expect("disabled pass");

        assert!(matches!(status, EnhanceStatus::Disabled));
    }

    #[rstest]
    fn corrupt_state_file_is_reported_and_replaced(workspace: Workspace) {
        let state_file = state_path(&workspace.project_file, None);
        std::fs::create_dir_all(state_file.parent().expect("state dir")).expect("create state dir");
        std::fs::write(&state_file, "{not json").expect("write corrupt state");
        let project = ProjectFile::load(&workspace.project_file).expect("project loads");
        let mut stderr = Vec::new();

        run_enhance(
            &context(&workspace.project_file),
            &project,
            &scripted_registry(),
            &mut stderr,
        )
        .expect("pass runs");

        let text = String::from_utf8(stderr).expect("stderr is UTF-8");
        assert!(text.contains("malformed state file"));
        let store = FingerprintStore::load(&state_file)
            .expect("state loads")
            .into_store();
        assert_eq!(store.len(), 1);
    }

    #[rstest]
    #[case::explicit(Some("/tmp/state.json"), "/tmp/state.json")]
    #[case::default(None, "shop/.enhancer/fingerprints.json")]
    fn state_path_prefers_explicit_location(#[case] explicit: Option<&str>, #[case] expected: &str) {
        let path = state_path(Utf8Path::new("shop/enhancer.toml"), explicit.map(Utf8Path::new));
        assert_eq!(path, Utf8PathBuf::from(expected));
    }

    #[rstest]
    fn default_registry_uses_configured_java() {
        let config = EnhancerConfig {
            java: Some("/opt/jdk/bin/java".to_owned()),
            ..EnhancerConfig::default()
        };
        let registry = default_registry(&config);
        assert!(registry.is_registered(crate::datanucleus::DATANUCLEUS_ID));
    }
}
