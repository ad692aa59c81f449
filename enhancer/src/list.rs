//! List command implementation.
//!
//! Discovers every processing item of a project and reports, per module,
//! which classes changed since the last recorded pass.

use crate::cli::ListArgs;
use crate::error::{EnhanceError, Result};
use crate::orchestrator::ModuleEnhancementOrchestrator;
use crate::pipeline::{load_store, state_path};
use crate::project::{ProjectFile, ProjectHost, Reporting};
use crate::registry::{FingerprintStore, ProcessingItem, group_by_module};
use crate::support::EnhancerRegistry;
use serde::Serialize;
use std::io::Write;

/// One listed class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListedClass {
    /// Qualified class name.
    pub class_name: String,
    /// Path of the compiled class.
    pub class_file: String,
    /// Metadata file or class file the class was discovered through.
    pub source: String,
    /// Whether the class changed since the last recorded pass.
    pub changed: bool,
}

/// Listed classes of one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListedModule {
    /// Module name.
    pub module: String,
    /// Classes in processing order.
    pub classes: Vec<ListedClass>,
}

/// Lists discovered classes of the project named by `args`.
///
/// Discovery warnings go to `stderr`; the listing goes to `stdout`.
///
/// # Errors
///
/// Returns an error if the project or state file cannot be read, discovery
/// aborts, or writing to `stdout` fails.
pub fn run_list(
    args: &ListArgs,
    project: &ProjectFile,
    registry: &EnhancerRegistry,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> Result<()> {
    let settings = project.enhancer.resolve(registry)?;
    let store = load_store(&state_path(&args.project, args.state.as_deref()), stderr)?;

    let items = {
        let host = ProjectHost::new(
            &project.modules,
            settings.include_test_classes,
            Reporting::default(),
            &mut *stderr,
        );
        let orchestrator = ModuleEnhancementOrchestrator::new(&host, registry, &settings);
        orchestrator.discover()?.items.into_items()
    };
    let modules = listed_modules(&items, &store);

    let output = if args.json {
        format_json(&modules)
    } else {
        format_human(&modules)
    };
    writeln!(stdout, "{output}").map_err(|e| EnhanceError::WriteFailed { source: e })?;
    Ok(())
}

/// Groups `items` per module and marks the ones `store` has not seen.
#[must_use]
pub fn listed_modules(items: &[ProcessingItem], store: &FingerprintStore) -> Vec<ListedModule> {
    group_by_module(items)
        .iter()
        .map(|group| ListedModule {
            module: group.module.to_string(),
            classes: group
                .items()
                .map(|item| ListedClass {
                    class_name: item.class_name().to_owned(),
                    class_file: item.class_file().to_string(),
                    source: item.source().path().to_string(),
                    changed: store.is_changed(item),
                })
                .collect(),
        })
        .collect()
}

/// Formats listed modules for human-readable output.
///
/// # Examples
///
/// ```
/// use bytecode_enhancer::list::format_human;
///
/// assert!(format_human(&[]).contains("No persistence classes found"));
/// ```
#[must_use]
pub fn format_human(modules: &[ListedModule]) -> String {
    if modules.is_empty() {
        return String::from("No persistence classes found.");
    }
    let mut lines = vec!["Persistence classes:".to_owned()];
    for module in modules {
        let changed = module.classes.iter().filter(|class| class.changed).count();
        lines.push(String::new());
        lines.push(format!(
            "Module: {} ({changed} of {} changed)",
            module.module,
            module.classes.len()
        ));
        for class in &module.classes {
            let marker = if class.changed { "*" } else { " " };
            lines.push(format!("  {marker} {}  [{}]", class.class_name, class.source));
        }
    }
    lines.join("\n")
}

/// Formats listed modules as JSON.
#[must_use]
pub fn format_json(modules: &[ListedModule]) -> String {
    serde_json::to_string_pretty(modules).unwrap_or_else(|_| String::from("[]"))
}
