//! Module-by-module enhancement passes.
//!
//! A pass discovers processing items for every enabled, affected module,
//! groups the selected items by module, and drives one bound enhancer per
//! module in the host's module order. Failures that only concern one module
//! are reported and leave the rest of the pass running; anything else
//! aborts the pass.
//!
//! The pass hands back the items it consumed. Items are consumed only when
//! every submitted item was accounted for by an enhancer; any shortfall
//! yields an empty set so the next pass re-evaluates everything.

use crate::bridge::{BindRequest, bind};
use crate::config::PassSettings;
use crate::discovery::{ArtifactDiscovery, DiscoverySettings, ResolvedClass};
use crate::environment::IsolatedEnvironmentFactory;
use crate::error::{EnhanceError, Result};
use crate::exclusion::ExclusionSet;
use crate::host::{CompileContext, MessageCategory};
use crate::module_name::ModuleName;
use crate::output::{MessageContext, NOTHING_FOUND, success_message};
use crate::registry::{FingerprintStore, ModuleGroup, ProcessingItem, ProcessingItemRegistry, group_by_module};
use crate::support::{EnhancerRegistry, EnhancerSupport};
use camino::{Utf8Path, Utf8PathBuf};
use log::{Level, debug, log, trace};
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::error::Error;
use std::time::{Duration, Instant};

/// Step of a single module's processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModulePhase {
    /// Building the execution environment.
    Building,
    /// Binding the enhancer.
    Binding,
    /// Running the enhancer.
    Invoking,
    /// The module finished.
    Done,
    /// The module failed or was skipped.
    Failed,
}

/// Step of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassPhase {
    /// No pass is running.
    Idle,
    /// Scanning modules for processing items.
    Discovering,
    /// Grouping selected items by module.
    GroupingByModule,
    /// Processing one module.
    PerModule(ModulePhase),
    /// Summing per-module results.
    Aggregating,
}

/// What happened to one module.
#[derive(Debug)]
pub enum ModuleResult {
    /// The enhancer ran and rewrote `count` classes.
    Enhanced {
        /// Number of classes rewritten.
        count: usize,
    },
    /// The module was not processed.
    Skipped {
        /// Why the module was skipped.
        reason: String,
    },
    /// The module failed with a module-local error.
    Failed {
        /// The failure.
        error: EnhanceError,
    },
}

/// Result of one module in a pass.
#[derive(Debug)]
pub struct EnhancementOutcome {
    /// The module.
    pub module: ModuleName,
    /// Number of items submitted for the module.
    pub submitted: usize,
    /// What happened.
    pub result: ModuleResult,
}

impl EnhancementOutcome {
    /// Classes the module contributed to the pass total.
    #[must_use]
    pub fn enhanced_count(&self) -> usize {
        match self.result {
            ModuleResult::Enhanced { count } => count,
            ModuleResult::Skipped { .. } | ModuleResult::Failed { .. } => 0,
        }
    }
}

/// Items found by discovery, plus per-module discovery failures.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    /// Deduplicated candidate items.
    pub items: ProcessingItemRegistry,
    /// Modules whose discovery failed.
    pub failures: Vec<EnhanceError>,
}

/// Result of a pass.
#[derive(Debug, Default)]
pub struct PassReport {
    /// Per-module outcomes, in processing order.
    pub outcomes: Vec<EnhancementOutcome>,
    /// Number of items submitted.
    pub submitted: usize,
    /// Sum of the per-module enhanced counts.
    pub enhanced: usize,
    /// Items the pass fully processed; empty unless the pass succeeded.
    pub consumed: Vec<ProcessingItem>,
    /// Whether the host cancelled the pass.
    pub cancelled: bool,
    /// Modules whose discovery failed.
    pub discovery_failures: Vec<EnhanceError>,
    /// Wall-clock duration of the processing step.
    pub elapsed: Duration,
}

impl PassReport {
    /// Returns `true` when every submitted item was accounted for.
    #[must_use]
    pub fn is_successful(&self) -> bool {
        !self.cancelled && self.enhanced == self.submitted
    }

    /// Returns `true` when any module failed during discovery or
    /// processing.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.discovery_failures.is_empty()
            || self
                .outcomes
                .iter()
                .any(|outcome| matches!(outcome.result, ModuleResult::Failed { .. }))
    }
}

/// Drives enhancement passes against a host.
pub struct ModuleEnhancementOrchestrator<'a> {
    host: &'a dyn CompileContext,
    registry: &'a EnhancerRegistry,
    settings: &'a PassSettings,
    phase: Cell<PassPhase>,
    transitions: RefCell<Vec<PassPhase>>,
}

impl<'a> ModuleEnhancementOrchestrator<'a> {
    /// Creates an orchestrator for passes over `host` with `settings`.
    #[must_use]
    pub fn new(
        host: &'a dyn CompileContext,
        registry: &'a EnhancerRegistry,
        settings: &'a PassSettings,
    ) -> Self {
        Self {
            host,
            registry,
            settings,
            phase: Cell::new(PassPhase::Idle),
            transitions: RefCell::new(Vec::new()),
        }
    }

    /// Current pass phase.
    #[must_use]
    pub fn phase(&self) -> PassPhase {
        self.phase.get()
    }

    /// Every phase entered so far, in order.
    #[must_use]
    pub fn transitions(&self) -> Vec<PassPhase> {
        self.transitions.borrow().clone()
    }

    fn enter(&self, phase: PassPhase) {
        trace!("pass phase {:?} -> {phase:?}", self.phase.get());
        self.phase.set(phase);
        self.transitions.borrow_mut().push(phase);
    }

    fn support(&self) -> Result<&'a dyn EnhancerSupport> {
        self.registry.get(&self.settings.enhancer_id)
    }

    /// Rejects settings no module could run with.
    fn check_settings(&self) -> Result<()> {
        if self
            .settings
            .manual_dependencies
            .as_ref()
            .is_some_and(Vec::is_empty)
        {
            return Err(EnhanceError::Configuration {
                reason: "manual dependencies are enabled but none are configured".to_owned(),
            });
        }
        Ok(())
    }

    fn message_context(&self) -> MessageContext<'a> {
        MessageContext {
            enhancer: self
                .support()
                .ok()
                .map(|support| support.descriptor().display_name()),
            api: Some(self.settings.api),
            module: None,
        }
    }

    fn report(&self, category: MessageCategory, module: Option<&ModuleName>, text: &str) {
        let context = match module {
            Some(module) => self.message_context().for_module(module),
            None => self.message_context(),
        };
        let message = context.format(text);
        let level = match category {
            MessageCategory::Debug => Level::Debug,
            MessageCategory::Information => Level::Info,
            MessageCategory::Warning => Level::Warn,
            MessageCategory::Error => Level::Error,
        };
        log!(level, "{message}");
        self.host.add_message(category, &message);
    }

    fn enabled_modules(&self) -> Vec<ModuleName> {
        self.host
            .affected_modules()
            .into_iter()
            .filter(|module| self.settings.is_module_enabled(module))
            .collect()
    }

    /// Discovers candidate items in every enabled, affected module.
    ///
    /// # Errors
    ///
    /// Returns an error for failures outside the per-module taxonomy, such
    /// as an unknown enhancer or an unreadable class file fingerprint.
    pub fn discover(&self) -> Result<DiscoveryReport> {
        self.enter(PassPhase::Discovering);
        let result = self.discover_modules();
        self.enter(PassPhase::Idle);
        result
    }

    fn discover_modules(&self) -> Result<DiscoveryReport> {
        let support = self.support()?;
        let annotations = support.descriptor().annotation_class_names();
        let discovery = ArtifactDiscovery::new(
            self.host,
            DiscoverySettings {
                metadata_extensions: &self.settings.metadata_extensions,
                include_test_classes: self.settings.include_test_classes,
                annotations: &annotations,
            },
        );

        let mut report = DiscoveryReport::default();
        for module in self.enabled_modules() {
            match discovery.discover_module(&module) {
                Ok(found) => {
                    for skipped in &found.skipped_files {
                        self.report(MessageCategory::Warning, Some(&module), &skipped.to_string());
                    }
                    debug!(
                        "{module}: {} metadata and {} annotated sources",
                        found.metadata.len(),
                        found.annotated.len()
                    );
                    report.items.extend_from_discovery(&module, &found)?;
                }
                Err(err) if err.is_module_local() => {
                    self.report(MessageCategory::Error, Some(&module), &err.to_string());
                    report.failures.push(err);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(report)
    }

    /// Runs a full pass: discovery, selection against `store` (every
    /// candidate when `store` is `None`), and processing.
    ///
    /// # Errors
    ///
    /// See [`Self::discover`] and [`Self::process`].
    pub fn run(&self, store: Option<&FingerprintStore>) -> Result<PassReport> {
        if let Err(err) = self.check_settings() {
            self.report(MessageCategory::Error, None, &error_chain(&err));
            return Err(err);
        }
        let discovery = self.discover()?;
        let selected = match store {
            Some(store) => discovery.items.select_changed(store),
            None => discovery.items.items().to_vec(),
        };
        let unchanged = discovery.items.len() - selected.len();
        if unchanged > 0 {
            self.report(
                MessageCategory::Information,
                None,
                &format!("{unchanged} class(es) unchanged since the last pass"),
            );
        }
        let mut report = self.process(&selected)?;
        report.discovery_failures = discovery.failures;
        Ok(report)
    }

    /// Enhances `items`, one enhancer invocation per module.
    ///
    /// # Errors
    ///
    /// Returns an error, after reporting it, when a failure outside the
    /// per-module taxonomy occurs; remaining modules are not processed.
    pub fn process(&self, items: &[ProcessingItem]) -> Result<PassReport> {
        let started = Instant::now();
        let result = self.process_items(items, started);
        if let Err(err) = &result {
            self.report(MessageCategory::Error, None, &error_chain(err));
        }
        self.enter(PassPhase::Idle);
        result
    }

    fn process_items(&self, items: &[ProcessingItem], started: Instant) -> Result<PassReport> {
        self.check_settings()?;
        let support = self.support()?;

        self.enter(PassPhase::GroupingByModule);
        let all_groups = group_by_module(items);
        let mut report = PassReport {
            submitted: all_groups.iter().map(ModuleGroup::item_count).sum(),
            ..PassReport::default()
        };
        let groups = self.order_groups(all_groups);

        if groups.is_empty() {
            self.report(MessageCategory::Information, None, NOTHING_FOUND);
        }

        let total = groups.len();
        for (index, group) in groups.iter().enumerate() {
            if self.host.is_cancelled() {
                self.report(
                    MessageCategory::Warning,
                    None,
                    &format!("enhancement cancelled after {index} of {total} module(s)"),
                );
                report.cancelled = true;
                break;
            }
            let result = match self.process_module(support, group) {
                Ok(result) => result,
                Err(error) if error.is_module_local() => {
                    self.enter(PassPhase::PerModule(ModulePhase::Failed));
                    self.report(MessageCategory::Error, Some(&group.module), &error.to_string());
                    ModuleResult::Failed { error }
                }
                Err(error) => return Err(error),
            };
            report.outcomes.push(EnhancementOutcome {
                module: group.module.clone(),
                submitted: group.item_count(),
                result,
            });
            self.host.set_progress(fraction(index + 1, total));
        }
        self.host.set_progress(1.0);

        self.enter(PassPhase::Aggregating);
        report.enhanced = report
            .outcomes
            .iter()
            .map(EnhancementOutcome::enhanced_count)
            .sum();
        report.elapsed = started.elapsed();
        if report.is_successful() {
            report.consumed = items.to_vec();
        } else if !report.cancelled {
            self.report(
                MessageCategory::Warning,
                None,
                &format!(
                    "enhanced {} of {} class(es); everything will be re-evaluated next pass",
                    report.enhanced, report.submitted
                ),
            );
        }
        if !groups.is_empty() {
            self.report(
                MessageCategory::Information,
                None,
                &success_message(report.enhanced, report.elapsed),
            );
        }
        Ok(report)
    }

    fn order_groups(&self, mut groups: Vec<ModuleGroup>) -> Vec<ModuleGroup> {
        let mut ordered = Vec::with_capacity(groups.len());
        for module in self.enabled_modules() {
            if let Some(position) = groups.iter().position(|group| group.module == module) {
                ordered.push(groups.swap_remove(position));
            }
        }
        for leftover in &groups {
            debug!(
                "{} item(s) of module {} left pending: module is not affected or not enabled",
                leftover.item_count(),
                leftover.module
            );
        }
        ordered
    }

    fn process_module(&self, support: &dyn EnhancerSupport, group: &ModuleGroup) -> Result<ModuleResult> {
        let module = &group.module;
        if let Some(reason) = self.missing_output(module) {
            self.enter(PassPhase::PerModule(ModulePhase::Failed));
            self.report(MessageCategory::Warning, Some(module), &reason);
            return Ok(ModuleResult::Skipped { reason });
        }

        self.enter(PassPhase::PerModule(ModulePhase::Building));
        for item in group.items() {
            if !item.class_file().is_file() {
                return Err(EnhanceError::Resolution {
                    class_name: item.class_name().to_owned(),
                    module: module.clone(),
                });
            }
        }
        let manual: &[Utf8PathBuf] = self.settings.manual_dependencies.as_deref().unwrap_or(&[]);
        let exclusions = ExclusionSet::compute(
            self.settings
                .excluded_dependencies
                .iter()
                .map(|path| path.as_str()),
            manual.iter().map(|path| path.as_str()),
        );
        let environment = IsolatedEnvironmentFactory::new(self.host)
            .with_bridge_locations(support.bridge_locations())
            .build(module, &exclusions, manual)?;

        self.enter(PassPhase::PerModule(ModulePhase::Binding));
        let mut handle = bind(
            support,
            &BindRequest {
                api: self.settings.api,
                module,
                environment: &environment,
                host: self.host,
                persistence_unit: self.settings.persistence_unit.as_deref(),
            },
        )?;

        self.enter(PassPhase::PerModule(ModulePhase::Invoking));
        let mut added = HashSet::new();
        for metadata in &group.metadata {
            handle.add_metadata_sources(&[metadata.source.path().to_owned()]);
            handle.add_classes(&resolved_classes(&metadata.items, &mut added));
        }
        handle.add_classes(&resolved_classes(&group.annotated, &mut added));
        let count = handle.run()?;

        self.enter(PassPhase::PerModule(ModulePhase::Done));
        self.report(
            MessageCategory::Information,
            Some(module),
            &format!("enhanced {count} of {} class(es)", group.item_count()),
        );
        Ok(ModuleResult::Enhanced { count })
    }

    fn missing_output(&self, module: &ModuleName) -> Option<String> {
        if self.host.output_directory(module).is_none() {
            return Some(format!("no output directory for module {module}"));
        }
        if self.settings.include_test_classes && self.host.test_output_directory(module).is_none() {
            return Some(format!("no test output directory for module {module}"));
        }
        None
    }
}

/// Classes of `items` not yet handed to the enhancer, recorded in `added`.
fn resolved_classes<'i>(
    items: &'i [ProcessingItem],
    added: &mut HashSet<&'i Utf8Path>,
) -> Vec<ResolvedClass> {
    items
        .iter()
        .filter(|item| added.insert(item.class_file()))
        .map(|item| ResolvedClass {
            name: item.class_name().to_owned(),
            file: item.class_file().to_owned(),
        })
        .collect()
}

fn fraction(done: usize, total: usize) -> f64 {
    if total == 0 {
        return 1.0;
    }
    let done = f64::from(u32::try_from(done).unwrap_or(u32::MAX));
    let total = f64::from(u32::try_from(total).unwrap_or(u32::MAX));
    (done / total).min(1.0)
}

/// Formats `err` followed by its chain of sources.
#[must_use]
pub fn error_chain(err: &EnhanceError) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str("\n  caused by: ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
