//! Enhancement pass configuration.
//!
//! [`EnhancerConfig`] is the `[enhancer]` table of a project file. Before a
//! pass starts it is resolved against the [`EnhancerRegistry`] into an
//! immutable [`PassSettings`]: unknown enhancers and unsupported APIs fall
//! back to defaults, and manual-dependency mode is validated up front.

use crate::api::PersistenceApi;
use crate::error::{EnhanceError, Result};
use crate::module_name::ModuleName;
use crate::support::{EnhancerRegistry, VersionTier};
use camino::Utf8PathBuf;
use log::warn;
use serde::{Deserialize, Serialize};

/// A manually pinned enhancer dependency.
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DependencyEntry {
    /// Id of the enhancer the dependency applies to.
    pub enhancer: String,
    /// Persistence API the dependency applies to.
    pub api: PersistenceApi,
    /// Path of the dependency.
    pub path: Utf8PathBuf,
}

/// The `[enhancer]` table of a project file.
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct EnhancerConfig {
    /// Whether enhancement runs at all.
    pub enabled: bool,
    /// Registry id of the enhancer; blank selects the default.
    pub enhancer: Option<String>,
    /// Persistence API; absent selects the enhancer's default.
    pub api: Option<PersistenceApi>,
    /// Metadata file extensions, with or without a leading dot.
    pub metadata_extensions: Vec<String>,
    /// Whether test output directories take part in discovery.
    pub include_test_classes: bool,
    /// Modules to enhance; absent enables every module.
    pub enabled_modules: Option<Vec<ModuleName>>,
    /// Whether the enhancer runs against [`Self::dependencies`] instead of
    /// the project's own copies.
    pub dependencies_manual: bool,
    /// Persistence unit passed to the enhancer.
    pub persistence_unit: Option<String>,
    /// Java launcher used to run the enhancer.
    pub java: Option<String>,
    /// Manually pinned dependencies, in classpath order.
    pub dependencies: Vec<DependencyEntry>,
    /// Project dependencies that must never reach the enhancer classpath.
    pub excluded_dependencies: Vec<Utf8PathBuf>,
}

impl Default for EnhancerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            enhancer: None,
            api: None,
            metadata_extensions: vec!["jdo".to_owned(), "orm".to_owned()],
            include_test_classes: true,
            enabled_modules: None,
            dependencies_manual: false,
            persistence_unit: None,
            java: None,
            dependencies: Vec::new(),
            excluded_dependencies: Vec::new(),
        }
    }
}

/// Immutable settings for one pass.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PassSettings {
    /// Registry id of the selected enhancer.
    pub enhancer_id: String,
    /// Selected persistence API.
    pub api: PersistenceApi,
    /// Normalised metadata file extensions.
    pub metadata_extensions: Vec<String>,
    /// Whether test output directories take part in discovery.
    pub include_test_classes: bool,
    /// Modules to enhance; `None` enables every module.
    pub enabled_modules: Option<Vec<ModuleName>>,
    /// Manual dependencies when manual mode applies.
    pub manual_dependencies: Option<Vec<Utf8PathBuf>>,
    /// Paths excluded from every environment.
    pub excluded_dependencies: Vec<Utf8PathBuf>,
    /// Persistence unit passed to the enhancer.
    pub persistence_unit: Option<String>,
}

impl PassSettings {
    /// Returns `true` when `module` takes part in the pass.
    #[must_use]
    pub fn is_module_enabled(&self, module: &ModuleName) -> bool {
        self.enabled_modules
            .as_ref()
            .is_none_or(|enabled| enabled.contains(module))
    }
}

impl EnhancerConfig {
    /// Resolves the configuration against `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`EnhanceError::Configuration`] when no enhancer is
    /// registered, or when manual dependencies are enabled for a
    /// current-tier enhancer but none match the selected enhancer and API.
    pub fn resolve(&self, registry: &EnhancerRegistry) -> Result<PassSettings> {
        let support = match self.enhancer.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => match registry.get(id) {
                Ok(support) => Some(support),
                Err(err) => {
                    warn!("{err}; falling back to the default enhancer");
                    registry.default_support()
                }
            },
            _ => registry.default_support(),
        }
        .ok_or_else(|| EnhanceError::Configuration {
            reason: "no enhancer support is registered".to_owned(),
        })?;
        let descriptor = support.descriptor();

        let api = match self.api {
            Some(api) if descriptor.supports(api) => api,
            Some(api) => {
                warn!(
                    "{} does not support {api}; using {}",
                    descriptor.display_name(),
                    descriptor.default_api()
                );
                descriptor.default_api()
            }
            None => descriptor.default_api(),
        };

        let manual_dependencies = if !self.dependencies_manual {
            None
        } else if descriptor.tier() == VersionTier::Current {
            let paths: Vec<Utf8PathBuf> = self
                .dependencies
                .iter()
                .filter(|entry| entry.enhancer == descriptor.id() && entry.api == api)
                .map(|entry| entry.path.clone())
                .collect();
            if paths.is_empty() {
                return Err(EnhanceError::Configuration {
                    reason: format!(
                        "manual dependencies are enabled but none are configured for {}[{api}]",
                        descriptor.display_name()
                    ),
                });
            }
            Some(paths)
        } else {
            warn!(
                "manual dependencies are ignored for legacy enhancer {}",
                descriptor.display_name()
            );
            None
        };

        Ok(PassSettings {
            enhancer_id: descriptor.id().to_owned(),
            api,
            metadata_extensions: normalize_extensions(&self.metadata_extensions),
            include_test_classes: self.include_test_classes,
            enabled_modules: self.enabled_modules.clone(),
            manual_dependencies,
            excluded_dependencies: self.excluded_dependencies.clone(),
            persistence_unit: self
                .persistence_unit
                .as_deref()
                .map(str::trim)
                .filter(|unit| !unit.is_empty())
                .map(str::to_owned),
        })
    }
}

fn normalize_extensions(extensions: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::new();
    for extension in extensions {
        let trimmed = extension.trim().trim_start_matches('.');
        if !trimmed.is_empty() && !normalized.iter().any(|e| e == trimmed) {
            normalized.push(trimmed.to_owned());
        }
    }
    normalized
}
