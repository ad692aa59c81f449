//! Enhancer descriptors, the support trait, and the enhancer registry.
//!
//! An [`EnhancerSupport`] describes one enhancer product and knows how to
//! bind it inside a module's environment. Supports are collected in an
//! [`EnhancerRegistry`] that is built once at start-up and passed by
//! reference into every pass; there is no global registry.

use crate::api::PersistenceApi;
use crate::bridge::{BindFailure, BoundHandle, EnhancerContext};
use crate::datanucleus::DataNucleusSupport;
use crate::environment::ExecutionEnvironment;
use crate::error::{EnhanceError, Result};
use crate::host::CompileContext;
use crate::module_name::ModuleName;
use camino::Utf8PathBuf;
use std::fmt;

/// Which construction contract an enhancer was built against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionTier {
    /// Four discrete construction parameters.
    Legacy,
    /// A single context object.
    Current,
}

impl fmt::Display for VersionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Legacy => "legacy",
            Self::Current => "current",
        })
    }
}

/// Static description of an enhancer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhancerDescriptor {
    id: String,
    display_name: String,
    tier: VersionTier,
    supported_apis: Vec<PersistenceApi>,
    default_api: PersistenceApi,
}

impl EnhancerDescriptor {
    /// Creates a descriptor. `default_api` is added to `supported_apis`
    /// when missing.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        tier: VersionTier,
        mut supported_apis: Vec<PersistenceApi>,
        default_api: PersistenceApi,
    ) -> Self {
        if !supported_apis.contains(&default_api) {
            supported_apis.push(default_api);
        }
        Self {
            id: id.into(),
            display_name: display_name.into(),
            tier,
            supported_apis,
            default_api,
        }
    }

    /// Registry key.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human-readable name used in messages.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Construction contract tier.
    #[must_use]
    pub fn tier(&self) -> VersionTier {
        self.tier
    }

    /// Supported APIs, in preference order.
    #[must_use]
    pub fn supported_apis(&self) -> &[PersistenceApi] {
        &self.supported_apis
    }

    /// API used when none (or an unsupported one) is configured.
    #[must_use]
    pub fn default_api(&self) -> PersistenceApi {
        self.default_api
    }

    /// Returns `true` when `api` is supported.
    #[must_use]
    pub fn supports(&self, api: PersistenceApi) -> bool {
        self.supported_apis.contains(&api)
    }

    /// Union of the annotation names of every supported API.
    #[must_use]
    pub fn annotation_class_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        for api in &self.supported_apis {
            for name in api.annotation_class_names() {
                if !names.contains(name) {
                    names.push(*name);
                }
            }
        }
        names
    }
}

/// Support for one enhancer product.
pub trait EnhancerSupport {
    /// Static description of the enhancer.
    fn descriptor(&self) -> &EnhancerDescriptor;

    /// Code locations of any glue the enhancer needs on every classpath.
    fn bridge_locations(&self) -> Vec<Utf8PathBuf> {
        Vec::new()
    }

    /// Binds through the current, single-context contract.
    ///
    /// # Errors
    ///
    /// Returns a [`BindFailure`] describing why the contract cannot bind.
    fn new_current<'a>(
        &'a self,
        context: &EnhancerContext<'a>,
    ) -> std::result::Result<BoundHandle<'a>, BindFailure>;

    /// Binds through the legacy contract. Supports that only implement the
    /// current contract keep the default.
    ///
    /// # Errors
    ///
    /// Returns a [`BindFailure`] describing why the contract cannot bind.
    fn new_legacy<'a>(
        &'a self,
        _environment: &'a ExecutionEnvironment,
        _api: PersistenceApi,
        _host: &'a dyn CompileContext,
        _module: &'a ModuleName,
        _persistence_unit: Option<&'a str>,
    ) -> std::result::Result<BoundHandle<'a>, BindFailure> {
        Err(BindFailure::ContractNotProvided)
    }
}

/// Registered enhancer supports, in registration order.
#[derive(Default)]
pub struct EnhancerRegistry {
    supports: Vec<Box<dyn EnhancerSupport>>,
}

impl EnhancerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in DataNucleus support.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(DataNucleusSupport::new()));
        registry
    }

    /// Registers `support`, replacing any support with the same id.
    pub fn register(&mut self, support: Box<dyn EnhancerSupport>) {
        let id = support.descriptor().id().to_owned();
        if let Some(slot) = self
            .supports
            .iter_mut()
            .find(|existing| existing.descriptor().id() == id)
        {
            *slot = support;
        } else {
            self.supports.push(support);
        }
    }

    /// Removes the support registered under `id`, returning it.
    pub fn unregister(&mut self, id: &str) -> Option<Box<dyn EnhancerSupport>> {
        let index = self
            .supports
            .iter()
            .position(|support| support.descriptor().id() == id)?;
        Some(self.supports.remove(index))
    }

    /// Looks up a support by id.
    ///
    /// # Errors
    ///
    /// Returns [`EnhanceError::UnknownEnhancer`] when nothing is registered
    /// under `id`.
    pub fn get(&self, id: &str) -> Result<&dyn EnhancerSupport> {
        self.supports
            .iter()
            .find(|support| support.descriptor().id() == id)
            .map(AsRef::as_ref)
            .ok_or_else(|| EnhanceError::UnknownEnhancer { id: id.to_owned() })
    }

    /// Returns `true` when a support is registered under `id`.
    #[must_use]
    pub fn is_registered(&self, id: &str) -> bool {
        self.get(id).is_ok()
    }

    /// The first registered support.
    #[must_use]
    pub fn default_support(&self) -> Option<&dyn EnhancerSupport> {
        self.supports.first().map(AsRef::as_ref)
    }

    /// Descriptors of every registered support.
    #[must_use]
    pub fn supported(&self) -> Vec<&EnhancerDescriptor> {
        self.supports
            .iter()
            .map(|support| support.descriptor())
            .collect()
    }
}
