//! Processing items, per-module grouping, and incremental fingerprints.
//!
//! A [`ProcessingItem`] is one compiled class file scheduled for
//! enhancement. Items are built from discovery results, deduplicated per
//! declaring metadata file and class file, filtered against the [`FingerprintStore`]
//! so unchanged classes are skipped, and finally grouped by module so each
//! module gets exactly one enhancer invocation.
//!
//! The store lives at `<project>/.enhancer/fingerprints.json` by default.

use crate::discovery::{ArtifactSource, ModuleDiscovery};
use crate::error::{EnhanceError, Result};
use crate::module_name::ModuleName;
use camino::{Utf8Path, Utf8PathBuf};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

/// Default directory for incremental state, relative to the project root.
pub const STATE_DIRNAME: &str = ".enhancer";
/// Default incremental state file name.
pub const STATE_FILENAME: &str = "fingerprints.json";

/// Change marker of a class file: its modification time in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Reads the fingerprint of the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`EnhanceError::Io`] if the file metadata cannot be read.
    pub fn of(path: &Utf8Path) -> Result<Self> {
        let modified = std::fs::metadata(path)?.modified()?;
        let millis = modified
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
        Ok(Self(millis))
    }

    /// Wraps a raw millisecond value.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the raw millisecond value.
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }
}

/// One compiled class scheduled for enhancement.
///
/// Items are immutable once built; a changed class file produces a new item
/// with a new fingerprint on the next pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingItem {
    module: ModuleName,
    class_name: String,
    class_file: Utf8PathBuf,
    fingerprint: Fingerprint,
    source: Arc<ArtifactSource>,
}

impl ProcessingItem {
    /// Builds an item, reading the class file's current fingerprint.
    ///
    /// # Errors
    ///
    /// Returns [`EnhanceError::Io`] if the class file cannot be inspected.
    pub fn new(
        module: ModuleName,
        class_name: String,
        class_file: Utf8PathBuf,
        source: Arc<ArtifactSource>,
    ) -> Result<Self> {
        let fingerprint = Fingerprint::of(&class_file)?;
        Ok(Self::with_fingerprint(
            module,
            class_name,
            class_file,
            fingerprint,
            source,
        ))
    }

    /// Builds an item with an explicit fingerprint.
    #[must_use]
    pub fn with_fingerprint(
        module: ModuleName,
        class_name: String,
        class_file: Utf8PathBuf,
        fingerprint: Fingerprint,
        source: Arc<ArtifactSource>,
    ) -> Self {
        Self {
            module,
            class_name,
            class_file,
            fingerprint,
            source,
        }
    }

    /// Module the class belongs to.
    #[must_use]
    pub fn module(&self) -> &ModuleName {
        &self.module
    }

    /// Qualified class name.
    #[must_use]
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Compiled class file path.
    #[must_use]
    pub fn class_file(&self) -> &Utf8Path {
        &self.class_file
    }

    /// Change marker captured when the item was built.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Source that declared the class.
    #[must_use]
    pub fn source(&self) -> &Arc<ArtifactSource> {
        &self.source
    }
}

/// Candidate items for a pass, deduplicated and in discovery order.
#[derive(Debug, Clone, Default)]
pub struct ProcessingItemRegistry {
    items: Vec<ProcessingItem>,
    classes: HashSet<(Utf8PathBuf, Fingerprint)>,
    declarations: HashSet<(Utf8PathBuf, Utf8PathBuf, Fingerprint)>,
}

impl ProcessingItemRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an item unless an equivalent one is already registered. Returns
    /// `true` when the item was added.
    ///
    /// Metadata items are keyed by metadata file, class file and
    /// fingerprint, so a class declared by two metadata files keeps both
    /// files. Annotated items are keyed by class file and fingerprint and
    /// are dropped when any source already scheduled the class.
    pub fn insert(&mut self, item: ProcessingItem) -> bool {
        let class = (item.class_file.clone(), item.fingerprint);
        let added = if item.source.is_annotation_based() {
            !self.classes.contains(&class)
        } else {
            self.declarations.insert((
                item.source.path().to_owned(),
                item.class_file.clone(),
                item.fingerprint,
            ))
        };
        if added {
            self.classes.insert(class);
            self.items.push(item);
        }
        added
    }

    /// Registers every class of a module's discovery, metadata sources first.
    ///
    /// # Errors
    ///
    /// Returns [`EnhanceError::Io`] if a class file's fingerprint cannot be
    /// read.
    pub fn extend_from_discovery(
        &mut self,
        module: &ModuleName,
        discovery: &ModuleDiscovery,
    ) -> Result<()> {
        for resolved in discovery.metadata.iter().chain(&discovery.annotated) {
            for class in &resolved.classes {
                self.insert(ProcessingItem::new(
                    module.clone(),
                    class.name.clone(),
                    class.file.clone(),
                    Arc::clone(&resolved.source),
                )?);
            }
        }
        Ok(())
    }

    /// All registered items.
    #[must_use]
    pub fn items(&self) -> &[ProcessingItem] {
        &self.items
    }

    /// Number of registered items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` when no items are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items that are new or whose fingerprint differs from `store`.
    #[must_use]
    pub fn select_changed(&self, store: &FingerprintStore) -> Vec<ProcessingItem> {
        self.items
            .iter()
            .filter(|item| store.is_changed(item))
            .cloned()
            .collect()
    }

    /// Consumes the registry, returning its items.
    #[must_use]
    pub fn into_items(self) -> Vec<ProcessingItem> {
        self.items
    }
}

/// A metadata file and the scheduled classes it declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataGroup {
    /// The metadata source.
    pub source: Arc<ArtifactSource>,
    /// Scheduled items declared by the source.
    pub items: Vec<ProcessingItem>,
}

/// All scheduled work for one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleGroup {
    /// The module.
    pub module: ModuleName,
    /// Metadata sources, each listed once regardless of how many of its
    /// classes are scheduled.
    pub metadata: Vec<MetadataGroup>,
    /// Annotated items, in scheduling order.
    pub annotated: Vec<ProcessingItem>,
}

impl ModuleGroup {
    fn new(module: ModuleName) -> Self {
        Self {
            module,
            metadata: Vec::new(),
            annotated: Vec::new(),
        }
    }

    /// Every item in the group, metadata items first.
    pub fn items(&self) -> impl Iterator<Item = &ProcessingItem> {
        self.metadata
            .iter()
            .flat_map(|group| group.items.iter())
            .chain(&self.annotated)
    }

    /// Number of distinct class files in the group. A class declared by
    /// several metadata files counts once.
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.items()
            .map(ProcessingItem::class_file)
            .collect::<HashSet<_>>()
            .len()
    }

    fn push(&mut self, item: ProcessingItem) {
        if item.source.is_annotation_based() {
            self.annotated.push(item);
            return;
        }
        let path = item.source.path();
        if let Some(group) = self
            .metadata
            .iter_mut()
            .find(|group| group.source.path() == path)
        {
            group.items.push(item);
        } else {
            self.metadata.push(MetadataGroup {
                source: Arc::clone(&item.source),
                items: vec![item],
            });
        }
    }
}

/// Groups items by module, preserving first-seen module order.
///
/// Every input item appears in exactly one group.
#[must_use]
pub fn group_by_module(items: &[ProcessingItem]) -> Vec<ModuleGroup> {
    let mut groups: Vec<ModuleGroup> = Vec::new();
    for item in items {
        let index = match groups.iter().position(|group| group.module == item.module) {
            Some(index) => index,
            None => {
                groups.push(ModuleGroup::new(item.module.clone()));
                groups.len() - 1
            }
        };
        if let Some(group) = groups.get_mut(index) {
            group.push(item.clone());
        }
    }
    groups
}

/// Persisted fingerprints of successfully enhanced class files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintStore {
    fingerprints: BTreeMap<Utf8PathBuf, Fingerprint>,
}

/// A loaded store and whether it had to be reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOutcome {
    store: FingerprintStore,
    recovered_from_corrupt_file: bool,
}

impl LoadOutcome {
    /// The loaded store.
    #[must_use]
    pub fn into_store(self) -> FingerprintStore {
        self.store
    }

    /// Returns `true` when a malformed state file was treated as empty.
    #[must_use]
    pub fn recovered_from_corrupt_file(&self) -> bool {
        self.recovered_from_corrupt_file
    }
}

impl FingerprintStore {
    /// Default state file location for a project rooted at `project_root`.
    #[must_use]
    pub fn default_path(project_root: &Utf8Path) -> Utf8PathBuf {
        project_root.join(STATE_DIRNAME).join(STATE_FILENAME)
    }

    /// Loads the store from `path`. A missing file yields an empty store; a
    /// malformed one yields an empty store and a warning.
    ///
    /// # Errors
    ///
    /// Returns [`EnhanceError::StateFile`] if an existing file cannot be read.
    pub fn load(path: &Utf8Path) -> Result<LoadOutcome> {
        if !path.exists() {
            return Ok(LoadOutcome {
                store: Self::default(),
                recovered_from_corrupt_file: false,
            });
        }
        let content = std::fs::read_to_string(path).map_err(|e| EnhanceError::StateFile {
            path: path.to_owned(),
            reason: e.to_string(),
        })?;
        match serde_json::from_str::<Self>(&content) {
            Ok(store) => Ok(LoadOutcome {
                store,
                recovered_from_corrupt_file: false,
            }),
            Err(err) => {
                warn!("ignoring malformed state file {path}: {err}");
                Ok(LoadOutcome {
                    store: Self::default(),
                    recovered_from_corrupt_file: true,
                })
            }
        }
    }

    /// Writes the store to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`EnhanceError::StateFile`] on any I/O or serialisation
    /// failure.
    pub fn save(&self, path: &Utf8Path) -> Result<()> {
        let state_error = |reason: String| EnhanceError::StateFile {
            path: path.to_owned(),
            reason,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| state_error(e.to_string()))?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| state_error(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| state_error(e.to_string()))
    }

    /// Returns `true` when `item` is new or changed since it was recorded.
    #[must_use]
    pub fn is_changed(&self, item: &ProcessingItem) -> bool {
        self.fingerprints.get(&item.class_file) != Some(&item.fingerprint)
    }

    /// Records consumed items using the class files' fingerprints as they
    /// are now, after enhancement rewrote them. Files that vanished are
    /// forgotten.
    pub fn commit(&mut self, consumed: &[ProcessingItem]) {
        for item in consumed {
            match Fingerprint::of(&item.class_file) {
                Ok(fingerprint) => {
                    self.fingerprints.insert(item.class_file.clone(), fingerprint);
                }
                Err(_) => {
                    self.fingerprints.remove(&item.class_file);
                }
            }
        }
    }

    /// Forgets every recorded fingerprint.
    pub fn clear(&mut self) {
        self.fingerprints.clear();
    }

    /// Number of recorded class files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    /// Returns `true` when nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }
}
