//! Artifact discovery for enabled modules.
//!
//! Discovery scans a module's output directories for metadata files (by
//! configured extension) and asks the host for persistence-annotated
//! classes, then resolves every declared class to a compiled class file.
//! Discovery is a pure scan: it keeps no state between calls and may be
//! repeated safely.

use crate::classfile::class_file_path;
use crate::error::{EnhanceError, Result};
use crate::host::CompileContext;
use crate::metadata::parse_metadata_file;
use crate::module_name::ModuleName;
use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, warn};
use std::sync::Arc;
use walkdir::WalkDir;

/// Origin of enhancement input.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArtifactSource {
    /// A metadata descriptor file and the classes it declares.
    Metadata {
        /// Path of the metadata file.
        path: Utf8PathBuf,
        /// Qualified class names declared in the file.
        class_names: Vec<String>,
    },
    /// A single compiled class carrying a persistence annotation.
    Annotated {
        /// Path of the compiled class file.
        path: Utf8PathBuf,
        /// Qualified name of the class.
        class_name: String,
    },
}

impl ArtifactSource {
    /// Path of the metadata file or annotated class file.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        match self {
            Self::Metadata { path, .. } | Self::Annotated { path, .. } => path,
        }
    }

    /// Returns `true` for annotation-based sources.
    #[must_use]
    pub const fn is_annotation_based(&self) -> bool {
        matches!(self, Self::Annotated { .. })
    }
}

/// A class declared by a source together with its compiled file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedClass {
    /// Qualified class name.
    pub name: String,
    /// Existing compiled class file.
    pub file: Utf8PathBuf,
}

/// An artifact source whose declared classes all resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    /// The discovered source, shared with the processing items built from it.
    pub source: Arc<ArtifactSource>,
    /// One entry per declared class, in declaration order.
    pub classes: Vec<ResolvedClass>,
}

/// Everything discovered for one module.
#[derive(Debug, Default)]
pub struct ModuleDiscovery {
    /// Metadata-based sources, in scan order.
    pub metadata: Vec<ResolvedSource>,
    /// Annotation-based sources, in host order.
    pub annotated: Vec<ResolvedSource>,
    /// Metadata files skipped because they could not be parsed.
    pub skipped_files: Vec<EnhanceError>,
}

impl ModuleDiscovery {
    /// Returns `true` when the module has nothing to enhance.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty() && self.annotated.is_empty()
    }
}

/// Discovery options taken from the pass configuration.
#[derive(Debug, Clone, Copy)]
pub struct DiscoverySettings<'a> {
    /// Metadata file extensions without the leading dot.
    pub metadata_extensions: &'a [String],
    /// Whether test output directories are searched and used for resolution.
    pub include_test_classes: bool,
    /// Annotation names marking persistence-capable classes.
    pub annotations: &'a [&'a str],
}

/// Scans modules for enhancement input.
pub struct ArtifactDiscovery<'a> {
    host: &'a dyn CompileContext,
    settings: DiscoverySettings<'a>,
}

impl<'a> ArtifactDiscovery<'a> {
    /// Create a discovery scanner over `host`.
    #[must_use]
    pub fn new(host: &'a dyn CompileContext, settings: DiscoverySettings<'a>) -> Self {
        Self { host, settings }
    }

    /// Discover both kinds of sources for `module`.
    ///
    /// # Errors
    ///
    /// Returns [`EnhanceError::Resolution`] if a declared class has no
    /// compiled class file, or [`EnhanceError::Io`] if an output directory
    /// cannot be scanned. Unparseable metadata files do not fail discovery;
    /// they are recorded in [`ModuleDiscovery::skipped_files`].
    pub fn discover_module(&self, module: &ModuleName) -> Result<ModuleDiscovery> {
        let mut discovery = ModuleDiscovery::default();
        self.collect_metadata_sources(module, &mut discovery)?;
        discovery.annotated = self.annotated_sources(module)?;
        Ok(discovery)
    }

    /// Discover metadata-based sources for `module`.
    ///
    /// # Errors
    ///
    /// See [`Self::discover_module`].
    pub fn metadata_sources(&self, module: &ModuleName) -> Result<ModuleDiscovery> {
        let mut discovery = ModuleDiscovery::default();
        self.collect_metadata_sources(module, &mut discovery)?;
        Ok(discovery)
    }

    /// Discover annotation-based sources for `module`.
    ///
    /// # Errors
    ///
    /// Returns [`EnhanceError::Resolution`] if an annotated class reported
    /// by the host has no compiled class file.
    pub fn annotated_sources(&self, module: &ModuleName) -> Result<Vec<ResolvedSource>> {
        let class_names = self
            .host
            .annotated_classes(module, self.settings.annotations);
        let mut sources = Vec::with_capacity(class_names.len());
        for class_name in class_names {
            let file = self.resolve_class(module, &class_name)?;
            debug!("found annotated class {class_name} at {file}");
            sources.push(ResolvedSource {
                source: Arc::new(ArtifactSource::Annotated {
                    path: file.clone(),
                    class_name: class_name.clone(),
                }),
                classes: vec![ResolvedClass {
                    name: class_name,
                    file,
                }],
            });
        }
        Ok(sources)
    }

    fn collect_metadata_sources(
        &self,
        module: &ModuleName,
        discovery: &mut ModuleDiscovery,
    ) -> Result<()> {
        if self.settings.metadata_extensions.is_empty() {
            return Ok(());
        }
        for directory in self.search_directories(module) {
            for path in find_files_by_extension(&directory, self.settings.metadata_extensions)? {
                let class_names = match parse_metadata_file(&path) {
                    Ok(names) => names,
                    Err(err) => {
                        warn!("skipping metadata file: {err}");
                        discovery.skipped_files.push(err);
                        continue;
                    }
                };
                if class_names.is_empty() {
                    debug!("metadata file {path} declares no classes");
                    continue;
                }
                let classes = class_names
                    .iter()
                    .map(|name| {
                        self.resolve_class(module, name).map(|file| ResolvedClass {
                            name: name.clone(),
                            file,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                discovery.metadata.push(ResolvedSource {
                    source: Arc::new(ArtifactSource::Metadata { path, class_names }),
                    classes,
                });
            }
        }
        Ok(())
    }

    fn search_directories(&self, module: &ModuleName) -> Vec<Utf8PathBuf> {
        let mut directories: Vec<Utf8PathBuf> =
            self.host.output_directory(module).into_iter().collect();
        if self.settings.include_test_classes {
            directories.extend(self.host.test_output_directory(module));
        }
        directories
    }

    /// Resolve `class_name` against the module's output directory, then its
    /// test output directory when test classes are included.
    ///
    /// # Errors
    ///
    /// Returns [`EnhanceError::Resolution`] when no class file exists.
    pub fn resolve_class(&self, module: &ModuleName, class_name: &str) -> Result<Utf8PathBuf> {
        resolve_class_file(
            self.search_directories(module).iter().map(Utf8PathBuf::as_path),
            module,
            class_name,
        )
    }
}

/// Finds the first existing class file for `class_name` under `directories`.
///
/// # Errors
///
/// Returns [`EnhanceError::Resolution`] when none of the directories
/// contains the class.
pub fn resolve_class_file<'p>(
    directories: impl IntoIterator<Item = &'p Utf8Path>,
    module: &ModuleName,
    class_name: &str,
) -> Result<Utf8PathBuf> {
    let relative = class_file_path(class_name);
    directories
        .into_iter()
        .map(|directory| directory.join(&relative))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| EnhanceError::Resolution {
            class_name: class_name.to_owned(),
            module: module.clone(),
        })
}

/// Recursively lists files under `directory` whose extension is one of
/// `extensions`, sorted by path.
///
/// # Errors
///
/// Returns [`EnhanceError::Io`] if the directory cannot be traversed.
pub fn find_files_by_extension(
    directory: &Utf8Path,
    extensions: &[String],
) -> Result<Vec<Utf8PathBuf>> {
    if !directory.is_dir() {
        return Ok(Vec::new());
    }
    let mut found = Vec::new();
    for entry in WalkDir::new(directory).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(path) = Utf8PathBuf::try_from(entry.into_path()) else {
            continue;
        };
        if path
            .extension()
            .is_some_and(|ext| extensions.iter().any(|wanted| wanted == ext))
        {
            found.push(path);
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{ScriptedHost, write_class};
    use tempfile::TempDir;

    const JDO: &str = r#"<jdo><package name="com.x"><class name="A"/><class name="B"/></package></jdo>"#;

    fn extensions() -> Vec<String> {
        vec!["jdo".to_owned(), "orm".to_owned()]
    }

    fn settings(extensions: &[String], include_test_classes: bool) -> DiscoverySettings<'_> {
        DiscoverySettings {
            metadata_extensions: extensions,
            include_test_classes,
            annotations: &["javax.persistence.Entity"],
        }
    }

    fn utf8(temp: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).expect("utf8 temp dir")
    }

    #[test]
    fn resolves_metadata_classes_in_output_directory() {
        let temp = TempDir::new().expect("temp dir");
        let root = utf8(&temp);
        let out = root.join("out");
        write_class(&out, "com.x.A", &[]);
        write_class(&out, "com.x.B", &[]);
        std::fs::write(out.join("package.jdo"), JDO).expect("write metadata");

        let host = ScriptedHost::new().with_module("M", &out, None);
        let extensions = extensions();
        let discovery = ArtifactDiscovery::new(&host, settings(&extensions, false));
        let found = discovery
            .discover_module(&ModuleName::from("M"))
            .expect("discovery succeeds");

        assert_eq!(found.metadata.len(), 1);
        let classes = &found.metadata.first().expect("source").classes;
        assert_eq!(classes.len(), 2);
        assert!(classes.iter().all(|c| c.file.starts_with(&out)));
        assert!(found.annotated.is_empty());
    }

    #[test]
    fn missing_class_file_is_a_resolution_error() {
        let temp = TempDir::new().expect("temp dir");
        let out = utf8(&temp).join("out");
        std::fs::create_dir_all(&out).expect("mkdir");
        std::fs::write(
            out.join("c.jdo"),
            r#"<jdo><package name="com.x"><class name="C"/></package></jdo>"#,
        )
        .expect("write metadata");

        let host = ScriptedHost::new().with_module("M", &out, None);
        let extensions = extensions();
        let discovery = ArtifactDiscovery::new(&host, settings(&extensions, false));
        let err = discovery
            .discover_module(&ModuleName::from("M"))
            .expect_err("class file is missing");

        match err {
            EnhanceError::Resolution { class_name, module } => {
                assert_eq!(class_name, "com.x.C");
                assert_eq!(module.as_str(), "M");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn falls_back_to_test_output_when_enabled() {
        let temp = TempDir::new().expect("temp dir");
        let root = utf8(&temp);
        let out = root.join("out");
        let test_out = root.join("test-out");
        std::fs::create_dir_all(&out).expect("mkdir");
        write_class(&test_out, "com.x.A", &[]);
        write_class(&test_out, "com.x.B", &[]);
        std::fs::write(out.join("package.jdo"), JDO).expect("write metadata");

        let host = ScriptedHost::new().with_module("M", &out, Some(&test_out));
        let extensions = extensions();

        let without_tests = ArtifactDiscovery::new(&host, settings(&extensions, false));
        assert!(without_tests.discover_module(&ModuleName::from("M")).is_err());

        let with_tests = ArtifactDiscovery::new(&host, settings(&extensions, true));
        let found = with_tests
            .discover_module(&ModuleName::from("M"))
            .expect("test output resolves classes");
        let classes = &found.metadata.first().expect("source").classes;
        assert!(classes.iter().all(|c| c.file.starts_with(&test_out)));
    }

    #[test]
    fn unparseable_metadata_is_skipped_not_fatal() {
        let temp = TempDir::new().expect("temp dir");
        let out = utf8(&temp).join("out");
        write_class(&out, "com.x.A", &[]);
        write_class(&out, "com.x.B", &[]);
        std::fs::write(out.join("a.jdo"), "not xml at all").expect("write");
        std::fs::write(out.join("b.jdo"), JDO).expect("write");

        let host = ScriptedHost::new().with_module("M", &out, None);
        let extensions = extensions();
        let discovery = ArtifactDiscovery::new(&host, settings(&extensions, false));
        let found = discovery
            .discover_module(&ModuleName::from("M"))
            .expect("discovery succeeds");

        assert_eq!(found.skipped_files.len(), 1);
        assert_eq!(found.metadata.len(), 1);
    }

    #[test]
    fn annotated_classes_come_from_the_host() {
        let temp = TempDir::new().expect("temp dir");
        let out = utf8(&temp).join("out");
        write_class(&out, "com.x.E", &["javax.persistence.Entity"]);

        let host = ScriptedHost::new()
            .with_module("M", &out, None)
            .with_annotated("M", &["com.x.E"]);
        let extensions = extensions();
        let discovery = ArtifactDiscovery::new(&host, settings(&extensions, false));
        let found = discovery
            .discover_module(&ModuleName::from("M"))
            .expect("discovery succeeds");

        assert!(found.metadata.is_empty());
        let source = found.annotated.first().expect("annotated source");
        assert!(source.source.is_annotation_based());
        assert_eq!(source.source.path(), out.join("com/x/E.class"));
    }

    #[test]
    fn empty_module_discovers_nothing() {
        let temp = TempDir::new().expect("temp dir");
        let out = utf8(&temp).join("out");
        std::fs::create_dir_all(&out).expect("mkdir");

        let host = ScriptedHost::new().with_module("M", &out, None);
        let extensions = extensions();
        let discovery = ArtifactDiscovery::new(&host, settings(&extensions, true));
        let found = discovery
            .discover_module(&ModuleName::from("M"))
            .expect("discovery succeeds");
        assert!(found.is_empty());
    }

    #[test]
    fn find_files_ignores_other_extensions() {
        let temp = TempDir::new().expect("temp dir");
        let root = utf8(&temp);
        std::fs::create_dir_all(root.join("nested")).expect("mkdir");
        std::fs::write(root.join("nested/x.orm"), "").expect("write");
        std::fs::write(root.join("y.xml"), "").expect("write");

        let found = find_files_by_extension(&root, &extensions()).expect("scan");
        assert_eq!(found, vec![root.join("nested/x.orm")]);
    }
}
