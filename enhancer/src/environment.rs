//! Per-module execution environments.
//!
//! An [`ExecutionEnvironment`] is the classpath an enhancer runs against for
//! one module, together with a lookup cache that belongs to that environment
//! alone. Environments are built fresh for every module by
//! [`IsolatedEnvironmentFactory`] and dropped once the module is done; no
//! class lookup result ever crosses from one environment to another.

use crate::classfile::class_file_path;
use crate::error::{EnhanceError, Result};
use crate::exclusion::{ExclusionSet, normalize};
use crate::host::CompileContext;
use crate::module_name::ModuleName;
use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, trace};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;

/// Separator used when joining classpath entries for a JVM command line.
#[cfg(windows)]
pub const CLASSPATH_SEPARATOR: char = ';';
/// Separator used when joining classpath entries for a JVM command line.
#[cfg(not(windows))]
pub const CLASSPATH_SEPARATOR: char = ':';

/// Where a class was found on an environment's classpath.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassLocation {
    /// A class file inside a classpath directory.
    Directory(Utf8PathBuf),
    /// An entry inside a jar archive.
    Archive {
        /// The jar file.
        archive: Utf8PathBuf,
        /// Entry name within the jar.
        entry: String,
    },
}

impl ClassLocation {
    /// Reads the class file bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EnhanceError::Io`] if the file or archive entry cannot be
    /// read.
    pub fn read(&self) -> Result<Vec<u8>> {
        match self {
            Self::Directory(path) => Ok(std::fs::read(path)?),
            Self::Archive { archive, entry } => {
                let mut zip = open_archive(archive)?;
                let mut file = zip.by_name(entry).map_err(zip_error)?;
                let mut bytes = Vec::new();
                file.read_to_end(&mut bytes)?;
                Ok(bytes)
            }
        }
    }
}

/// A module-scoped classpath with its own class lookup cache.
#[derive(Debug)]
pub struct ExecutionEnvironment {
    module: ModuleName,
    classpath: Vec<Utf8PathBuf>,
    lookups: RefCell<HashMap<String, Option<ClassLocation>>>,
}

impl ExecutionEnvironment {
    /// Creates an environment over an already-validated classpath.
    #[must_use]
    pub fn new(module: ModuleName, classpath: Vec<Utf8PathBuf>) -> Self {
        Self {
            module,
            classpath,
            lookups: RefCell::new(HashMap::new()),
        }
    }

    /// Module this environment was built for.
    #[must_use]
    pub fn module(&self) -> &ModuleName {
        &self.module
    }

    /// Classpath entries in resolution order.
    #[must_use]
    pub fn classpath(&self) -> &[Utf8PathBuf] {
        &self.classpath
    }

    /// Classpath entries joined with the platform separator.
    #[must_use]
    pub fn classpath_string(&self) -> String {
        let mut joined = String::new();
        for (index, entry) in self.classpath.iter().enumerate() {
            if index > 0 {
                joined.push(CLASSPATH_SEPARATOR);
            }
            joined.push_str(entry.as_str());
        }
        joined
    }

    /// Finds `class_name` on the classpath. The first entry containing the
    /// class wins; entries that cannot be read as archives are skipped.
    /// Results, including misses, are cached in this environment only.
    #[must_use]
    pub fn resolve_class(&self, class_name: &str) -> Option<ClassLocation> {
        if let Some(cached) = self.lookups.borrow().get(class_name) {
            trace!("class lookup cache hit for {class_name} in {}", self.module);
            return cached.clone();
        }
        let relative = class_file_path(class_name);
        let mut found = None;
        for entry in &self.classpath {
            if entry.is_dir() {
                let candidate = entry.join(&relative);
                if candidate.is_file() {
                    found = Some(ClassLocation::Directory(candidate));
                    break;
                }
            } else if archive_contains(entry, &relative) {
                found = Some(ClassLocation::Archive {
                    archive: entry.clone(),
                    entry: relative.clone(),
                });
                break;
            }
        }
        self.lookups
            .borrow_mut()
            .insert(class_name.to_owned(), found.clone());
        found
    }

    /// Number of cached lookups.
    #[must_use]
    pub fn cached_lookups(&self) -> usize {
        self.lookups.borrow().len()
    }
}

fn open_archive(path: &Utf8Path) -> Result<zip::ZipArchive<File>> {
    let file = File::open(path)?;
    zip::ZipArchive::new(file).map_err(zip_error)
}

fn archive_contains(path: &Utf8Path, entry: &str) -> bool {
    match open_archive(path) {
        Ok(archive) => archive.index_for_name(entry).is_some(),
        Err(err) => {
            debug!("skipping unreadable classpath entry {path}: {err}");
            false
        }
    }
}

fn zip_error(err: zip::result::ZipError) -> EnhanceError {
    match err {
        zip::result::ZipError::Io(io) => EnhanceError::Io(io),
        other => EnhanceError::Io(std::io::Error::other(other)),
    }
}

/// Builds one [`ExecutionEnvironment`] per module from the host's view of
/// the project.
pub struct IsolatedEnvironmentFactory<'a> {
    host: &'a dyn CompileContext,
    bridge_locations: Vec<Utf8PathBuf>,
}

impl<'a> IsolatedEnvironmentFactory<'a> {
    /// Creates a factory over `host`.
    #[must_use]
    pub fn new(host: &'a dyn CompileContext) -> Self {
        Self {
            host,
            bridge_locations: Vec::new(),
        }
    }

    /// Sets the code locations of the binding glue, placed first on every
    /// classpath.
    #[must_use]
    pub fn with_bridge_locations(mut self, locations: Vec<Utf8PathBuf>) -> Self {
        self.bridge_locations = locations;
        self
    }

    /// Builds the environment for `module`.
    ///
    /// Entries are assembled in order: bridge locations, the module's
    /// project libraries minus `exclusions`, every project output
    /// directory, then `manual_dependencies`. Each entry is canonicalised
    /// and appears at most once.
    ///
    /// # Errors
    ///
    /// Returns [`EnhanceError::EnvironmentBuild`] if any entry cannot be
    /// resolved to an existing location.
    pub fn build(
        &self,
        module: &ModuleName,
        exclusions: &ExclusionSet,
        manual_dependencies: &[Utf8PathBuf],
    ) -> Result<ExecutionEnvironment> {
        let mut classpath = ClasspathBuilder::new(module);
        for location in &self.bridge_locations {
            classpath.push(location)?;
        }
        for library in self.host.project_libraries(module) {
            if exclusions.is_excluded(&library) {
                debug!("excluding {library} from the environment of {module}");
                continue;
            }
            classpath.push(&library)?;
        }
        for directory in self.host.all_output_directories() {
            classpath.push(&directory)?;
        }
        for dependency in manual_dependencies {
            classpath.push(dependency)?;
        }
        let entries = classpath.finish();
        debug!("environment for {module}: {} classpath entries", entries.len());
        Ok(ExecutionEnvironment::new(module.clone(), entries))
    }
}

struct ClasspathBuilder<'m> {
    module: &'m ModuleName,
    entries: Vec<Utf8PathBuf>,
    seen: std::collections::HashSet<String>,
}

impl<'m> ClasspathBuilder<'m> {
    fn new(module: &'m ModuleName) -> Self {
        Self {
            module,
            entries: Vec::new(),
            seen: std::collections::HashSet::new(),
        }
    }

    fn push(&mut self, path: &Utf8Path) -> Result<()> {
        let canonical =
            path.canonicalize_utf8()
                .map_err(|err| EnhanceError::EnvironmentBuild {
                    module: self.module.clone(),
                    path: path.to_owned(),
                    reason: err.to_string(),
                })?;
        if self.seen.insert(normalize(canonical.as_str())) {
            self.entries.push(canonical);
        }
        Ok(())
    }

    fn finish(self) -> Vec<Utf8PathBuf> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{ScriptedHost, write_class, write_jar};
    use tempfile::TempDir;

    fn root(temp: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(temp.path().to_path_buf())
            .expect("utf8 temp dir")
            .canonicalize_utf8()
            .expect("canonical temp dir")
    }

    #[test]
    fn manual_dependency_replaces_project_version() {
        let temp = TempDir::new().expect("temp dir");
        let root = root(&temp);
        let out = root.join("out");
        std::fs::create_dir_all(&out).expect("mkdir");
        let project_asm = root.join("repo/asm-3.3.1.jar");
        let project_jdo = root.join("repo/jdo-api-3.0.jar");
        let manual_asm = root.join("pinned/asm-4.0.jar");
        for jar in [&project_asm, &project_jdo, &manual_asm] {
            write_jar(jar, &[]);
        }

        let host = ScriptedHost::new()
            .with_module("M", &out, None)
            .with_libraries("M", &[&project_asm, &project_jdo]);
        let manual = vec![manual_asm.clone()];
        let exclusions = ExclusionSet::compute(Vec::<&str>::new(), manual.iter().map(|p| p.as_str()));

        let environment = IsolatedEnvironmentFactory::new(&host)
            .build(&ModuleName::from("M"), &exclusions, &manual)
            .expect("environment builds");

        let classpath = environment.classpath();
        assert!(!classpath.contains(&project_asm));
        assert_eq!(classpath.iter().filter(|p| **p == manual_asm).count(), 1);
        assert_eq!(classpath, [project_jdo, out, manual_asm].as_slice());
    }

    #[test]
    fn bridge_locations_come_first() {
        let temp = TempDir::new().expect("temp dir");
        let root = root(&temp);
        let out = root.join("out");
        let bridge = root.join("bridge");
        std::fs::create_dir_all(&out).expect("mkdir");
        std::fs::create_dir_all(&bridge).expect("mkdir");

        let host = ScriptedHost::new().with_module("M", &out, None);
        let environment = IsolatedEnvironmentFactory::new(&host)
            .with_bridge_locations(vec![bridge.clone()])
            .build(&ModuleName::from("M"), &ExclusionSet::default(), &[])
            .expect("environment builds");

        assert_eq!(environment.classpath().first(), Some(&bridge));
    }

    #[test]
    fn unresolvable_path_is_an_environment_error() {
        let temp = TempDir::new().expect("temp dir");
        let root = root(&temp);
        let out = root.join("out");
        std::fs::create_dir_all(&out).expect("mkdir");
        let missing = root.join("missing.jar");

        let host = ScriptedHost::new()
            .with_module("M", &out, None)
            .with_libraries("M", &[&missing]);
        let err = IsolatedEnvironmentFactory::new(&host)
            .build(&ModuleName::from("M"), &ExclusionSet::default(), &[])
            .expect_err("missing library");

        match err {
            EnhanceError::EnvironmentBuild { module, path, .. } => {
                assert_eq!(module.as_str(), "M");
                assert_eq!(path, missing);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn resolves_classes_from_directories_and_jars() {
        let temp = TempDir::new().expect("temp dir");
        let root = root(&temp);
        let out = root.join("out");
        write_class(&out, "com.x.A", &[]);
        let jar = root.join("lib.jar");
        write_jar(&jar, &[("org/y/B.class", b"bytes".as_slice())]);

        let environment =
            ExecutionEnvironment::new(ModuleName::from("M"), vec![out.clone(), jar.clone()]);

        assert_eq!(
            environment.resolve_class("com.x.A"),
            Some(ClassLocation::Directory(out.join("com/x/A.class")))
        );
        let archived = environment
            .resolve_class("org.y.B")
            .expect("found in jar");
        assert_eq!(archived.read().expect("read entry"), b"bytes");
        assert_eq!(environment.resolve_class("org.z.C"), None);
        assert_eq!(environment.cached_lookups(), 3);
    }

    #[test]
    fn unreadable_archives_are_skipped() {
        let temp = TempDir::new().expect("temp dir");
        let root = root(&temp);
        let pom = root.join("libfoo-1.0.pom");
        std::fs::write(&pom, "<project/>").expect("write pom");
        let truncated = root.join("broken-2.0.jar");
        std::fs::write(&truncated, b"PK\x03\x04").expect("write truncated jar");
        let jar = root.join("datanucleus-core-5.2.0.jar");
        write_jar(&jar, &[("org/y/B.class", b"bytes".as_slice())]);

        let environment =
            ExecutionEnvironment::new(ModuleName::from("M"), vec![pom, truncated, jar.clone()]);

        assert_eq!(
            environment.resolve_class("org.y.B"),
            Some(ClassLocation::Archive {
                archive: jar,
                entry: "org/y/B.class".to_owned(),
            })
        );
        assert_eq!(environment.resolve_class("org.z.C"), None);
    }

    #[test]
    fn environments_do_not_share_lookups() {
        let temp = TempDir::new().expect("temp dir");
        let root = root(&temp);
        let first_out = root.join("first");
        let second_out = root.join("second");
        write_class(&first_out, "com.x.A", &[]);
        std::fs::create_dir_all(&second_out).expect("mkdir");

        let first = ExecutionEnvironment::new(ModuleName::from("A"), vec![first_out]);
        let second = ExecutionEnvironment::new(ModuleName::from("B"), vec![second_out]);

        assert!(first.resolve_class("com.x.A").is_some());
        assert!(second.resolve_class("com.x.A").is_none());
    }

    #[test]
    fn classpath_string_joins_with_separator() {
        let environment = ExecutionEnvironment::new(
            ModuleName::from("M"),
            vec![Utf8PathBuf::from("/a"), Utf8PathBuf::from("/b.jar")],
        );
        assert_eq!(
            environment.classpath_string(),
            format!("/a{CLASSPATH_SEPARATOR}/b.jar")
        );
    }
}
