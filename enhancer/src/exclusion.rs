//! Dependency exclusion by exact path or version-insensitive identity.
//!
//! Manually pinned enhancer dependencies must replace, not duplicate, the
//! project's own copy of the same library. A project dependency is dropped
//! from a module's execution environment when its normalised path was
//! excluded explicitly, or when its base identity (file name without
//! extension and version suffix) matches one of the manual dependencies.

use camino::Utf8Path;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static BACKSLASHES: Lazy<Regex> = Lazy::new(|| compile(r"\\+"));
static REPEATED_SLASHES: Lazy<Regex> = Lazy::new(|| compile(r"/+"));

/// Version suffix patterns, applied in order.
static VERSION_PATTERNS: Lazy<[Regex; 3]> = Lazy::new(|| {
    [
        compile(r"-[0-9][a-zA-Z0-9]+$"),
        compile(r"\.[0-9][a-zA-Z0-9]+$"),
        compile(r"-([0-9]\.?)+"),
    ]
});

const QUALIFIERS: &[&str] = &[
    "-RELEASE",
    "-release",
    "-SNAPSHOT",
    "-snapshot",
    ".RELEASE",
    ".release",
    ".SNAPSHOT",
    ".snapshot",
];

/// Multi-module products whose jar names vary between releases. Any name
/// containing the fragment (case-insensitive) collapses to the short name.
const PRODUCT_FRAGMENTS: &[(&str, &str)] = &[("datanucleus", "datanucleus"), ("openjpa", "openjpa")];

#[expect(clippy::expect_used, reason = "patterns are compile-time constants")]
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static pattern compiles")
}

/// Collapse path-separator variants and duplicate separators.
///
/// # Examples
///
/// ```
/// use bytecode_enhancer::exclusion::normalize;
///
/// assert_eq!(normalize(r"C:\\libs\\\\foo.jar"), "C:/libs/foo.jar");
/// assert_eq!(normalize("/opt//libs///foo.jar"), "/opt/libs/foo.jar");
/// ```
#[must_use]
pub fn normalize(path: &str) -> String {
    let forward = BACKSLASHES.replace_all(path, "/");
    REPEATED_SLASHES.replace_all(&forward, "/").into_owned()
}

/// Returns the file name of `path` without its extension.
///
/// A leading dot (hidden files) is not treated as an extension separator.
/// Returns `None` for empty names.
#[must_use]
pub fn file_name_base(path: &str) -> Option<String> {
    let normalized = normalize(path);
    let file_name = normalized.rsplit('/').next().unwrap_or(&normalized);
    let base = match file_name.rfind('.') {
        Some(index) if index > 0 => file_name.get(..index).unwrap_or(file_name),
        _ => file_name,
    };
    (!base.is_empty()).then(|| base.to_owned())
}

/// Computes the version-insensitive identity of a dependency path.
///
/// # Examples
///
/// ```
/// use bytecode_enhancer::exclusion::base_identity;
///
/// assert_eq!(
///     base_identity("libfoo-2.3.1-SNAPSHOT.jar"),
///     base_identity("libfoo-2.5.0.jar"),
/// );
/// assert_eq!(base_identity("/lib/datanucleus-api-jpa-6.0.1.jar"), "datanucleus");
/// ```
#[must_use]
pub fn base_identity(path: &str) -> String {
    let base = file_name_base(path).unwrap_or_else(|| normalize(path));
    let lowered = base.to_lowercase();
    if let Some((_, short)) = PRODUCT_FRAGMENTS
        .iter()
        .find(|(fragment, _)| lowered.contains(fragment))
    {
        return (*short).to_owned();
    }

    let mut reduced = base;
    for qualifier in QUALIFIERS {
        reduced = reduced.replace(qualifier, "");
    }
    for pattern in VERSION_PATTERNS.iter() {
        reduced = pattern.replace_all(&reduced, "").into_owned();
    }
    reduced
}

/// Exclusion rules for a single module's execution environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionSet {
    exact_paths: HashSet<String>,
    base_identities: HashSet<String>,
}

impl ExclusionSet {
    /// Builds exclusions from explicitly excluded paths and manual
    /// dependencies.
    ///
    /// Manual dependencies are excluded by exact path (they are appended
    /// verbatim later) and by base identity (so another version of the same
    /// library coming from the project is dropped).
    #[must_use]
    pub fn compute<E, M>(excluded_paths: E, manual_dependencies: M) -> Self
    where
        E: IntoIterator,
        E::Item: AsRef<str>,
        M: IntoIterator,
        M::Item: AsRef<str>,
    {
        let mut exact_paths: HashSet<String> = excluded_paths
            .into_iter()
            .map(|path| normalize(path.as_ref()))
            .collect();
        let mut base_identities = HashSet::new();
        for dependency in manual_dependencies {
            let dependency = dependency.as_ref();
            exact_paths.insert(normalize(dependency));
            base_identities.insert(base_identity(dependency));
        }
        Self {
            exact_paths,
            base_identities,
        }
    }

    /// Returns `true` when `path` must not be placed on the classpath.
    #[must_use]
    pub fn is_excluded(&self, path: &Utf8Path) -> bool {
        let normalized = normalize(path.as_str());
        self.exact_paths.contains(&normalized)
            || self.base_identities.contains(&base_identity(&normalized))
    }

    /// Returns `true` when nothing is excluded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exact_paths.is_empty() && self.base_identities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::windows(r"C:\work\\lib\foo.jar", "C:/work/lib/foo.jar")]
    #[case::duplicates("/a//b///c", "/a/b/c")]
    #[case::mixed(r"/a\/b", "/a/b")]
    #[case::clean("/a/b", "/a/b")]
    fn normalize_collapses_separators(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize(input), expected);
    }

    #[rstest]
    #[case::jar("/lib/foo-1.0.jar", Some("foo-1.0"))]
    #[case::no_extension("/lib/foo", Some("foo"))]
    #[case::hidden("/home/.profile", Some(".profile"))]
    #[case::empty("", None)]
    fn file_name_base_strips_extension(#[case] input: &str, #[case] expected: Option<&str>) {
        assert_eq!(file_name_base(input).as_deref(), expected);
    }

    #[rstest]
    #[case::snapshot("libfoo-2.3.1-SNAPSHOT.jar", "libfoo")]
    #[case::release("libfoo-2.5.0.jar", "libfoo")]
    #[case::spring_style("spring-core-3.0.5.RELEASE.jar", "spring-core")]
    #[case::alnum_suffix("asm-3b.jar", "asm")]
    #[case::dotted_qualifier("jdo-api.3a1.jar", "jdo-api")]
    #[case::unversioned("commons-lang.jar", "commons-lang")]
    #[case::datanucleus("datanucleus-enhancer-3.1.0-m1.jar", "datanucleus")]
    #[case::openjpa("OpenJPA-all-2.2.jar", "openjpa")]
    fn base_identity_strips_versions(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(base_identity(input), expected);
    }

    #[test]
    fn manual_dependency_excludes_other_version() {
        let exclusions = ExclusionSet::compute(
            Vec::<&str>::new(),
            ["/pinned/asm-4.0.jar"],
        );
        assert!(exclusions.is_excluded(Utf8Path::new("/repo/asm-3.3.1.jar")));
        assert!(exclusions.is_excluded(Utf8Path::new("/pinned//asm-4.0.jar")));
        assert!(!exclusions.is_excluded(Utf8Path::new("/repo/jdo-api-3.0.jar")));
    }

    #[test]
    fn excluded_paths_match_exactly_only() {
        let exclusions = ExclusionSet::compute([r"\repo\jdo-api-3.0.jar"], Vec::<&str>::new());
        assert!(exclusions.is_excluded(Utf8Path::new("/repo/jdo-api-3.0.jar")));
        assert!(!exclusions.is_excluded(Utf8Path::new("/repo/jdo-api-3.1.jar")));
    }

    #[test]
    fn empty_exclusions_exclude_nothing() {
        let exclusions = ExclusionSet::default();
        assert!(exclusions.is_empty());
        assert!(!exclusions.is_excluded(Utf8Path::new("/repo/anything.jar")));
    }
}
