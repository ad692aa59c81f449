//! Persistence metadata file parsing.
//!
//! Metadata files are XML documents declaring persistence-capable classes.
//! Two dialects are recognised:
//!
//! - JDO (`*.jdo`): `<package name="p"><class name="C"/></package>`
//! - JPA (`orm.xml` style): `<entity class="p.C"/>`, `<mapped-superclass>`
//!   and `<embeddable>`, optionally qualified by `<package>p</package>`.
//!
//! Only the declared class names are extracted; the rest of the mapping is
//! left to the enhancer.

use crate::error::{EnhanceError, Result};
use camino::Utf8Path;
use once_cell::sync::Lazy;
use regex::Regex;

static COMMENTS: Lazy<Regex> = Lazy::new(|| compile(r"(?s)<!--.*?-->|<!\[CDATA\[.*?\]\]>"));
static TAGS: Lazy<Regex> = Lazy::new(|| compile(r"<(/?)([A-Za-z_][\w:.-]*)([^<>]*)>"));
static ATTRIBUTES: Lazy<Regex> =
    Lazy::new(|| compile(r#"([A-Za-z_][\w:.-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#));

const JPA_CLASS_ELEMENTS: &[&str] = &["entity", "mapped-superclass", "embeddable"];

#[expect(clippy::expect_used, reason = "patterns are compile-time constants")]
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static pattern compiles")
}

/// Reads `path` and returns the qualified class names it declares, in
/// declaration order and without duplicates.
///
/// # Errors
///
/// Returns [`EnhanceError::MetadataParse`] when the file cannot be read as
/// text or is not a recognisable XML document.
pub fn parse_metadata_file(path: &Utf8Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path).map_err(|e| EnhanceError::MetadataParse {
        path: path.to_owned(),
        reason: e.to_string(),
    })?;
    parse_metadata(&content).map_err(|reason| EnhanceError::MetadataParse {
        path: path.to_owned(),
        reason,
    })
}

/// Extracts the qualified class names declared in metadata `content`.
///
/// # Errors
///
/// Returns a description of the problem when the content has no root
/// element or contains an unterminated tag.
///
/// # Examples
///
/// ```
/// use bytecode_enhancer::metadata::parse_metadata;
///
/// let jdo = r#"<jdo><package name="com.x"><class name="A"/><class name="B"/></package></jdo>"#;
/// assert_eq!(parse_metadata(jdo).unwrap(), ["com.x.A", "com.x.B"]);
/// ```
pub fn parse_metadata(content: &str) -> std::result::Result<Vec<String>, String> {
    let stripped = COMMENTS.replace_all(content, "");
    check_well_formed(&stripped)?;

    let mut classes: Vec<String> = Vec::new();
    let mut jdo_package: Option<String> = None;
    let mut orm_package: Option<String> = None;

    for tag in TAGS.captures_iter(&stripped) {
        let closing = tag.get(1).is_some_and(|m| !m.as_str().is_empty());
        let name = tag.get(2).map_or("", |m| m.as_str());
        let attributes = tag.get(3).map_or("", |m| m.as_str());
        let self_closing = attributes.trim_end().ends_with('/');

        if name == "package" {
            if closing {
                jdo_package = None;
            } else if let Some(package) = attribute(attributes, "name") {
                jdo_package = (!self_closing).then_some(package);
            } else if let Some(end) = tag.get(0).map(|m| m.end()) {
                orm_package = element_text(&stripped, end);
            }
            continue;
        }
        if closing {
            continue;
        }

        let declared = if name == "class" {
            attribute(attributes, "name").map(|c| qualify(&c, jdo_package.as_deref()))
        } else if JPA_CLASS_ELEMENTS.contains(&name) {
            attribute(attributes, "class").map(|c| qualify(&c, orm_package.as_deref()))
        } else {
            None
        };
        if let Some(class_name) = declared {
            if !classes.contains(&class_name) {
                classes.push(class_name);
            }
        }
    }

    Ok(classes)
}

fn check_well_formed(content: &str) -> std::result::Result<(), String> {
    let mut rest = content;
    while let Some(open) = rest.find('<') {
        let after = rest.get(open + 1..).unwrap_or_default();
        match after.find('>') {
            Some(close) if !after.get(..close).unwrap_or_default().contains('<') => {
                rest = after.get(close + 1..).unwrap_or_default();
            }
            _ => return Err("unterminated tag".to_owned()),
        }
    }
    if TAGS.is_match(content) {
        Ok(())
    } else {
        Err("no root element".to_owned())
    }
}

fn attribute(attributes: &str, wanted: &str) -> Option<String> {
    ATTRIBUTES.captures_iter(attributes).find_map(|capture| {
        let key = capture.get(1)?.as_str();
        if key != wanted {
            return None;
        }
        let value = capture.get(2).or_else(|| capture.get(3))?.as_str().trim();
        (!value.is_empty()).then(|| value.to_owned())
    })
}

fn element_text(content: &str, start: usize) -> Option<String> {
    let text = content.get(start..)?;
    let end = text.find('<').unwrap_or(text.len());
    let value = text.get(..end)?.trim();
    (!value.is_empty()).then(|| value.to_owned())
}

fn qualify(class_name: &str, package: Option<&str>) -> String {
    match package {
        Some(package) if !class_name.contains('.') => format!("{package}.{class_name}"),
        _ => class_name.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    const JDO: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE jdo PUBLIC "-//Sun Microsystems, Inc.//DTD Java Data Objects Metadata 2.0//EN"
    "http://java.sun.com/dtd/jdo_2_0.dtd">
<jdo>
    <!-- <class name="Commented"/> -->
    <package name="com.x">
        <class name="A" identity-type="datastore">
            <field name="name"/>
        </class>
        <class name='B'/>
    </package>
    <package name="com.y">
        <class name="org.other.C"/>
    </package>
</jdo>"#;

    const ORM: &str = r#"<?xml version="1.0"?>
<entity-mappings>
    <package>com.shop</package>
    <entity class="Order"/>
    <mapped-superclass class="com.shop.base.Audited"/>
    <embeddable class="Address"/>
</entity-mappings>"#;

    #[test]
    fn parses_jdo_packages() {
        let classes = parse_metadata(JDO).expect("valid metadata");
        assert_eq!(classes, ["com.x.A", "com.x.B", "org.other.C"]);
    }

    #[test]
    fn parses_orm_entities() {
        let classes = parse_metadata(ORM).expect("valid metadata");
        assert_eq!(
            classes,
            ["com.shop.Order", "com.shop.base.Audited", "com.shop.Address"]
        );
    }

    #[test]
    fn deduplicates_repeated_declarations() {
        let content = r#"<jdo><package name="p"><class name="A"/></package><package name="p"><class name="A"/></package></jdo>"#;
        assert_eq!(parse_metadata(content).expect("valid"), ["p.A"]);
    }

    #[test]
    fn empty_document_declares_nothing() {
        assert!(parse_metadata("<jdo/>").expect("valid").is_empty());
    }

    #[rstest]
    #[case::plain_text("this is not xml")]
    #[case::unterminated("<jdo><package name=\"p\"")]
    #[case::empty("")]
    fn rejects_malformed_content(#[case] content: &str) {
        assert!(parse_metadata(content).is_err());
    }

    #[test]
    fn parse_file_reports_path_on_failure() {
        let temp = TempDir::new().expect("temp dir");
        let path = Utf8Path::from_path(temp.path())
            .expect("utf8")
            .join("broken.jdo");
        std::fs::write(&path, "garbage").expect("write");

        let err = parse_metadata_file(&path).expect_err("should fail");
        assert!(matches!(err, EnhanceError::MetadataParse { .. }));
        assert!(err.to_string().contains("broken.jdo"));
    }
}
