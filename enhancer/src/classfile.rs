//! Minimal JVM class-file reader.
//!
//! Only the parts needed by the orchestrator are decoded: the class name,
//! constructor descriptors (used to probe which enhancer entry-point shape is
//! present) and class-level annotation types (used to find persistence
//! annotated classes). Everything else is skipped. Malformed input yields
//! `None`.

const MAGIC: u32 = 0xCAFE_BABE;
const CONSTRUCTOR_NAME: &str = "<init>";
const VISIBLE_ANNOTATIONS: &str = "RuntimeVisibleAnnotations";
const INVISIBLE_ANNOTATIONS: &str = "RuntimeInvisibleAnnotations";

/// The decoded subset of a class file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassFile {
    class_name: String,
    constructor_descriptors: Vec<String>,
    annotation_types: Vec<String>,
}

impl ClassFile {
    /// Fully qualified, dot-separated class name.
    #[must_use]
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Method descriptors of every declared constructor, e.g.
    /// `(Ljava/lang/String;)V`.
    #[must_use]
    pub fn constructor_descriptors(&self) -> &[String] {
        &self.constructor_descriptors
    }

    /// Returns `true` when a constructor with exactly `descriptor` exists.
    #[must_use]
    pub fn has_constructor(&self, descriptor: &str) -> bool {
        self.constructor_descriptors.iter().any(|d| d == descriptor)
    }

    /// Dot-separated names of class-level annotations.
    #[must_use]
    pub fn annotation_types(&self) -> &[String] {
        &self.annotation_types
    }

    /// Returns `true` when the class carries any of `annotations`.
    #[must_use]
    pub fn has_any_annotation(&self, annotations: &[&str]) -> bool {
        self.annotation_types
            .iter()
            .any(|found| annotations.contains(&found.as_str()))
    }
}

/// Converts a qualified class name to its relative class-file path.
///
/// # Examples
///
/// ```
/// use bytecode_enhancer::classfile::class_file_path;
///
/// assert_eq!(class_file_path("com.x.A"), "com/x/A.class");
/// ```
#[must_use]
pub fn class_file_path(class_name: &str) -> String {
    format!("{}.class", class_name.replace('.', "/"))
}

/// Parses the subset of a class file described by [`ClassFile`].
#[must_use]
pub fn parse(bytes: &[u8]) -> Option<ClassFile> {
    let mut reader = Reader::new(bytes);
    if reader.u32()? != MAGIC {
        return None;
    }
    reader.skip(4)?;
    let pool = ConstantPool::read(&mut reader)?;

    reader.skip(2)?;
    let this_class = reader.u16()?;
    reader.skip(2)?;
    let interfaces = reader.u16()?;
    reader.skip(usize::from(interfaces) * 2)?;

    skip_members(&mut reader)?;
    let constructor_descriptors = read_constructors(&mut reader, &pool)?;
    let annotation_types = read_class_annotations(&mut reader, &pool)?;

    Some(ClassFile {
        class_name: pool.class_name(this_class)?.replace('/', "."),
        constructor_descriptors,
        annotation_types,
    })
}

fn skip_members(reader: &mut Reader<'_>) -> Option<()> {
    let count = reader.u16()?;
    for _ in 0..count {
        reader.skip(6)?;
        skip_attributes(reader)?;
    }
    Some(())
}

fn skip_attributes(reader: &mut Reader<'_>) -> Option<()> {
    let count = reader.u16()?;
    for _ in 0..count {
        reader.skip(2)?;
        let length = reader.u32()?;
        reader.skip(usize::try_from(length).ok()?)?;
    }
    Some(())
}

fn read_constructors(reader: &mut Reader<'_>, pool: &ConstantPool) -> Option<Vec<String>> {
    let count = reader.u16()?;
    let mut descriptors = Vec::new();
    for _ in 0..count {
        reader.skip(2)?;
        let name = reader.u16()?;
        let descriptor = reader.u16()?;
        skip_attributes(reader)?;
        if pool.utf8(name)? == CONSTRUCTOR_NAME {
            descriptors.push(pool.utf8(descriptor)?.to_owned());
        }
    }
    Some(descriptors)
}

fn read_class_annotations(reader: &mut Reader<'_>, pool: &ConstantPool) -> Option<Vec<String>> {
    let count = reader.u16()?;
    let mut annotations = Vec::new();
    for _ in 0..count {
        let name = reader.u16()?;
        let length = usize::try_from(reader.u32()?).ok()?;
        let body = reader.take(length)?;
        let attribute = pool.utf8(name)?;
        if attribute == VISIBLE_ANNOTATIONS || attribute == INVISIBLE_ANNOTATIONS {
            let mut inner = Reader::new(body);
            let entries = inner.u16()?;
            for _ in 0..entries {
                let type_index = read_annotation(&mut inner)?;
                annotations.push(descriptor_to_class_name(pool.utf8(type_index)?));
            }
        }
    }
    Some(annotations)
}

/// Reads one annotation structure and returns its type index.
fn read_annotation(reader: &mut Reader<'_>) -> Option<u16> {
    let type_index = reader.u16()?;
    let pairs = reader.u16()?;
    for _ in 0..pairs {
        reader.skip(2)?;
        skip_element_value(reader)?;
    }
    Some(type_index)
}

fn skip_element_value(reader: &mut Reader<'_>) -> Option<()> {
    match reader.u8()? {
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' | b's' | b'c' => reader.skip(2),
        b'e' => reader.skip(4),
        b'@' => read_annotation(reader).map(|_| ()),
        b'[' => {
            let values = reader.u16()?;
            for _ in 0..values {
                skip_element_value(reader)?;
            }
            Some(())
        }
        _ => None,
    }
}

fn descriptor_to_class_name(descriptor: &str) -> String {
    descriptor
        .strip_prefix('L')
        .and_then(|d| d.strip_suffix(';'))
        .unwrap_or(descriptor)
        .replace('/', ".")
}

#[derive(Debug, Clone)]
enum Constant {
    Utf8(String),
    Class(u16),
    Other,
}

struct ConstantPool {
    entries: Vec<Constant>,
}

impl ConstantPool {
    fn read(reader: &mut Reader<'_>) -> Option<Self> {
        let count = usize::from(reader.u16()?);
        let mut entries = vec![Constant::Other; count];
        let mut index = 1;
        while index < count {
            let (constant, slots) = match reader.u8()? {
                1 => {
                    let length = usize::from(reader.u16()?);
                    let bytes = reader.take(length)?;
                    (Constant::Utf8(String::from_utf8_lossy(bytes).into_owned()), 1)
                }
                7 => (Constant::Class(reader.u16()?), 1),
                8 | 16 | 19 | 20 => {
                    reader.skip(2)?;
                    (Constant::Other, 1)
                }
                15 => {
                    reader.skip(3)?;
                    (Constant::Other, 1)
                }
                3 | 4 | 9 | 10 | 11 | 12 | 17 | 18 => {
                    reader.skip(4)?;
                    (Constant::Other, 1)
                }
                5 | 6 => {
                    reader.skip(8)?;
                    (Constant::Other, 2)
                }
                _ => return None,
            };
            *entries.get_mut(index)? = constant;
            index += slots;
        }
        Some(Self { entries })
    }

    fn utf8(&self, index: u16) -> Option<&str> {
        match self.entries.get(usize::from(index))? {
            Constant::Utf8(value) => Some(value),
            _ => None,
        }
    }

    fn class_name(&self, index: u16) -> Option<&str> {
        match self.entries.get(usize::from(index))? {
            Constant::Class(name) => self.utf8(*name),
            _ => None,
        }
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    fn take(&mut self, length: usize) -> Option<&'a [u8]> {
        let end = self.position.checked_add(length)?;
        let slice = self.bytes.get(self.position..end)?;
        self.position = end;
        Some(slice)
    }

    fn skip(&mut self, length: usize) -> Option<()> {
        self.take(length).map(|_| ())
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1)?.first().copied()
    }

    fn u16(&mut self) -> Option<u16> {
        let bytes: [u8; 2] = self.take(2)?.try_into().ok()?;
        Some(u16::from_be_bytes(bytes))
    }

    fn u32(&mut self) -> Option<u32> {
        let bytes: [u8; 4] = self.take(4)?.try_into().ok()?;
        Some(u32::from_be_bytes(bytes))
    }
}

/// Assembles minimal class files for tests.
#[cfg(any(test, feature = "test-support"))]
pub mod fixtures {
    /// Builds a class file declaring `class_name` with the given constructor
    /// descriptors and class-level annotation types (dot-separated).
    #[must_use]
    pub fn class_bytes(class_name: &str, constructors: &[&str], annotations: &[&str]) -> Vec<u8> {
        let mut pool: Vec<Vec<u8>> = Vec::new();
        let utf8 = |pool: &mut Vec<Vec<u8>>, value: &str| -> u16 {
            let mut entry = vec![1];
            entry.extend_from_slice(&u16_bytes(value.len()));
            entry.extend_from_slice(value.as_bytes());
            pool.push(entry);
            u16_index(pool.len())
        };

        let name_index = utf8(&mut pool, &class_name.replace('.', "/"));
        let mut class_entry = vec![7];
        class_entry.extend_from_slice(&name_index.to_be_bytes());
        pool.push(class_entry);
        let this_class = u16_index(pool.len());
        let init = utf8(&mut pool, "<init>");
        let code = utf8(&mut pool, "Code");
        let descriptor_indices: Vec<u16> =
            constructors.iter().map(|d| utf8(&mut pool, d)).collect();
        let attribute_name = utf8(&mut pool, "RuntimeVisibleAnnotations");
        let annotation_indices: Vec<u16> = annotations
            .iter()
            .map(|a| utf8(&mut pool, &format!("L{};", a.replace('.', "/"))))
            .collect();

        let mut out = vec![0xCA, 0xFE, 0xBA, 0xBE, 0, 0, 0, 52];
        out.extend_from_slice(&u16_bytes(pool.len() + 1));
        for entry in &pool {
            out.extend_from_slice(entry);
        }
        out.extend_from_slice(&[0, 0x21]);
        out.extend_from_slice(&this_class.to_be_bytes());
        out.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
        out.extend_from_slice(&u16_bytes(descriptor_indices.len()));
        for descriptor in &descriptor_indices {
            out.extend_from_slice(&[0, 1]);
            out.extend_from_slice(&init.to_be_bytes());
            out.extend_from_slice(&descriptor.to_be_bytes());
            out.extend_from_slice(&[0, 1]);
            out.extend_from_slice(&code.to_be_bytes());
            out.extend_from_slice(&[0, 0, 0, 1, 0xB1]);
        }
        if annotation_indices.is_empty() {
            out.extend_from_slice(&[0, 0]);
        } else {
            let mut body = u16_bytes(annotation_indices.len()).to_vec();
            for annotation in &annotation_indices {
                body.extend_from_slice(&annotation.to_be_bytes());
                body.extend_from_slice(&[0, 0]);
            }
            out.extend_from_slice(&[0, 1]);
            out.extend_from_slice(&attribute_name.to_be_bytes());
            out.extend_from_slice(&u32::try_from(body.len()).unwrap_or(0).to_be_bytes());
            out.extend_from_slice(&body);
        }
        out
    }

    fn u16_bytes(value: usize) -> [u8; 2] {
        u16::try_from(value).unwrap_or(u16::MAX).to_be_bytes()
    }

    fn u16_index(len: usize) -> u16 {
        u16::try_from(len).unwrap_or(u16::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::class_bytes;
    use super::*;

    #[test]
    fn reads_class_name_and_constructors() {
        let bytes = class_bytes(
            "org.datanucleus.enhancer.DataNucleusEnhancer",
            &["(Ljava/lang/String;)V", "()V"],
            &[],
        );
        let class = parse(&bytes).expect("valid class file");
        assert_eq!(
            class.class_name(),
            "org.datanucleus.enhancer.DataNucleusEnhancer"
        );
        assert!(class.has_constructor("(Ljava/lang/String;)V"));
        assert!(!class.has_constructor("(Ljava/lang/String;Ljava/lang/String;)V"));
    }

    #[test]
    fn reads_class_level_annotations() {
        let bytes = class_bytes("com.x.A", &["()V"], &["javax.persistence.Entity"]);
        let class = parse(&bytes).expect("valid class file");
        assert_eq!(class.annotation_types(), ["javax.persistence.Entity"]);
        assert!(class.has_any_annotation(&["javax.persistence.Entity"]));
        assert!(!class.has_any_annotation(&["javax.jdo.annotations.PersistenceCapable"]));
    }

    #[test]
    fn rejects_bad_magic() {
        assert!(parse(b"not a class file").is_none());
    }

    #[test]
    fn rejects_truncated_input() {
        let bytes = class_bytes("com.x.A", &["()V"], &[]);
        let truncated = bytes.get(..bytes.len() / 2).expect("slice");
        assert!(parse(truncated).is_none());
    }

    #[test]
    fn descriptor_conversion_handles_nested_packages() {
        assert_eq!(
            descriptor_to_class_name("Ljavax/jdo/annotations/PersistenceCapable;"),
            "javax.jdo.annotations.PersistenceCapable"
        );
    }
}
