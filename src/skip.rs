use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::ir::{CODE, ClassFile};

/// Package whose classes always lose their method bodies. They implement the
/// signature-polymorphic machinery itself, which dexers reject outright.
pub(crate) const INCOMPATIBLE_PACKAGE: &str = "java/lang/invoke/";

/// Class name prefixes whose method bodies are removed instead of rewritten.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct SkipList {
    prefixes: Vec<String>,
}

impl SkipList {
    pub(crate) fn new(prefixes: Vec<String>) -> Self {
        Self { prefixes }
    }

    /// One prefix per line; blank lines and `#` comments are ignored.
    pub(crate) fn parse(text: &str) -> Self {
        let prefixes = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect();
        Self::new(prefixes)
    }

    pub(crate) fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read skip list {}", path.display()))?;
        Ok(Self::parse(&text))
    }

    pub(crate) fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    pub(crate) fn should_skip(&self, class_name: &str) -> bool {
        should_skip(class_name, &self.prefixes)
    }
}

pub(crate) fn should_skip(class_name: &str, skip_prefixes: &[String]) -> bool {
    class_name.contains(INCOMPATIBLE_PACKAGE)
        || skip_prefixes
            .iter()
            .any(|prefix| class_name.starts_with(prefix.as_str()))
}

/// Drop the `Code` attribute of every method, keeping the declarations.
/// Returns how many bodies were removed.
pub(crate) fn strip_method_bodies(class: &mut ClassFile) -> usize {
    let pool = &class.constant_pool;
    let mut removed = 0;
    for method in &mut class.methods {
        let before = method.attributes.len();
        method
            .attributes
            .retain(|attribute| !attribute.is_named(pool, CODE));
        removed += before - method.attributes.len();
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{ClassBuilder, method_code};

    #[test]
    fn prefixes_match_class_names() {
        let skip = SkipList::new(vec!["com/foo/".to_string(), "org/bar/Baz".to_string()]);

        assert!(skip.should_skip("com/foo/Thing"));
        assert!(skip.should_skip("org/bar/Baz$Inner"));
        assert!(!skip.should_skip("com/foobar/Thing"));
        assert!(!skip.should_skip("org/bar/Qux"));
    }

    #[test]
    fn hardcoded_package_is_always_skipped() {
        let skip = SkipList::default();

        assert!(skip.should_skip("java/lang/invoke/MethodHandleImpl"));
        assert!(skip.should_skip("shaded/java/lang/invoke/LambdaForm"));
        assert!(!skip.should_skip("java/lang/String"));
    }

    #[test]
    fn parse_ignores_blank_lines_and_comments() {
        let skip = SkipList::parse("# vendored\ncom/foo/\n\n  org/bar/  \n");

        assert_eq!(skip.prefixes(), ["com/foo/", "org/bar/"]);
    }

    #[test]
    fn from_file_reads_one_prefix_per_line() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("skip.txt");
        fs::write(&path, "com/foo/\r\norg/bar/\r\n").expect("write skip list");

        let skip = SkipList::from_file(&path).expect("read skip list");

        assert_eq!(skip.prefixes(), ["com/foo/", "org/bar/"]);
    }

    #[test]
    fn missing_skip_list_names_the_path() {
        let error = SkipList::from_file(Path::new("/nonexistent/skip.txt")).expect_err("missing");

        assert!(error.to_string().contains("/nonexistent/skip.txt"));
    }

    #[test]
    fn stripping_bodies_keeps_declarations() {
        let mut builder = ClassBuilder::new("com/foo/Thing");
        builder
            .method("a", "()V", 0, 0, vec![0xb1])
            .method("b", "(I)I", 1, 1, vec![0x1a, 0xac])
            .abstract_method("c", "()V");
        let mut class = builder.build();

        let removed = strip_method_bodies(&mut class);

        assert_eq!(removed, 2);
        assert_eq!(class.methods.len(), 3);
        for name in ["a", "b", "c"] {
            assert!(method_code(&class, name).is_none(), "{name}");
        }
        assert_eq!(
            class.methods[1]
                .descriptor(&class.constant_pool)
                .expect("descriptor"),
            "(I)I"
        );
    }
}
