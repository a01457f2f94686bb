use std::io::{self, Write};
use std::path::Path;

use tempfile::{Builder, NamedTempFile};

const HARNESS_TEMPLATE: &str = include_str!("harness.py");
const SOURCE_PLACEHOLDER: &str = "__SW_SOURCE__";

/// Prefix of every harness-internal identifier; output lines mentioning it
/// are scrubbed.
pub(crate) const HARNESS_IDENT_PREFIX: &str = "_sw_";

/// Embed `source` in the harness as a string literal.
///
/// A JSON string is also a valid Python string literal, so no escaping
/// rules of our own are involved.
pub(crate) fn render(source: &str) -> Result<String, serde_json::Error> {
    let literal = serde_json::to_string(source)?;
    Ok(HARNESS_TEMPLATE.replacen(SOURCE_PLACEHOLDER, &literal, 1))
}

/// Harness file in the scratch directory, deleted on drop.
pub(crate) struct HarnessScript {
    file: NamedTempFile,
}

impl HarnessScript {
    pub(crate) fn create(scratch_dir: &Path, rendered: &str) -> io::Result<Self> {
        let mut file = Builder::new()
            .prefix("run-")
            .suffix(".py")
            .tempfile_in(scratch_dir)?;
        file.write_all(rendered.as_bytes())?;
        file.flush()?;
        Ok(Self { file })
    }

    pub(crate) fn path(&self) -> &Path {
        self.file.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn source_is_embedded_once_as_a_literal() -> anyhow::Result<()> {
        let rendered = render("print(\"__SW_SOURCE__\")\n")?;
        assert!(rendered.contains(r#"_sw_source = "print(\"__SW_SOURCE__\")\n""#));
        assert_eq!(rendered.matches("_sw_source = ").count(), 1);
        Ok(())
    }

    #[test]
    fn only_numeric_and_random_modules_are_importable() {
        assert!(
            HARNESS_TEMPLATE.contains(r#"_SW_ALLOWED_MODULES = frozenset(("math", "random"))"#)
        );
    }

    #[test]
    fn script_file_is_removed_on_drop() -> anyhow::Result<()> {
        let scratch = TempDir::new()?;
        let script = HarnessScript::create(scratch.path(), "print(1)\n")?;
        let path = script.path().to_path_buf();
        assert!(path.starts_with(scratch.path()));
        assert!(path.is_file());
        drop(script);
        assert!(!path.exists());
        Ok(())
    }
}
