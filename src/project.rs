//! `long.mod` project manifest parsing (`spec.md` §6).
//!
//! A hand-rolled line-oriented parser in the teacher's style: their own REPL
//! session format (`session_manager.rs`, since deleted as out of scope) is
//! likewise a flat `key value` line format rather than a pulled-in config
//! crate, so the same approach is used here instead of reaching for a TOML
//! parser for a format this small.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectManifest {
    pub module: String,
    pub root_namespace: Option<String>,
}

impl Default for ProjectManifest {
    fn default() -> Self {
        Self { module: "local".to_string(), root_namespace: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManifestParseError {
    pub line: u32,
}

impl ProjectManifest {
    /// Parses a `long.mod` file's contents. Recognized lines:
    /// `module <path>` and `root_namespace <name>`. Blank lines and lines
    /// starting with `#` are ignored. Anything else is an error.
    pub fn parse(source: &str) -> Result<Self, ManifestParseError> {
        let mut manifest = Self::default();
        for (idx, raw_line) in source.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.splitn(2, char::is_whitespace);
            let key = parts.next().unwrap_or_default();
            let value = parts.next().unwrap_or_default().trim();
            match key {
                "module" if !value.is_empty() => manifest.module = value.to_string(),
                "root_namespace" if !value.is_empty() => manifest.root_namespace = Some(value.to_string()),
                _ => return Err(ManifestParseError { line: idx as u32 + 1 }),
            }
        }
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_local_module_when_absent() {
        let manifest = ProjectManifest::parse("").unwrap();
        assert_eq!(manifest.module, "local");
        assert_eq!(manifest.root_namespace, None);
    }

    #[test]
    fn parses_module_and_root_namespace() {
        let manifest = ProjectManifest::parse("module github.com/acme/app\nroot_namespace app\n").unwrap();
        assert_eq!(manifest.module, "github.com/acme/app");
        assert_eq!(manifest.root_namespace, Some("app".to_string()));
    }

    #[test]
    fn rejects_unknown_directive() {
        assert!(ProjectManifest::parse("bogus thing").is_err());
    }
}
