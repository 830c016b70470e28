//! Architectural Enforcement Integration Tests
//!
//! Shared scanning helpers for the tests under `tests/`. They enforce:
//! - No sleeping outside the timer facility
//! - A synchronous arbitration engine (no spawning, no blocking waits)
//! - No panicking shortcuts in production code
//!
//! Only production code is scanned: each file is cut at its first
//! `#[cfg(test)]` line and comments are stripped.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Workspace root, two levels above this crate
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
}

/// One offending line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File, relative to the workspace root
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// The offending line, trimmed
    pub text: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.line, self.text)
    }
}

/// Production part of a source file
#[derive(Debug)]
pub struct SourceFile {
    /// File, relative to the workspace root
    pub path: PathBuf,
    /// Lines before the first `#[cfg(test)]`
    pub lines: Vec<String>,
}

impl SourceFile {
    /// Parse file contents, keeping only production lines
    #[must_use]
    pub fn from_content(path: PathBuf, content: &str) -> Self {
        let lines = content
            .lines()
            .take_while(|line| !line.trim_start().starts_with("#[cfg(test)]"))
            .map(str::to_string)
            .collect();
        Self { path, lines }
    }

    /// Lines whose code part matches `predicate`
    pub fn matching<F>(&self, predicate: F) -> Vec<Violation>
    where
        F: Fn(&str) -> bool,
    {
        self.lines
            .iter()
            .enumerate()
            .filter(|(_, line)| predicate(code_part(line)))
            .map(|(idx, line)| Violation {
                path: self.path.clone(),
                line: idx + 1,
                text: line.trim().to_string(),
            })
            .collect()
    }

    /// Whether the file path ends with `suffix`
    #[must_use]
    pub fn is(&self, suffix: &str) -> bool {
        self.path.ends_with(suffix)
    }
}

/// Code portion of a line, comments removed
#[must_use]
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Every `.rs` file under `dir` (relative to the workspace root)
#[must_use]
pub fn production_sources(dir: &str) -> Vec<SourceFile> {
    let root = workspace_root();
    let base = root.join(dir);
    if !base.exists() {
        return Vec::new();
    }

    walkdir::WalkDir::new(&base)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .filter_map(|entry| {
            let content = fs::read_to_string(entry.path()).ok()?;
            let relative = entry
                .path()
                .strip_prefix(&root)
                .unwrap_or(entry.path())
                .to_path_buf();
            Some(SourceFile::from_content(relative, &content))
        })
        .collect()
}

/// Report violations and panic if there are any
///
/// # Panics
///
/// Panics when `violations` is non-empty.
pub fn assert_clean(rule: &str, violations: &[Violation], hint: &[&str]) {
    if violations.is_empty() {
        return;
    }

    eprintln!("\n❌ {rule}\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    if !hint.is_empty() {
        eprintln!();
        for line in hint {
            eprintln!("  {line}");
        }
    }

    panic!(
        "\nFound {} violation(s): {rule}.\nFix these before merging!",
        violations.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_test_module_is_cut() {
        let content = "fn a() {}\n#[cfg(test)]\nmod tests { fn b() { x.unwrap(); } }\n";
        let file = SourceFile::from_content(PathBuf::from("a.rs"), content);
        assert_eq!(file.lines, vec!["fn a() {}".to_string()]);
    }

    #[test]
    fn test_comments_are_ignored() {
        let file = SourceFile::from_content(
            PathBuf::from("a.rs"),
            "/// value.unwrap()\nlet x = y; // z.unwrap()\nlet w = v.unwrap();\n",
        );
        let hits = file.matching(|code| code.contains(".unwrap()"));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].line, 3);
    }

    #[test]
    fn test_workspace_root_has_arbiter() {
        assert!(workspace_root().join("arbiter").join("core").exists());
    }
}
