//! Integration Test: Panic Prohibition
//!
//! **Policy**: Production code propagates errors. `.unwrap()` and `.expect(..)`
//! belong in tests only.

use architectural_enforcement::{assert_clean, production_sources};

fn is_panicking_shortcut(code: &str) -> bool {
    code.contains(".unwrap()") || code.contains(".expect(")
}

#[test]
fn test_no_unwrap_in_production_code() {
    let violations: Vec<_> = ["arbiter/core/src", "arbiter/daemon/src"]
        .iter()
        .flat_map(|dir| production_sources(dir))
        .flat_map(|file| file.matching(is_panicking_shortcut))
        .collect();

    assert_clean(
        "unwrap()/expect() found in production code",
        &violations,
        &["Return a Result, or handle the None/Err case explicitly."],
    );
}

#[test]
fn test_detection_ignores_unwrap_or() {
    assert!(is_panicking_shortcut("let v = x.unwrap();"));
    assert!(is_panicking_shortcut("let v = x.expect(\"boom\");"));
    assert!(!is_panicking_shortcut("let v = x.unwrap_or_default();"));
    assert!(!is_panicking_shortcut("let v = x.unwrap_or(0);"));
}
