//! Integration Test: Synchronous Arbitration Core
//!
//! **Policy**: The arbitration modules decide and return. They never spawn
//! tasks, never block on channels, and never read the wall clock; time only
//! arrives as the `now` argument.

use architectural_enforcement::{assert_clean, production_sources, Violation};

const PURE_MODULES: &[&str] = &[
    "arbiter/core/src/engine.rs",
    "arbiter/core/src/boot.rs",
    "arbiter/core/src/throttle.rs",
    "arbiter/core/src/display.rs",
];

fn is_impure(code: &str) -> bool {
    code.contains("tokio::spawn")
        || code.contains("std::thread")
        || code.contains(".await")
        || code.contains("block_on(")
        || code.contains("blocking_recv(")
        || code.contains("blocking_send(")
        || code.contains("Instant::now()")
}

fn pure_module_violations() -> Vec<Violation> {
    production_sources("arbiter/core/src")
        .into_iter()
        .filter(|file| PURE_MODULES.iter().any(|module| file.is(module)))
        .flat_map(|file| file.matching(is_impure))
        .collect()
}

#[test]
fn test_arbitration_modules_are_synchronous() {
    assert_clean(
        "Runtime calls found in synchronous arbitration modules",
        &pure_module_violations(),
        &["Return TimerEffects and take `now` as an argument instead."],
    );
}

#[test]
fn test_pure_modules_exist() {
    let found = production_sources("arbiter/core/src")
        .into_iter()
        .filter(|file| PURE_MODULES.iter().any(|module| file.is(module)))
        .count();
    assert_eq!(found, PURE_MODULES.len());
}

#[test]
fn test_no_blocking_waits_in_production_code() {
    let violations: Vec<_> = ["arbiter/core/src", "arbiter/daemon/src"]
        .iter()
        .flat_map(|dir| production_sources(dir))
        .flat_map(|file| {
            file.matching(|code| {
                code.contains("block_on(")
                    || code.contains("blocking_recv(")
                    || code.contains("blocking_send(")
                    || code.contains("blocking_lock(")
            })
        })
        .collect();
    assert_clean("Blocking waits found in production code", &violations, &[]);
}
