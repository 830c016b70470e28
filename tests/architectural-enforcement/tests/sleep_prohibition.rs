//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code never sleeps to wait for something. Every delay
//! the arbiter needs is a timer owned by the timer facility, and the only place
//! allowed to wait on the clock is `arbiter/core/src/timers.rs`.
//! **Exceptions**: `tokio::time::interval` for periodic housekeeping, test code.

use architectural_enforcement::{assert_clean, production_sources, Violation};

fn is_sleep_call(code: &str) -> bool {
    code.contains("::sleep(")
        || code.contains(".sleep(")
        || code.contains("sleep_until(")
        || code.contains("thread::sleep")
}

fn find_sleep_violations() -> Vec<Violation> {
    let mut violations = Vec::new();

    for file in production_sources("arbiter/core/src") {
        if file.is("arbiter/core/src/timers.rs") {
            continue;
        }
        violations.extend(file.matching(is_sleep_call));
    }

    for file in production_sources("arbiter/daemon/src") {
        violations.extend(file.matching(is_sleep_call));
    }

    violations
}

#[test]
fn test_no_sleep_in_production_code() {
    let violations = find_sleep_violations();
    assert_clean(
        "Sleep calls found in production code",
        &violations,
        &[
            "✅ ACCEPTABLE: timers.rs (sleep_until per scheduled timer)",
            "✅ ACCEPTABLE: tokio::time::interval for periodic tasks",
            "❌ FORBIDDEN: sleeping to wait for a deadline (return a TimerEffect instead)",
        ],
    );
}

#[test]
fn test_timer_facility_still_sleeps() {
    // Guards against the rule above silently passing after a rename
    let timers: Vec<_> = production_sources("arbiter/core/src")
        .into_iter()
        .filter(|file| file.is("arbiter/core/src/timers.rs"))
        .collect();
    assert_eq!(timers.len(), 1);
    assert!(!timers[0].matching(is_sleep_call).is_empty());
}

#[test]
fn test_sleep_detection() {
    assert!(is_sleep_call("    tokio::time::sleep(Duration::from_millis(10)).await;"));
    assert!(is_sleep_call("    std::thread::sleep(d);"));
    assert!(is_sleep_call("    sleep_until(deadline).await;"));
    assert!(!is_sleep_call("    let mut prune = tokio::time::interval(period);"));
}
