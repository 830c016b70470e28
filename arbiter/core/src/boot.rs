//! Boot Tracking
//!
//! While any app is starting up the glasses show a boot screen naming the
//! starting apps, and only the dashboard may draw. Each starting app gets its
//! own grace timer; restarting an app replaces its timer.

use crate::config::ArbiterConfig;
use crate::messages::{AppId, DisplayRequest, Layout, ViewType};
use crate::timers::TimerId;

/// Apps currently in their boot grace period, in start order
#[derive(Debug, Clone, Default)]
pub struct BootingSet {
    apps: Vec<(AppId, TimerId)>,
}

impl BootingSet {
    /// Create an empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `app` as booting under `timer`
    ///
    /// Returns the timer the app was previously booting under, which the
    /// caller must cancel. A restarted app keeps its place in start order.
    pub fn insert(&mut self, app: AppId, timer: TimerId) -> Option<TimerId> {
        if let Some(entry) = self.apps.iter_mut().find(|(booting, _)| *booting == app) {
            return Some(std::mem::replace(&mut entry.1, timer));
        }
        self.apps.push((app, timer));
        None
    }

    /// Remove `app`, returning its boot timer if it was booting
    pub fn remove(&mut self, app: &AppId) -> Option<TimerId> {
        let index = self.apps.iter().position(|(booting, _)| booting == app)?;
        Some(self.apps.remove(index).1)
    }

    /// Whether `app` is booting
    #[must_use]
    pub fn contains(&self, app: &AppId) -> bool {
        self.apps.iter().any(|(booting, _)| booting == app)
    }

    /// Timer `app` is booting under
    #[must_use]
    pub fn timer_for(&self, app: &AppId) -> Option<TimerId> {
        self.apps
            .iter()
            .find(|(booting, _)| booting == app)
            .map(|(_, timer)| *timer)
    }

    /// Whether no app is booting
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    /// Number of booting apps
    #[must_use]
    pub fn len(&self) -> usize {
        self.apps.len()
    }

    /// Booting apps in start order
    pub fn apps(&self) -> impl Iterator<Item = &AppId> {
        self.apps.iter().map(|(app, _)| app)
    }

    /// Empty the set, returning every outstanding boot timer
    pub fn drain_timers(&mut self) -> Vec<TimerId> {
        self.apps.drain(..).map(|(_, timer)| timer).collect()
    }
}

/// The boot screen listing every booting app
///
/// Rendered as a persistent reference card on the main view, attributed to
/// the dashboard app.
#[must_use]
pub fn boot_screen(booting: &BootingSet, config: &ArbiterConfig) -> DisplayRequest {
    let title = if booting.len() == 1 {
        "Starting App"
    } else {
        "Starting Apps"
    };
    let names: Vec<&str> = booting.apps().map(|app| config.display_name(app)).collect();

    DisplayRequest::reference_card(config.dashboard_app.clone(), title, names.join(", "))
}

/// An empty text wall that blanks the main view
#[must_use]
pub fn clear_frame(app: &AppId) -> DisplayRequest {
    DisplayRequest::new(
        app.clone(),
        ViewType::Main,
        Layout::TextWall {
            text: String::new(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timers::TimerIds;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_restart_replaces_timer_and_keeps_order() {
        let mut ids = TimerIds::default();
        let mut booting = BootingSet::new();
        let first = ids.allocate();
        let second = ids.allocate();
        let restart = ids.allocate();

        assert_eq!(booting.insert(AppId::from("a"), first), None);
        assert_eq!(booting.insert(AppId::from("b"), second), None);
        assert_eq!(booting.insert(AppId::from("a"), restart), Some(first));

        let order: Vec<_> = booting.apps().map(AppId::as_str).collect();
        assert_eq!(order, vec!["a", "b"]);
        assert_eq!(booting.timer_for(&AppId::from("a")), Some(restart));
    }

    #[test]
    fn test_remove_and_drain() {
        let mut ids = TimerIds::default();
        let mut booting = BootingSet::new();
        let a = ids.allocate();
        let b = ids.allocate();
        booting.insert(AppId::from("a"), a);
        booting.insert(AppId::from("b"), b);

        assert_eq!(booting.remove(&AppId::from("a")), Some(a));
        assert_eq!(booting.remove(&AppId::from("a")), None);
        assert!(booting.contains(&AppId::from("b")));

        assert_eq!(booting.drain_timers(), vec![b]);
        assert!(booting.is_empty());
    }

    #[test]
    fn test_boot_screen_lists_names() {
        let config = ArbiterConfig::default().with_app_name("com.example.weather", "Weather");
        let mut ids = TimerIds::default();
        let mut booting = BootingSet::new();
        booting.insert(AppId::from("com.example.weather"), ids.allocate());

        let single = boot_screen(&booting, &config);
        assert_eq!(single.requesting_app, config.dashboard_app);
        assert!(single.is_persistent());
        assert_eq!(
            single.layout,
            Layout::ReferenceCard {
                title: "Starting App".into(),
                text: "Weather".into()
            }
        );

        booting.insert(AppId::from("com.unnamed"), ids.allocate());
        let multiple = boot_screen(&booting, &config);
        assert_eq!(
            multiple.layout,
            Layout::ReferenceCard {
                title: "Starting Apps".into(),
                text: "Weather, com.unnamed".into()
            }
        );
    }

    #[test]
    fn test_clear_frame_is_empty_text_wall() {
        let clear = clear_frame(&AppId::from("captions"));
        assert_eq!(clear.view, ViewType::Main);
        assert_eq!(
            clear.layout,
            Layout::TextWall {
                text: String::new()
            }
        );
    }
}
