//! Light/dark theme with explicit change notification.

use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

/// Icon asset paths that follow the theme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThemeIcons {
    pub toggle: &'static str,
    pub send: &'static str,
    pub menu: &'static str,
}

impl Theme {
    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }

    /// Body class for the page.
    pub fn css_class(self) -> &'static str {
        match self {
            Theme::Light => "",
            Theme::Dark => "dark-mode",
        }
    }

    pub fn icons(self) -> ThemeIcons {
        match self {
            Theme::Dark => ThemeIcons {
                toggle: "/static/Moon.svg",
                send: "/static/senddark.svg",
                menu: "/static/Menudark.svg",
            },
            Theme::Light => ThemeIcons {
                toggle: "/static/Sun.svg",
                send: "/static/sendlight.svg",
                menu: "/static/Menulight.svg",
            },
        }
    }
}

impl std::fmt::Display for Theme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Theme::Light => write!(f, "light"),
            Theme::Dark => write!(f, "dark"),
        }
    }
}

type Subscriber = Box<dyn FnMut(Theme) + Send>;

/// Current theme plus the listeners that react to changes.
#[derive(Default)]
pub struct ThemeState {
    current: Theme,
    subscribers: Vec<Subscriber>,
}

impl std::fmt::Debug for ThemeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThemeState")
            .field("current", &self.current)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl ThemeState {
    pub fn new(initial: Theme) -> Self {
        Self {
            current: initial,
            subscribers: Vec::new(),
        }
    }

    pub fn current(&self) -> Theme {
        self.current
    }

    /// Register a listener. It is called once immediately with the current
    /// theme so it can initialise, then on every change.
    pub fn subscribe(&mut self, mut listener: impl FnMut(Theme) + Send + 'static) {
        listener(self.current);
        self.subscribers.push(Box::new(listener));
    }

    /// Switch to `theme`, notifying listeners only if it changed.
    pub fn set(&mut self, theme: Theme) {
        if theme == self.current {
            return;
        }
        self.current = theme;
        debug!(theme = %theme, listeners = self.subscribers.len(), "theme changed");
        for listener in &mut self.subscribers {
            listener(theme);
        }
    }

    pub fn toggle(&mut self) -> Theme {
        self.set(self.current.toggled());
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_default_is_light() {
        assert_eq!(ThemeState::default().current(), Theme::Light);
    }

    #[test]
    fn test_toggle_flips() {
        let mut s = ThemeState::default();
        assert_eq!(s.toggle(), Theme::Dark);
        assert_eq!(s.toggle(), Theme::Light);
    }

    #[test]
    fn test_subscribers_notified_on_change() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut s = ThemeState::default();
        let sink = Arc::clone(&seen);
        s.subscribe(move |t| sink.lock().unwrap().push(t));
        s.toggle();
        s.set(Theme::Dark);
        s.toggle();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Theme::Light, Theme::Dark, Theme::Light]
        );
    }

    #[test]
    fn test_icons_follow_theme() {
        assert_eq!(Theme::Dark.icons().toggle, "/static/Moon.svg");
        assert_eq!(Theme::Dark.icons().send, "/static/senddark.svg");
        assert_eq!(Theme::Dark.icons().menu, "/static/Menudark.svg");
        assert_eq!(Theme::Light.icons().toggle, "/static/Sun.svg");
        assert_eq!(Theme::Light.icons().send, "/static/sendlight.svg");
        assert_eq!(Theme::Light.icons().menu, "/static/Menulight.svg");
    }

    #[test]
    fn test_css_class() {
        assert_eq!(Theme::Dark.css_class(), "dark-mode");
        assert_eq!(Theme::Light.css_class(), "");
    }
}
