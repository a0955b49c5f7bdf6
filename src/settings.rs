//! Application settings.
//!
//! Two keys have defaults and typed fields: `view_path` (`<cwd>/views`) and
//! `env` (the `CONDUIT_ENV` environment variable, else `"development"`).
//! Everything else is a free-form string key.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Environment variable read for the default `env` setting.
pub const ENV_VAR: &str = "CONDUIT_ENV";

const DEFAULT_ENV: &str = "development";

#[derive(Clone, Debug)]
pub struct Settings {
    view_path: PathBuf,
    env: String,
    extra: HashMap<String, String>,
}

impl Settings {
    /// Defaults for both named keys, no extension keys.
    pub fn new() -> Self {
        let view_path = std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("views");
        let env = env_or_default(std::env::var(ENV_VAR).ok());
        Self { view_path, env, extra: HashMap::new() }
    }

    /// Defaults overridden by `overrides`, applied in order.
    pub fn with<K, V>(overrides: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut settings = Self::new();
        for (key, value) in overrides {
            settings.set(key.as_ref(), value);
        }
        settings
    }

    pub fn view_path(&self) -> &Path {
        &self.view_path
    }

    pub fn env(&self) -> &str {
        &self.env
    }

    /// Reads any key. The named keys come from their typed fields.
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "view_path" => Some(self.view_path.to_string_lossy().into_owned()),
            "env" => Some(self.env.clone()),
            _ => self.extra.get(key).cloned(),
        }
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match key {
            "view_path" => self.view_path = PathBuf::from(value),
            "env" => self.env = value,
            _ => {
                self.extra.insert(key.to_owned(), value);
            }
        }
    }
}

/// An unset or empty variable falls back to `"development"`.
fn env_or_default(value: Option<String>) -> String {
    value
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_ENV.to_owned())
}

impl Default for Settings {
    fn default() -> Self { Self::new() }
}
