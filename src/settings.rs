//! Runtime settings.
//!
//! Loaded from built-in defaults, then an optional `rivet.toml` in the
//! working directory, then `RIVET__*` environment variables
//! (e.g. `RIVET__PORT=8080`).

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::Result;

/// Server and app settings.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    /// Largest accepted request body, in bytes.
    pub max_content_length: usize,
    /// Spaces used to indent JSON output; `None` for compact output.
    pub json_indent: Option<usize>,
    /// Serve a listing of every routed resource at `/`.
    pub autolist: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 5000,
            max_content_length: 10 * 1024 * 1024,
            json_indent: None,
            autolist: false,
        }
    }
}

impl Settings {
    /// Reads `rivet.toml` (if present) and the environment.
    pub fn load() -> Result<Self> {
        Self::load_from("rivet")
    }

    /// Like [`load`](Self::load) with another base name for the settings
    /// file; any format the `config` crate knows is accepted.
    pub fn load_from(file: &str) -> Result<Self> {
        let defaults = Self::default();
        let settings = Config::builder()
            .set_default("host", defaults.host)?
            .set_default("port", i64::from(defaults.port))?
            .set_default("max_content_length", defaults.max_content_length as i64)?
            .set_default("autolist", defaults.autolist)?
            .add_source(File::with_name(file).required(false))
            .add_source(Environment::with_prefix("RIVET").separator("__").try_parsing(true))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    /// `host:port`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_uses_defaults() {
        let settings = Settings::load_from("no-such-rivet-settings").unwrap();
        assert_eq!(settings.max_content_length, 10 * 1024 * 1024);
        assert_eq!(settings.json_indent, None);
        assert_eq!(settings.addr(), format!("{}:{}", settings.host, settings.port));
    }

    #[test]
    fn environment_overrides_defaults() {
        // SAFETY: the other settings tests do not depend on the port.
        unsafe { std::env::set_var("RIVET__PORT", "8088") };
        let settings = Settings::load_from("no-such-rivet-settings");
        unsafe { std::env::remove_var("RIVET__PORT") };
        assert_eq!(settings.unwrap().port, 8088);
    }
}
