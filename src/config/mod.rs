//! Typed client configuration.
//!
//! [`Options`] is what `initialize` applies. It can be built in code, read
//! from a TOML file, or loaded from environment variables. The API key is
//! wrapped in [`SecretString`] so it never shows up in `Debug` output or logs.

pub use secrecy::{ExposeSecret, SecretString};

use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Default collector host.
pub const DEFAULT_HOST: &str = "landmark.io";
/// Default collector port.
pub const DEFAULT_PORT: u16 = 80;
/// One year, in milliseconds.
pub const DEFAULT_COOKIE_MAXAGE_MS: u64 = 31_536_000_000;

/// How the client talks to the outside world.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Real network I/O and real randomness.
    #[default]
    Live,
    /// Requests are recorded instead of sent; device ids are deterministic.
    Test,
}

impl std::str::FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "live" => Ok(Mode::Live),
            "test" => Ok(Mode::Test),
            other => Err(Error::Config(format!("unknown mode: {other}"))),
        }
    }
}

/// Which transport delivers tracking requests in live mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Full request with the response body parsed as JSON.
    #[default]
    Http,
    /// Beacon-style request; the response is ignored.
    Pixel,
}

/// Cookie attributes applied to every value the client stores.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CookieOptions {
    /// Lifetime in milliseconds.
    pub maxage: u64,
    pub path: String,
    /// `None` means "infer from the page host".
    pub domain: Option<String>,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            maxage: DEFAULT_COOKIE_MAXAGE_MS,
            path: "/".to_string(),
            domain: None,
        }
    }
}

/// Names the cookie an identity is persisted under.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CookieKey {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UserOptions {
    pub cookie: CookieKey,
}

impl Default for UserOptions {
    fn default() -> Self {
        Self {
            cookie: CookieKey {
                key: "ldmk_user_id".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DeviceOptions {
    pub cookie: CookieKey,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            cookie: CookieKey {
                key: "ldmk_device_id".to_string(),
            },
        }
    }
}

/// Everything `initialize` can configure.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Options {
    pub api_key: Option<SecretString>,
    pub host: String,
    pub port: u16,
    pub cookie: CookieOptions,
    pub user: UserOptions,
    pub device: DeviceOptions,
    pub mode: Mode,
    pub transport: TransportKind,
    /// Fire a page view on initialize unless one was already recorded.
    pub pageview: bool,
    /// Track a page view (with fragment) whenever the host reports a hash change.
    pub track_hash_change: bool,
    /// Include the event timestamp in outbound properties.
    pub timestamps: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            api_key: None,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            cookie: CookieOptions::default(),
            user: UserOptions::default(),
            device: DeviceOptions::default(),
            mode: Mode::default(),
            transport: TransportKind::default(),
            pageview: false,
            track_hash_change: false,
            timestamps: false,
        }
    }
}

impl Options {
    /// Options carrying only an API key; everything else is default.
    pub fn with_api_key(key: impl Into<String>) -> Self {
        Self {
            api_key: Some(SecretString::from(key.into())),
            ..Self::default()
        }
    }

    /// Options for deterministic tests: no network, no randomness.
    pub fn test(key: impl Into<String>) -> Self {
        Self {
            mode: Mode::Test,
            ..Self::with_api_key(key)
        }
    }

    /// The API key, if one is set and non-empty.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_ref()
            .map(|k| k.expose_secret())
            .filter(|k| !k.is_empty())
    }

    /// Parse options from a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Read options from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read options file {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Load options from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this. Missing
    /// variables fall back to defaults; malformed ones fail fast.
    pub fn from_env() -> Result<Self> {
        let mut options = Self {
            api_key: std::env::var("LANDMARK_API_KEY").ok().map(SecretString::from),
            ..Self::default()
        };
        if let Ok(host) = std::env::var("LANDMARK_HOST") {
            options.host = host;
        }
        if let Ok(port) = std::env::var("LANDMARK_PORT") {
            options.port = port
                .parse()
                .map_err(|_| Error::Config(format!("LANDMARK_PORT is not a port: {port}")))?;
        }
        if let Ok(mode) = std::env::var("LANDMARK_MODE") {
            options.mode = mode.parse()?;
        }
        Ok(options)
    }
}

/// What `initialize` accepts: a bare API key or a full set of options.
#[derive(Debug, Clone)]
pub enum Init {
    ApiKey(SecretString),
    Options(Options),
}

impl Init {
    pub fn into_options(self) -> Options {
        match self {
            Init::ApiKey(key) => Options {
                api_key: Some(key),
                ..Options::default()
            },
            Init::Options(options) => options,
        }
    }
}

impl From<&str> for Init {
    fn from(key: &str) -> Self {
        Init::ApiKey(SecretString::from(key))
    }
}

impl From<String> for Init {
    fn from(key: String) -> Self {
        Init::ApiKey(SecretString::from(key))
    }
}

impl From<Options> for Init {
    fn from(options: Options) -> Self {
        Init::Options(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_init_fills_defaults() {
        let options = Init::from("0000").into_options();
        assert_eq!(options.api_key(), Some("0000"));
        assert_eq!(options.host, DEFAULT_HOST);
        assert_eq!(options.cookie.maxage, DEFAULT_COOKIE_MAXAGE_MS);
        assert_eq!(options.user.cookie.key, "ldmk_user_id");
        assert_eq!(options.device.cookie.key, "ldmk_device_id");
    }

    #[test]
    fn empty_api_key_counts_as_missing() {
        assert_eq!(Options::with_api_key("").api_key(), None);
    }

    #[test]
    fn toml_overrides_nested_cookie_keys() {
        let options = Options::from_toml_str(
            r#"
            api_key = "abc"
            mode = "test"
            pageview = true

            [cookie]
            path = "/app"

            [user.cookie]
            key = "uid"
            "#,
        )
        .unwrap();

        assert_eq!(options.api_key(), Some("abc"));
        assert_eq!(options.mode, Mode::Test);
        assert!(options.pageview);
        assert_eq!(options.cookie.path, "/app");
        assert_eq!(options.cookie.maxage, DEFAULT_COOKIE_MAXAGE_MS);
        assert_eq!(options.user.cookie.key, "uid");
        assert_eq!(options.device.cookie.key, "ldmk_device_id");
    }

    #[test]
    fn debug_output_hides_api_key() {
        let options = Options::with_api_key("super-secret");
        assert!(!format!("{options:?}").contains("super-secret"));
    }
}
