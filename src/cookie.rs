//! Cookie-backed key/value storage for identifiers.
//!
//! Values are JSON-encoded on the way in and decoded on the way out. Failures
//! are swallowed and reported as `false`/`None`; storage problems must never
//! stop tracking. The actual cookie storage is pluggable through [`CookieJar`]
//! so the same store works in memory, on disk, or with cookies disabled.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::CookieOptions;
use crate::error::{Error, Result};

/// A stored cookie with its attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub value: String,
    pub expires: DateTime<Utc>,
    pub path: String,
    pub domain: String,
}

impl Cookie {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires <= now
    }
}

/// Where cookies actually live.
pub trait CookieJar: Send + Sync {
    /// Raw value of a live cookie.
    fn get(&self, name: &str) -> Option<String>;
    fn set(&self, name: &str, cookie: Cookie) -> Result<()>;
    fn remove(&self, name: &str) -> Result<()>;
    /// Whether this jar accepts cookies at all.
    fn enabled(&self) -> bool {
        true
    }
}

/// Cookies held in process memory.
#[derive(Debug, Default)]
pub struct MemoryJar {
    cookies: Mutex<HashMap<String, Cookie>>,
}

impl MemoryJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full cookie record, including attributes.
    pub fn cookie(&self, name: &str) -> Option<Cookie> {
        self.cookies.lock().ok()?.get(name).cloned()
    }
}

impl CookieJar for MemoryJar {
    fn get(&self, name: &str) -> Option<String> {
        let cookies = self.cookies.lock().ok()?;
        cookies
            .get(name)
            .filter(|c| !c.is_expired(Utc::now()))
            .map(|c| c.value.clone())
    }

    fn set(&self, name: &str, cookie: Cookie) -> Result<()> {
        let mut cookies = self
            .cookies
            .lock()
            .map_err(|_| Error::Other("cookie jar poisoned".to_string()))?;
        cookies.insert(name.to_string(), cookie);
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        let mut cookies = self
            .cookies
            .lock()
            .map_err(|_| Error::Other("cookie jar poisoned".to_string()))?;
        cookies.remove(name);
        Ok(())
    }
}

/// Cookies persisted to a JSON file, so identities survive process restarts.
#[derive(Debug)]
pub struct FileJar {
    path: PathBuf,
    cookies: Mutex<HashMap<String, Cookie>>,
}

impl FileJar {
    /// Open a jar file, starting empty if it does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let cookies = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            cookies: Mutex::new(cookies),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, cookies: &HashMap<String, Cookie>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(cookies)?)?;
        Ok(())
    }
}

impl CookieJar for FileJar {
    fn get(&self, name: &str) -> Option<String> {
        let cookies = self.cookies.lock().ok()?;
        cookies
            .get(name)
            .filter(|c| !c.is_expired(Utc::now()))
            .map(|c| c.value.clone())
    }

    fn set(&self, name: &str, cookie: Cookie) -> Result<()> {
        let mut cookies = self
            .cookies
            .lock()
            .map_err(|_| Error::Other("cookie jar poisoned".to_string()))?;
        cookies.insert(name.to_string(), cookie);
        self.persist(&cookies)
    }

    fn remove(&self, name: &str) -> Result<()> {
        let mut cookies = self
            .cookies
            .lock()
            .map_err(|_| Error::Other("cookie jar poisoned".to_string()))?;
        cookies.remove(name);
        self.persist(&cookies)
    }
}

/// A jar that refuses everything, like a browser with cookies turned off.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledJar;

impl CookieJar for DisabledJar {
    fn get(&self, _name: &str) -> Option<String> {
        None
    }

    fn set(&self, _name: &str, _cookie: Cookie) -> Result<()> {
        Err(Error::Other("cookies are disabled".to_string()))
    }

    fn remove(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    fn enabled(&self) -> bool {
        false
    }
}

/// JSON-valued view over a [`CookieJar`] with fixed cookie attributes.
pub struct CookieStore {
    jar: std::sync::Arc<dyn CookieJar>,
    maxage: Duration,
    path: String,
    domain: String,
}

impl CookieStore {
    /// Build a store for a page on `host`. The cookie domain defaults to the
    /// host's top domain so identifiers are shared across subdomains.
    pub fn new(jar: std::sync::Arc<dyn CookieJar>, options: &CookieOptions, host: &str) -> Self {
        let domain = options.domain.clone().unwrap_or_else(|| match top_domain(host) {
            Some(top) => format!(".{top}"),
            None => String::new(),
        });
        Self {
            jar,
            maxage: Duration::milliseconds(i64::try_from(options.maxage).unwrap_or(i64::MAX)),
            path: options.path.clone(),
            domain,
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn enabled(&self) -> bool {
        self.jar.enabled()
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.jar.get(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(key, error = %e, "cookie value is not valid JSON");
                None
            }
        }
    }

    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        let encoded = match serde_json::to_string(value) {
            Ok(encoded) => encoded,
            Err(e) => {
                debug!(key, error = %e, "cannot encode cookie value");
                return false;
            }
        };
        let expires = Utc::now()
            .checked_add_signed(self.maxage)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let cookie = Cookie {
            value: encoded,
            expires,
            path: self.path.clone(),
            domain: self.domain.clone(),
        };
        match self.jar.set(key, cookie) {
            Ok(()) => true,
            Err(e) => {
                debug!(key, error = %e, "cannot store cookie");
                false
            }
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        match self.jar.remove(key) {
            Ok(()) => true,
            Err(e) => {
                debug!(key, error = %e, "cannot remove cookie");
                false
            }
        }
    }
}

/// Second-level labels that act like a public suffix (`co.uk`, `com.au`).
const REGISTRY_LABELS: &[&str] = &["co", "com", "net", "org", "ac", "gov", "edu", "ne", "or"];

/// The registrable domain of `host`: the last two labels, or three when the
/// host sits under a country registry such as `co.uk`.
///
/// Returns `None` for `localhost`, IP addresses, and single-label hosts.
pub fn top_domain(host: &str) -> Option<String> {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    if host.is_empty() || host == "localhost" || host.parse::<IpAddr>().is_ok() {
        return None;
    }
    let labels: Vec<&str> = host.split('.').collect();
    match labels.as_slice() {
        [] | [_] => None,
        [.., sld, tld] if labels.len() >= 3 && tld.len() == 2 && REGISTRY_LABELS.contains(sld) => {
            Some(labels[labels.len() - 3..].join("."))
        }
        [.., sld, tld] => Some(format!("{sld}.{tld}")),
    }
}
