//! Core data model.
//!
//! An event is something a user did on a page. It carries the action name,
//! the logical resource (normalized page path) it happened on, and arbitrary
//! caller properties.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// User-level attributes.
pub type Traits = Map<String, Value>;

/// Event-level attributes.
pub type Properties = Map<String, Value>;

/// Channel reported on every event.
pub const CHANNEL: &str = "web";

/// Action name used for page views.
pub const PAGE_VIEW: &str = "Page View";

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A tracked action, frozen at the moment `track` was called.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub action: String,
    /// Normalized path or the configured resource override.
    pub resource: String,
    /// Raw page path, fragment included when requested.
    pub path: String,
    pub properties: Properties,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn is_page_view(&self) -> bool {
        self.action == PAGE_VIEW
    }

    /// Flatten into the outbound property map. Caller properties win over
    /// the base fields on key collisions.
    pub fn to_properties(&self, with_timestamp: bool) -> Properties {
        let mut out = Properties::new();
        out.insert("channel".to_string(), Value::from(CHANNEL));
        out.insert("action".to_string(), Value::from(self.action.clone()));
        out.insert("resource".to_string(), Value::from(self.resource.clone()));
        out.insert("path".to_string(), Value::from(self.path.clone()));
        if with_timestamp {
            out.insert(
                "timestamp".to_string(),
                Value::from(self.timestamp.to_rfc3339()),
            );
        }
        out.extend(self.properties.clone());
        out
    }
}

// ---------------------------------------------------------------------------
// Location
// ---------------------------------------------------------------------------

/// Where the host page currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    /// `"https:"` or `"http:"`.
    pub protocol: String,
    pub hostname: String,
    pub pathname: String,
    /// Fragment including the leading `#`, or empty.
    pub hash: String,
}

impl Location {
    /// Parse an absolute page URL.
    pub fn parse(url: &str) -> crate::error::Result<Self> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| crate::error::Error::Config(format!("invalid page url {url}: {e}")))?;
        Ok(Self {
            protocol: format!("{}:", parsed.scheme()),
            hostname: parsed.host_str().unwrap_or_default().to_string(),
            pathname: parsed.path().to_string(),
            hash: parsed
                .fragment()
                .map(|f| format!("#{f}"))
                .unwrap_or_default(),
        })
    }

    pub fn is_secure(&self) -> bool {
        self.protocol == "https:"
    }
}

impl Default for Location {
    fn default() -> Self {
        Self {
            protocol: "http:".to_string(),
            hostname: "localhost".to_string(),
            pathname: "/".to_string(),
            hash: String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Resource
// ---------------------------------------------------------------------------

/// How an event's resource is derived from the page path.
#[derive(Clone, Default)]
pub enum Resource {
    /// Normalized page path.
    #[default]
    Path,
    /// A fixed resource regardless of path.
    Fixed(String),
    /// Computed from the raw path.
    Custom(Arc<dyn Fn(&str) -> String + Send + Sync>),
}

impl Resource {
    pub fn custom(f: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        Resource::Custom(Arc::new(f))
    }

    pub fn resolve(&self, path: &str) -> String {
        match self {
            Resource::Path => normalize_path(path),
            Resource::Fixed(value) => value.clone(),
            Resource::Custom(f) => f(path),
        }
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Path => write!(f, "Path"),
            Resource::Fixed(value) => f.debug_tuple("Fixed").field(value).finish(),
            Resource::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Replace identifier-like path segments with `:id`.
///
/// A segment is identifier-like when it is all digits (`/123`) or digits
/// followed by a dash and a slug (`/123-apple-computer`). Segments end at
/// `/`, `#`, or the end of the string.
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            let (head, tail) = match segment.find('#') {
                Some(i) => segment.split_at(i),
                None => (segment, ""),
            };
            if is_identifier_segment(head) {
                format!(":id{tail}")
            } else {
                segment.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn is_identifier_segment(segment: &str) -> bool {
    let digits = segment.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return false;
    }
    let rest = &segment[digits..];
    rest.is_empty() || (rest.len() > 1 && rest.starts_with('-'))
}
