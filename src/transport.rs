//! Delivery of tracking requests.
//!
//! Requests are `GET /track` with every field in the query string; traits and
//! properties travel as JSON. Three transports share one trait:
//!
//! - [`HttpTransport`]: full request, response body parsed as JSON.
//! - [`PixelTransport`]: beacon fallback, response ignored.
//! - [`RecordingTransport`]: no I/O at all, used in test mode.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::Url;
use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{Properties, Traits};

/// What a delivery callback receives alongside the success flag.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// The request URL, for transports that never see a response body.
    Url(String),
    /// Parsed response body (`{}` when it was not JSON).
    Body(Value),
    /// The identification rode along with an event already in the queue.
    Coalesced,
    /// Nothing was sent.
    Empty,
}

/// Outcome of one delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub success: bool,
    pub reply: Reply,
}

impl Delivery {
    pub fn ok(reply: Reply) -> Self {
        Self {
            success: true,
            reply,
        }
    }

    pub fn failed(reply: Reply) -> Self {
        Self {
            success: false,
            reply,
        }
    }
}

/// Everything that goes on the wire for one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload {
    pub api_key: String,
    pub device: Option<String>,
    pub id: Option<String>,
    pub traits: Option<Traits>,
    pub properties: Option<Properties>,
}

/// Collector location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub secure: bool,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn base_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

/// Build the tracking URL. Empty fields are left out of the query. Values
/// are percent-encoded component-wise, so a space travels as `%20`.
pub fn track_url(endpoint: &Endpoint, payload: &Payload) -> Result<String> {
    let base = endpoint.base_url();
    let mut url = Url::parse(&format!("{base}/track"))
        .map_err(|e| Error::Config(format!("invalid collector address {base}: {e}")))?;

    let mut pairs: Vec<(&str, String)> = Vec::new();
    if !payload.api_key.is_empty() {
        pairs.push(("apiKey", payload.api_key.clone()));
    }
    if let Some(device) = payload.device.as_deref().filter(|d| !d.is_empty()) {
        pairs.push(("t", device.to_string()));
    }
    if let Some(id) = payload.id.as_deref().filter(|id| !id.is_empty()) {
        pairs.push(("id", id.to_string()));
    }
    if let Some(traits) = payload.traits.as_ref().filter(|t| !t.is_empty()) {
        pairs.push(("traits", serde_json::to_string(traits)?));
    }
    if let Some(properties) = payload.properties.as_ref().filter(|p| !p.is_empty()) {
        pairs.push(("properties", serde_json::to_string(properties)?));
    }

    let query = pairs
        .iter()
        .map(|(key, value)| format!("{key}={}", urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&");
    url.set_query((!query.is_empty()).then_some(query.as_str()));
    Ok(url.into())
}

/// Parse a tracking URL back into its payload. The inverse of [`track_url`].
pub fn parse_track_url(url: &str) -> Result<Payload> {
    let url = Url::parse(url).map_err(|e| Error::Other(format!("invalid tracking url: {e}")))?;
    let mut payload = Payload::default();
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "apiKey" => payload.api_key = value.into_owned(),
            "t" => payload.device = Some(value.into_owned()),
            "id" => payload.id = Some(value.into_owned()),
            "traits" => payload.traits = Some(serde_json::from_str(&value)?),
            "properties" => payload.properties = Some(serde_json::from_str(&value)?),
            _ => {}
        }
    }
    Ok(payload)
}

/// Parse a response body as JSON, falling back to an empty object.
pub fn parse_body(body: &str) -> Value {
    serde_json::from_str(body).unwrap_or_else(|_| Value::Object(Map::new()))
}

/// Delivers one tracking URL.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, url: &str) -> Delivery;
}

/// Cross-origin GET with the response parsed as JSON.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn deliver(&self, url: &str) -> Delivery {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!(url, error = %e, "tracking request failed");
                return Delivery::failed(Reply::Body(serde_json::json!({ "error": e.to_string() })));
            }
        };
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let parsed = parse_body(&body);
        if status.is_success() {
            Delivery::ok(Reply::Body(parsed))
        } else {
            debug!(url, status = status.as_u16(), "collector rejected request");
            Delivery::failed(Reply::Body(parsed))
        }
    }
}

/// Beacon-style fallback: fire the GET and ignore whatever comes back.
#[derive(Debug, Clone, Default)]
pub struct PixelTransport {
    client: reqwest::Client,
}

impl PixelTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Transport for PixelTransport {
    async fn deliver(&self, url: &str) -> Delivery {
        match self.client.get(url).send().await {
            Ok(_) => Delivery::ok(Reply::Url(url.to_string())),
            Err(e) => {
                debug!(url, error = %e, "pixel request failed");
                Delivery::failed(Reply::Url(url.to_string()))
            }
        }
    }
}

/// Records URLs instead of sending them.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    requests: Arc<Mutex<Vec<String>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// URLs delivered so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    /// Delivered requests decoded back into payloads.
    pub fn payloads(&self) -> Vec<Payload> {
        self.requests()
            .iter()
            .filter_map(|url| parse_track_url(url).ok())
            .collect()
    }
}

#[async_trait::async_trait]
impl Transport for RecordingTransport {
    async fn deliver(&self, url: &str) -> Delivery {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(url.to_string());
        }
        Delivery::ok(Reply::Url(url.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn endpoint() -> Endpoint {
        Endpoint {
            secure: false,
            host: "localhost".to_string(),
            port: 8000,
        }
    }

    #[test]
    fn url_includes_only_present_fields() {
        let payload = Payload {
            api_key: "0000".to_string(),
            id: Some("foo".to_string()),
            traits: json!({"name": "Susy Q"}).as_object().cloned(),
            ..Payload::default()
        };
        let url = track_url(&endpoint(), &payload).unwrap();
        assert!(url.starts_with("http://localhost:8000/track?apiKey=0000&id=foo&traits="));
        assert!(!url.contains("properties="));
        assert!(!url.contains("&t="));
    }

    #[test]
    fn json_values_are_percent_encoded() {
        let payload = Payload {
            api_key: "0000".to_string(),
            id: Some("foo".to_string()),
            traits: json!({"name": "Susy Q"}).as_object().cloned(),
            ..Payload::default()
        };
        assert_eq!(
            track_url(&endpoint(), &payload).unwrap(),
            "http://localhost:8000/track?apiKey=0000&id=foo&traits=%7B%22name%22%3A%22Susy%20Q%22%7D"
        );
    }

    #[test]
    fn plus_signs_survive_the_round_trip() {
        let payload = Payload {
            api_key: "0000".to_string(),
            id: Some("a+b c".to_string()),
            ..Payload::default()
        };
        let url = track_url(&endpoint(), &payload).unwrap();
        assert!(url.ends_with("id=a%2Bb%20c"));
        assert_eq!(parse_track_url(&url).unwrap(), payload);
    }

    #[test]
    fn empty_maps_are_left_out() {
        let payload = Payload {
            api_key: "0000".to_string(),
            device: Some("abc".to_string()),
            traits: Some(Traits::new()),
            properties: Some(Properties::new()),
            ..Payload::default()
        };
        let url = track_url(&endpoint(), &payload).unwrap();
        assert_eq!(url, "http://localhost:8000/track?apiKey=0000&t=abc");
    }

    #[test]
    fn secure_endpoint_uses_https() {
        let endpoint = Endpoint {
            secure: true,
            host: "landmark.io".to_string(),
            port: 8443,
        };
        let url = track_url(&endpoint, &Payload::default()).unwrap();
        assert!(url.starts_with("https://landmark.io:8443/track"));
    }

    #[test]
    fn parse_recovers_payload() {
        let payload = Payload {
            api_key: "0000".to_string(),
            device: Some("abc".to_string()),
            id: Some("foo bar".to_string()),
            traits: json!({"name": "Susy Q"}).as_object().cloned(),
            properties: json!({"total": 200, "action": "/checkout.html"})
                .as_object()
                .cloned(),
        };
        let url = track_url(&endpoint(), &payload).unwrap();
        assert_eq!(parse_track_url(&url).unwrap(), payload);
    }

    #[test]
    fn unparseable_body_becomes_empty_object() {
        assert_eq!(parse_body("<html>"), json!({}));
        assert_eq!(parse_body(r#"{"ok":true}"#), json!({"ok": true}));
    }

    #[tokio::test]
    async fn recording_transport_keeps_order() {
        let transport = RecordingTransport::new();
        let first = transport.deliver("http://localhost/track?apiKey=1").await;
        transport.deliver("http://localhost/track?apiKey=2").await;
        assert!(first.success);
        assert_eq!(first.reply, Reply::Url("http://localhost/track?apiKey=1".to_string()));
        assert_eq!(transport.requests().len(), 2);
        assert_eq!(transport.payloads()[1].api_key, "2");
    }
}
