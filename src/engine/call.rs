//! Calls a host makes on the client, as plain values.
//!
//! Every public operation is expressed as a [`Call`] so it can be buffered
//! before initialization and replayed in order afterwards.

use std::fmt;

use serde_json::Value;

use crate::config::Init;
use crate::model::{PAGE_VIEW, Properties, Traits};
use crate::transport::Reply;

/// Completion callback: `(success, reply)`.
pub type Callback = Box<dyn FnOnce(bool, Reply) + Send + 'static>;

/// What `identify` should do with the user id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdArg {
    /// Keep whatever id is already known.
    Keep,
    /// Replace the id; `None` forgets it.
    Set(Option<String>),
}

/// An identification request.
pub struct Identify {
    pub(crate) id: IdArg,
    pub(crate) traits: Traits,
    pub(crate) callback: Option<Callback>,
}

impl Identify {
    /// Identify as `id`.
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            id: IdArg::Set(Some(id.into())),
            traits: Traits::new(),
            callback: None,
        }
    }

    /// Add traits to the currently known user, whoever that is.
    pub fn current() -> Self {
        Self {
            id: IdArg::Keep,
            traits: Traits::new(),
            callback: None,
        }
    }

    /// Identify with no id at all.
    pub fn anonymous() -> Self {
        Self {
            id: IdArg::Set(None),
            traits: Traits::new(),
            callback: None,
        }
    }

    pub fn traits(mut self, traits: Traits) -> Self {
        self.traits.extend(traits);
        self
    }

    pub fn with_trait(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.traits.insert(key.into(), value.into());
        self
    }

    pub fn on_complete(mut self, callback: impl FnOnce(bool, Reply) + Send + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    pub fn id(&self) -> &IdArg {
        &self.id
    }
}

impl fmt::Debug for Identify {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identify")
            .field("id", &self.id)
            .field("traits", &self.traits)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// A tracking request.
pub struct Track {
    pub(crate) action: String,
    pub(crate) properties: Properties,
    pub(crate) include_hash: bool,
    pub(crate) callback: Option<Callback>,
}

impl Track {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            properties: Properties::new(),
            include_hash: false,
            callback: None,
        }
    }

    pub fn pageview() -> Self {
        Self::new(PAGE_VIEW)
    }

    pub fn properties(mut self, properties: Properties) -> Self {
        self.properties.extend(properties);
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Append the URL fragment to the tracked path.
    pub fn include_hash(mut self, include: bool) -> Self {
        self.include_hash = include;
        self
    }

    pub fn on_complete(mut self, callback: impl FnOnce(bool, Reply) + Send + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn is_page_view(&self) -> bool {
        self.action == PAGE_VIEW
    }
}

impl fmt::Debug for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Track")
            .field("action", &self.action)
            .field("properties", &self.properties)
            .field("include_hash", &self.include_hash)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// Any operation the host can push at the client.
#[derive(Debug)]
pub enum Call {
    Initialize(Init),
    Identify(Identify),
    Track(Track),
    Logout,
}

impl Call {
    pub fn is_page_view(&self) -> bool {
        matches!(self, Call::Track(track) if track.is_page_view())
    }
}

impl From<Identify> for Call {
    fn from(identify: Identify) -> Self {
        Call::Identify(identify)
    }
}

impl From<Track> for Call {
    fn from(track: Track) -> Self {
        Call::Track(track)
    }
}

impl From<Init> for Call {
    fn from(init: Init) -> Self {
        Call::Initialize(init)
    }
}
