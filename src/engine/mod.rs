//! The tracking client.
//!
//! [`Landmark`] is a cheap, cloneable handle. All state lives in a dispatcher
//! task spawned by [`LandmarkBuilder::spawn`]; handles only post commands to
//! it. Tracking calls return immediately and never fail; outcomes arrive
//! through optional callbacks and the diagnostic sink.
//!
//! ```no_run
//! use landmark_rs::engine::{Identify, Landmark, Track};
//! use landmark_rs::config::Options;
//!
//! # async fn demo() -> landmark_rs::error::Result<()> {
//! let client = Landmark::builder().spawn();
//! client.identify(Identify::user("42").with_trait("plan", "pro"));
//! client.initialize(Options::with_api_key("my-key"));
//! client.track(Track::new("Checkout").property("total", 200));
//! client.flush().await?;
//! # Ok(())
//! # }
//! ```

pub mod call;
mod dispatch;
pub mod tick;

pub use call::{Call, Callback, IdArg, Identify, Track};

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::config::{Init, Options};
use crate::cookie::{CookieJar, MemoryJar};
use crate::diagnostic::{DiagnosticSink, TracingSink};
use crate::error::{Error, Result};
use crate::model::{Location, Resource, Traits};
use crate::transport::Transport;

use dispatch::{Command, Dispatcher, Environment};

/// Where the client is in its one-way startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Calls are buffered until `initialize`.
    Uninitialized,
    /// Options applied, buffered calls replaying.
    Initializing,
    Initialized,
}

/// Handle to a running tracking client.
#[derive(Clone)]
pub struct Landmark {
    tx: mpsc::UnboundedSender<Command>,
}

impl Landmark {
    pub fn builder() -> LandmarkBuilder {
        LandmarkBuilder::default()
    }

    fn post(&self, command: Command) {
        if self.tx.send(command).is_err() {
            debug!("landmark dispatcher is gone, dropping call");
        }
    }

    /// Apply configuration and replay calls made so far.
    pub fn initialize(&self, init: impl Into<Init>) {
        self.post(Command::Call(Call::Initialize(init.into())));
    }

    pub fn identify(&self, identify: Identify) {
        self.post(Command::Call(Call::Identify(identify)));
    }

    pub fn track(&self, track: Track) {
        self.post(Command::Call(Call::Track(track)));
    }

    /// Track a page view of the current location.
    pub fn pageview(&self) {
        self.track(Track::pageview());
    }

    /// Forget the current user, including the persisted id.
    pub fn logout(&self) {
        self.post(Command::Call(Call::Logout));
    }

    /// Array-style entry point: run any call.
    pub fn push(&self, call: impl Into<Call>) {
        self.post(Command::Call(call.into()));
    }

    /// Tell the client the page moved.
    pub fn set_location(&self, location: Location) {
        self.post(Command::SetLocation(location));
    }

    /// Tell the client the fragment changed. Tracks a page view when
    /// `track_hash_change` is enabled.
    pub fn hash_changed(&self, location: Location) {
        self.post(Command::HashChanged(location));
    }

    pub fn set_resource(&self, resource: Resource) {
        self.post(Command::SetResource(resource));
    }

    async fn query<T: Send + 'static>(
        &self,
        f: impl FnOnce(&Dispatcher) -> T + Send + 'static,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Query(Box::new(move |dispatcher| {
                let _ = reply.send(f(dispatcher));
            })))
            .map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)
    }

    pub async fn user_id(&self) -> Result<Option<String>> {
        self.query(|d| d.user().id().map(str::to_string)).await
    }

    pub async fn traits(&self) -> Result<Traits> {
        self.query(|d| d.user().traits().clone()).await
    }

    /// Whether a user id or traits are known.
    pub async fn identified(&self) -> Result<bool> {
        self.query(Dispatcher::identified).await
    }

    pub async fn device_id(&self) -> Result<Option<String>> {
        self.query(Dispatcher::device_id).await
    }

    pub async fn state(&self) -> Result<Lifecycle> {
        self.query(Dispatcher::lifecycle).await
    }

    pub async fn options(&self) -> Result<Options> {
        self.query(|d| d.options().clone()).await
    }

    pub async fn location(&self) -> Result<Location> {
        self.query(|d| d.location().clone()).await
    }

    /// Events queued but not yet drained.
    pub async fn pending(&self) -> Result<usize> {
        self.query(Dispatcher::queue_len).await
    }

    /// Wait until every call made so far has been dispatched and every
    /// delivery has completed.
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(Command::Flush(tx)).map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)
    }

    /// Finish outstanding work, then stop the dispatcher. Later calls on any
    /// handle are dropped.
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Command::Shutdown(tx))
            .map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)
    }
}

/// Wires collaborators into a client.
#[derive(Default)]
pub struct LandmarkBuilder {
    jar: Option<Arc<dyn CookieJar>>,
    transport: Option<Arc<dyn Transport>>,
    diagnostics: Option<Arc<dyn DiagnosticSink>>,
    location: Location,
    resource: Resource,
}

impl LandmarkBuilder {
    /// Cookie storage. Defaults to an in-memory jar.
    pub fn jar(mut self, jar: Arc<dyn CookieJar>) -> Self {
        self.jar = Some(jar);
        self
    }

    /// Force a transport, overriding the one `initialize` would pick.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Diagnostic sink. Defaults to `tracing`.
    pub fn diagnostics(mut self, diagnostics: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn location(mut self, location: Location) -> Self {
        self.location = location;
        self
    }

    pub fn resource(mut self, resource: Resource) -> Self {
        self.resource = resource;
        self
    }

    /// Start the dispatcher task. Must be called within a Tokio runtime.
    pub fn spawn(self) -> Landmark {
        let env = Environment {
            jar: self.jar.unwrap_or_else(|| Arc::new(MemoryJar::new())),
            transport: self.transport,
            diagnostics: self.diagnostics.unwrap_or_else(|| Arc::new(TracingSink)),
        };
        let dispatcher = Dispatcher::new(env, self.location, self.resource);
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(dispatcher.run(rx));
        Landmark { tx }
    }
}
