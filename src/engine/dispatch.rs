//! The dispatcher: owns identity and queue state, turns calls into requests.
//!
//! Runs as a single task. Each loop iteration is one tick: first every
//! command already in the mailbox is applied (the synchronous part), then the
//! batch of tasks deferred to this tick runs. That one tick of look-ahead is
//! what lets an `identify` and a `track` issued together share a request.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::{Mode, Options, TransportKind};
use crate::cookie::{CookieJar, CookieStore};
use crate::diagnostic::{Diagnostic, DiagnosticSink};
use crate::identity::{Device, User};
use crate::model::{Event, Location, Resource};
use crate::telemetry::dispatch::{record_outcome, start_dispatch_span};
use crate::telemetry::metrics;
use crate::transport::{
    Delivery, Endpoint, HttpTransport, Payload, PixelTransport, RecordingTransport, Reply,
    Transport, track_url,
};

use super::Lifecycle;
use super::call::{Call, Callback, IdArg, Identify, Track};
use super::tick::Ticker;

/// Messages from [`Landmark`](super::Landmark) handles.
pub(crate) enum Command {
    Call(Call),
    SetLocation(Location),
    HashChanged(Location),
    SetResource(Resource),
    Query(Box<dyn FnOnce(&Dispatcher) + Send>),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Work deferred to a later tick.
enum Task {
    /// Enqueue an event whose identity had not been settled yet.
    Enqueue(Queued),
    /// Make sure a fresh identification reaches the server. Carries the
    /// traits version it introduced, if it changed any.
    CheckIdentify {
        version: Option<u64>,
        callback: Option<Callback>,
    },
    /// Send the head of the queue.
    Drain,
}

/// A queue entry. `event: None` carries identification only.
struct Queued {
    event: Option<Event>,
    callback: Option<Callback>,
}

/// Collaborators fixed at construction.
pub(crate) struct Environment {
    pub jar: Arc<dyn CookieJar>,
    pub transport: Option<Arc<dyn Transport>>,
    pub diagnostics: Arc<dyn DiagnosticSink>,
}

pub(crate) struct Dispatcher {
    env: Environment,
    options: Options,
    lifecycle: Lifecycle,
    location: Location,
    resource: Resource,
    user: User,
    device: Option<Device>,
    transport: Arc<dyn Transport>,
    /// Calls made before `initialize`, in call order.
    buffer: Vec<Call>,
    queue: VecDeque<Queued>,
    ticker: Ticker<Task>,
    /// Bumped whenever `identify` changes traits.
    traits_version: u64,
    /// Latest traits version a drain has taken, sent or not.
    traits_consumed: u64,
    /// Whether that drain actually produced a request.
    traits_delivered: bool,
    /// A `Drain` task is already waiting in the ticker.
    drain_scheduled: bool,
    seq: u64,
    deliveries: JoinSet<()>,
    flush_waiters: Vec<oneshot::Sender<()>>,
    shutdown_waiters: Vec<oneshot::Sender<()>>,
}

impl Dispatcher {
    pub(crate) fn new(env: Environment, location: Location, resource: Resource) -> Self {
        let options = Options::default();
        let cookie = Arc::new(CookieStore::new(
            Arc::clone(&env.jar),
            &options.cookie,
            &location.hostname,
        ));
        let user = User::new(cookie, options.user.clone());
        let transport = env
            .transport
            .clone()
            .unwrap_or_else(|| Arc::new(RecordingTransport::new()));
        Self {
            env,
            options,
            lifecycle: Lifecycle::Uninitialized,
            location,
            resource,
            user,
            device: None,
            transport,
            buffer: Vec::new(),
            queue: VecDeque::new(),
            ticker: Ticker::new(),
            traits_version: 0,
            traits_consumed: 0,
            traits_delivered: false,
            drain_scheduled: false,
            seq: 0,
            deliveries: JoinSet::new(),
            flush_waiters: Vec::new(),
            shutdown_waiters: Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Read access for queries
    // -----------------------------------------------------------------------

    pub(crate) fn user(&self) -> &User {
        &self.user
    }

    pub(crate) fn device_id(&self) -> Option<String> {
        self.device.as_ref().and_then(Device::id).map(str::to_string)
    }

    pub(crate) fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub(crate) fn options(&self) -> &Options {
        &self.options
    }

    pub(crate) fn location(&self) -> &Location {
        &self.location
    }

    pub(crate) fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// A user id or traits are known.
    pub(crate) fn identified(&self) -> bool {
        !self.user.serialize().is_empty()
    }

    // -----------------------------------------------------------------------
    // Event loop
    // -----------------------------------------------------------------------

    pub(crate) async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        info!("landmark dispatcher started");
        let mut open = true;

        loop {
            if open {
                open = self.receive_ready(&mut rx);
            }

            if !self.ticker.is_idle() {
                self.run_tick();
                tokio::task::yield_now().await;
                continue;
            }

            if self.deliveries.is_empty() {
                for waiter in self.flush_waiters.drain(..) {
                    let _ = waiter.send(());
                }
                if !open {
                    break;
                }
            }

            tokio::select! {
                command = rx.recv(), if open => match command {
                    Some(command) => open = self.handle(command),
                    None => open = false,
                },
                Some(joined) = self.deliveries.join_next(), if !self.deliveries.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "delivery task failed");
                    }
                }
                else => break,
            }
        }

        for waiter in self.shutdown_waiters.drain(..) {
            let _ = waiter.send(());
        }
        info!(ticks = self.ticker.current(), sent = self.seq, "landmark dispatcher stopped");
    }

    /// Apply every command already waiting. Returns whether the mailbox is
    /// still open.
    fn receive_ready(&mut self, rx: &mut mpsc::UnboundedReceiver<Command>) -> bool {
        loop {
            match rx.try_recv() {
                Ok(command) => {
                    if !self.handle(command) {
                        return false;
                    }
                }
                Err(mpsc::error::TryRecvError::Empty) => return true,
                Err(mpsc::error::TryRecvError::Disconnected) => return false,
            }
        }
    }

    fn run_tick(&mut self) {
        for task in self.ticker.advance() {
            match task {
                Task::Enqueue(queued) => self.enqueue(queued),
                Task::CheckIdentify { version, callback } => self.check_identify(version, callback),
                Task::Drain => self.drain(),
            }
        }
    }

    /// Returns false once the dispatcher should stop accepting commands.
    fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Call(call) => self.call(call),
            Command::SetLocation(location) => self.location = location,
            Command::HashChanged(location) => {
                self.location = location;
                if self.options.track_hash_change {
                    self.call(Call::Track(Track::pageview().include_hash(true)));
                }
            }
            Command::SetResource(resource) => self.resource = resource,
            Command::Query(query) => query(self),
            Command::Flush(waiter) => self.flush_waiters.push(waiter),
            Command::Shutdown(waiter) => {
                self.shutdown_waiters.push(waiter);
                return false;
            }
        }
        true
    }

    // -----------------------------------------------------------------------
    // Calls
    // -----------------------------------------------------------------------

    fn call(&mut self, call: Call) {
        match (self.lifecycle, call) {
            (_, Call::Initialize(init)) => self.initialize(init.into_options()),
            (Lifecycle::Uninitialized, call) => {
                debug!(?call, "buffering call until initialize");
                self.buffer.push(call);
            }
            (_, call) => self.apply(call),
        }
    }

    fn apply(&mut self, call: Call) {
        match call {
            Call::Initialize(init) => self.initialize(init.into_options()),
            Call::Identify(identify) => self.identify(identify),
            Call::Track(track) => self.track(track),
            Call::Logout => self.logout(),
        }
    }

    fn initialize(&mut self, options: Options) {
        if self.lifecycle == Lifecycle::Initialized {
            self.configure(options);
            info!("landmark reconfigured");
            return;
        }

        self.lifecycle = Lifecycle::Initializing;
        self.configure(options);

        let mut buffered = std::mem::take(&mut self.buffer);
        if self.options.pageview && !buffered.iter().any(Call::is_page_view) {
            buffered.insert(0, Call::Track(Track::pageview()));
        }
        let replayed = buffered.len();
        for call in buffered {
            self.apply(call);
        }

        self.lifecycle = Lifecycle::Initialized;
        info!(replayed, mode = ?self.options.mode, "landmark initialized");
    }

    /// Rebuild storage, identities, and transport from `options`.
    fn configure(&mut self, options: Options) {
        let cookie = Arc::new(CookieStore::new(
            Arc::clone(&self.env.jar),
            &options.cookie,
            &self.location.hostname,
        ));

        let previous_id = self.user.id().map(str::to_string);
        let traits = self.user.traits().clone();
        let mut user = User::new(Arc::clone(&cookie), options.user.clone());
        if user.id().is_none() && !cookie.enabled() {
            user.set_id(previous_id);
        }
        user.set_traits(traits);
        self.user = user;

        self.device = Some(Device::new(&cookie, options.device.clone(), options.mode));
        self.transport = select_transport(&self.env, &options);
        self.options = options;
    }

    fn identify(&mut self, identify: Identify) {
        let Identify {
            id,
            traits,
            callback,
        } = identify;
        let id = match id {
            IdArg::Keep => self.user.id().map(str::to_string),
            IdArg::Set(id) => id,
        };
        let version = (!traits.is_empty()).then(|| {
            self.traits_version += 1;
            self.traits_version
        });
        self.user.identify(id, traits);
        debug!(user_id = ?self.user.id(), "user identified");

        self.ticker.defer(Task::CheckIdentify { version, callback });
    }

    fn track(&mut self, track: Track) {
        let mut path = self.location.pathname.clone();
        if track.include_hash {
            path.push_str(&self.location.hash);
        }
        let event = Event {
            resource: self.resource.resolve(&path),
            action: track.action,
            path,
            properties: track.properties,
            timestamp: Utc::now(),
        };
        let queued = Queued {
            event: Some(event),
            callback: track.callback,
        };

        if self.identified() {
            self.enqueue(queued);
        } else {
            // Give a concurrent identify one tick to land first.
            self.ticker.defer(Task::Enqueue(queued));
        }
    }

    fn logout(&mut self) {
        self.user.logout();
        self.traits_consumed = self.traits_version;
        self.traits_delivered = false;
        debug!("user logged out");
    }

    // -----------------------------------------------------------------------
    // Queue
    // -----------------------------------------------------------------------

    fn enqueue(&mut self, queued: Queued) {
        let kind = if queued.event.is_some() { "event" } else { "identify" };
        metrics::events_enqueued().add(1, &[opentelemetry::KeyValue::new("kind", kind)]);
        self.queue.push_back(queued);
        self.schedule_drain();
    }

    /// At most one drain per tick.
    fn schedule_drain(&mut self) {
        if !self.drain_scheduled {
            self.drain_scheduled = true;
            self.ticker.defer(Task::Drain);
        }
    }

    fn fresh_traits(&self) -> bool {
        self.traits_version > self.traits_consumed
    }

    fn check_identify(&mut self, version: Option<u64>, callback: Option<Callback>) {
        if !self.queue.is_empty() {
            self.complete(callback, Delivery::ok(Reply::Coalesced));
            return;
        }
        match version {
            // An earlier drain already took these traits.
            Some(version) if version <= self.traits_consumed => {
                let delivery = if self.traits_delivered {
                    Delivery::ok(Reply::Coalesced)
                } else {
                    Delivery::failed(Reply::Empty)
                };
                self.complete(callback, delivery);
            }
            _ => self.enqueue(Queued {
                event: None,
                callback,
            }),
        }
    }

    fn drain(&mut self) {
        self.drain_scheduled = false;
        let Some(Queued { event, callback }) = self.queue.pop_front() else {
            return;
        };
        self.seq += 1;

        let action = event.as_ref().map_or("identify", |e| e.action.as_str());
        let span = start_dispatch_span(action, self.seq);
        let outcome = span.in_scope(|| self.dispatch(event, callback));
        record_outcome(&span, outcome);

        if !self.queue.is_empty() {
            self.schedule_drain();
        }
    }

    /// Build and send one request. Returns the outcome label.
    fn dispatch(&mut self, event: Option<Event>, callback: Option<Callback>) -> &'static str {
        let traits = if self.fresh_traits() {
            self.traits_consumed = self.traits_version;
            self.traits_delivered = false;
            self.user.serialize().traits
        } else {
            None
        };
        let properties = event.map(|e| e.to_properties(self.options.timestamps));

        if traits.is_none() && properties.is_none() {
            return self.skip("empty", None, callback);
        }

        let Some(api_key) = self.options.api_key().map(str::to_string) else {
            return self.skip("missing_api_key", Some(Diagnostic::MissingApiKey), callback);
        };

        let id = self.user.id().map(str::to_string);
        let device = self.device_id();
        if id.is_none() && device.is_none() {
            return self.skip(
                "identity_unavailable",
                Some(Diagnostic::IdentityUnavailable),
                callback,
            );
        }

        let payload = Payload {
            api_key,
            device,
            id,
            traits,
            properties,
        };
        let endpoint = Endpoint {
            secure: self.location.is_secure(),
            host: self.options.host.clone(),
            port: self.options.port,
        };
        let url = match track_url(&endpoint, &payload) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "cannot build tracking url");
                return self.skip("invalid_url", None, callback);
            }
        };

        if payload.traits.is_some() {
            self.traits_delivered = true;
        }

        let server = metrics::server_address(&endpoint.host);
        metrics::requests_sent().add(1, std::slice::from_ref(&server));
        debug!(%url, "sending tracking request");

        let transport = Arc::clone(&self.transport);
        let diagnostics = Arc::clone(&self.env.diagnostics);
        self.deliveries.spawn(async move {
            let delivery = transport.deliver(&url).await;
            if !delivery.success {
                metrics::deliveries_failed().add(1, &[server]);
                let response = match &delivery.reply {
                    Reply::Body(body) => body.clone(),
                    _ => Value::Null,
                };
                diagnostics.report(&Diagnostic::TransportFailed { url, response });
            }
            if let Some(callback) = callback {
                callback(delivery.success, delivery.reply);
            }
        });

        "sent"
    }

    fn skip(
        &mut self,
        reason: &'static str,
        diagnostic: Option<Diagnostic>,
        callback: Option<Callback>,
    ) -> &'static str {
        metrics::requests_skipped().add(1, &[opentelemetry::KeyValue::new("reason", reason)]);
        if let Some(diagnostic) = diagnostic {
            self.env.diagnostics.report(&diagnostic);
        } else {
            debug!(reason, "nothing sent");
        }
        self.complete(callback, Delivery::failed(Reply::Empty));
        reason
    }

    /// Invoke a callback off the dispatcher, so a slow or panicking callback
    /// cannot stall the queue.
    fn complete(&mut self, callback: Option<Callback>, delivery: Delivery) {
        if let Some(callback) = callback {
            self.deliveries.spawn(async move {
                callback(delivery.success, delivery.reply);
            });
        }
    }
}

fn select_transport(env: &Environment, options: &Options) -> Arc<dyn Transport> {
    if let Some(transport) = &env.transport {
        return Arc::clone(transport);
    }
    match (options.mode, options.transport) {
        (Mode::Test, _) => Arc::new(RecordingTransport::new()),
        (Mode::Live, TransportKind::Pixel) => Arc::new(PixelTransport::new()),
        (Mode::Live, TransportKind::Http) => match HttpTransport::new() {
            Ok(transport) => Arc::new(transport),
            Err(e) => {
                warn!(error = %e, "cannot build HTTP transport, falling back to pixel requests");
                Arc::new(PixelTransport::new())
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookie::MemoryJar;
    use crate::diagnostic::MemorySink;

    fn dispatcher(transport: RecordingTransport) -> Dispatcher {
        let env = Environment {
            jar: Arc::new(MemoryJar::new()),
            transport: Some(Arc::new(transport)),
            diagnostics: Arc::new(MemorySink::new()),
        };
        let mut dispatcher = Dispatcher::new(env, Location::default(), Resource::Path);
        dispatcher.call(Call::Initialize(Options::test("0000").into()));
        dispatcher
    }

    #[tokio::test]
    async fn drains_one_event_per_tick() {
        let mut d = dispatcher(RecordingTransport::new());
        d.call(Call::Identify(Identify::user("foo")));
        for action in ["a", "b", "c"] {
            d.call(Call::Track(Track::new(action)));
        }
        assert_eq!(d.queue_len(), 3);

        d.run_tick();
        assert_eq!(d.queue_len(), 2);
        d.run_tick();
        assert_eq!(d.queue_len(), 1);
        d.run_tick();
        assert_eq!(d.queue_len(), 0);
        assert!(d.ticker.is_idle());
    }

    #[tokio::test]
    async fn traits_taken_by_earlier_drain_are_not_resent() {
        let transport = RecordingTransport::new();
        let mut d = dispatcher(transport.clone());
        d.call(Call::Identify(Identify::user("foo")));
        d.run_tick();
        d.run_tick();

        d.call(Call::Track(Track::new("a")));
        d.call(Call::Identify(Identify::user("foo").with_trait("plan", "pro")));
        d.run_tick();
        assert!(d.queue.is_empty());
        assert!(d.ticker.is_idle());
        assert!(!d.fresh_traits());

        while d.deliveries.join_next().await.is_some() {}
        assert_eq!(transport.requests().len(), 1);
    }
}
