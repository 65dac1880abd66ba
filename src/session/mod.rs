//! Request/response session over a byte link.
//!
//! A session pairs outbound requests with their replies. It sends one request
//! at a time, re-sends on timeout or corrupted input, and routes every frame
//! that answers nothing to unsolicited handlers and the event bus.
//!
//! ```no_run
//! # async fn demo() -> pumpcomm::Result<()> {
//! use pumpcomm::{Message, SerialTransport, Session};
//!
//! let mut transport = SerialTransport::with_port("/dev/rfcomm0");
//! transport.connect().await?;
//! let reader = transport.take_reader().ok_or(pumpcomm::Error::NotConnected)?;
//!
//! let (session, sink) = Session::builder().spawn(transport);
//! tokio::spawn(SerialTransport::run_read_loop(reader, sink));
//!
//! let reply = session.send(Message::status()).await?;
//! println!("{:?}", reply.body());
//! # Ok(())
//! # }
//! ```

mod dispatcher;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, oneshot};

use crate::config::{RequestOptions, SessionConfig};
use crate::error::{Error, Result};
use crate::event::{EventDispatcher, EventFilter, Subscription};
use crate::host::{AlarmSink, KeepAlive, LogAlarms, NoKeepAlive};
use crate::message::{Message, MessageDefinition, MessageRegistry};
use crate::transport::{LinkSink, Transport};

use dispatcher::{Dispatcher, QueuedRequest};

/// Callback for messages no request was waiting for.
pub type UnsolicitedHandler = Box<dyn Fn(&Message) + Send + Sync>;

/// Identifies one submitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    /// Returns the raw id.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Messages from handles to the session task.
pub(crate) enum Command {
    Submit(QueuedRequest),
    Cancel(RequestId),
    OnUnsolicited(UnsolicitedHandler),
    Shutdown(oneshot::Sender<()>),
}

/// Entry point for starting sessions.
pub struct Session;

impl Session {
    /// Starts building a session.
    #[must_use]
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }
}

/// Builder for a session.
pub struct SessionBuilder {
    config: SessionConfig,
    registry: MessageRegistry,
    keep_alive: Arc<dyn KeepAlive>,
    alarms: Arc<dyn AlarmSink>,
    events: Option<EventDispatcher>,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self {
            config: SessionConfig::default(),
            registry: MessageRegistry::with_defaults(),
            keep_alive: Arc::new(NoKeepAlive),
            alarms: Arc::new(LogAlarms),
            events: None,
        }
    }
}

impl SessionBuilder {
    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the message registry.
    #[must_use]
    pub fn registry(mut self, registry: MessageRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Registers an additional message definition.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateRegistration`] if the code is already bound.
    pub fn register(mut self, definition: MessageDefinition) -> Result<Self> {
        self.registry.register(definition)?;
        Ok(self)
    }

    /// Sets the keep-alive collaborator.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: Arc<dyn KeepAlive>) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Sets the alarm collaborator.
    #[must_use]
    pub fn alarms(mut self, alarms: Arc<dyn AlarmSink>) -> Self {
        self.alarms = alarms;
        self
    }

    /// Publishes events on an existing dispatcher.
    #[must_use]
    pub fn events(mut self, events: EventDispatcher) -> Self {
        self.events = Some(events);
        self
    }

    /// Spawns the session task on the current tokio runtime.
    ///
    /// Returns the handle for callers and the sink the transport's reader
    /// feeds inbound bytes into.
    pub fn spawn<T: Transport + 'static>(self, transport: T) -> (SessionHandle, LinkSink) {
        let depth = self.config.queue_depth_or_default();
        let events = self
            .events
            .unwrap_or_else(|| EventDispatcher::new(self.config.event_capacity_or_default()));
        let defaults = self.config.request;

        let (command_tx, command_rx) = mpsc::channel(depth);
        let (link_tx, link_rx) = mpsc::channel(depth);

        let dispatcher = Dispatcher::new(
            transport,
            self.registry,
            self.config,
            self.keep_alive,
            self.alarms,
            events.clone(),
        );
        tokio::spawn(dispatcher.run(command_rx, link_rx));

        let handle = SessionHandle {
            commands: command_tx,
            events,
            defaults,
            next_id: Arc::new(AtomicU64::new(1)),
        };
        (handle, LinkSink::new(link_tx))
    }
}

/// Handle for talking to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    events: EventDispatcher,
    defaults: RequestOptions,
    next_id: Arc<AtomicU64>,
}

impl SessionHandle {
    /// Sends a request and waits for its complete reply.
    pub async fn send(&self, message: Message) -> Result<Message> {
        self.submit(message).await?.wait().await
    }

    /// Like [`send`](Self::send) with explicit timing.
    pub async fn send_with(&self, message: Message, options: RequestOptions) -> Result<Message> {
        self.submit_with(message, options).await?.wait().await
    }

    /// Queues a request, returning a handle to its reply.
    pub async fn submit(&self, message: Message) -> Result<PendingReply> {
        self.submit_with(message, self.defaults).await
    }

    /// Like [`submit`](Self::submit) with explicit timing.
    pub async fn submit_with(
        &self,
        message: Message,
        options: RequestOptions,
    ) -> Result<PendingReply> {
        let id = RequestId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Submit(QueuedRequest {
                id,
                message,
                options,
                reply,
            }))
            .await
            .map_err(|_| Error::SessionClosed)?;

        Ok(PendingReply {
            id,
            rx: Some(rx),
            commands: self.commands.clone(),
        })
    }

    /// Registers a handler for messages no request was waiting for.
    pub async fn on_unsolicited<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.commands
            .send(Command::OnUnsolicited(Box::new(handler)))
            .await
            .map_err(|_| Error::SessionClosed)
    }

    /// Subscribes to session events.
    #[must_use]
    pub fn subscribe(&self, filter: Option<EventFilter>) -> Subscription {
        self.events.subscribe(filter)
    }

    /// Returns the event dispatcher.
    #[must_use]
    pub const fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// Default timing for requests.
    #[must_use]
    pub const fn defaults(&self) -> RequestOptions {
        self.defaults
    }

    /// Returns true once the session task has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Stops the session, failing outstanding requests with `Cancelled`.
    pub async fn shutdown(&self) {
        let (done, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(done)).await.is_ok() {
            let _ = rx.await;
        }
    }
}

/// Reply to a submitted request.
///
/// Dropping an unfinished reply cancels the request.
pub struct PendingReply {
    id: RequestId,
    rx: Option<oneshot::Receiver<Result<Message>>>,
    commands: mpsc::Sender<Command>,
}

impl PendingReply {
    /// Returns the request id.
    #[must_use]
    pub const fn id(&self) -> RequestId {
        self.id
    }

    /// Waits for the reply.
    pub async fn wait(mut self) -> Result<Message> {
        let rx = self.rx.take().ok_or(Error::Cancelled)?;
        rx.await.map_err(|_| Error::SessionClosed)?
    }

    /// Cancels the request. A reply arriving later is dropped.
    ///
    /// Returns once the session has processed the cancellation.
    pub async fn cancel(mut self) {
        let Some(rx) = self.rx.take() else {
            return;
        };
        if self.commands.send(Command::Cancel(self.id)).await.is_ok() {
            let _ = rx.await;
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            if matches!(rx.try_recv(), Err(oneshot::error::TryRecvError::Empty)) {
                let _ = self.commands.try_send(Command::Cancel(self.id));
            }
        }
    }
}

impl fmt::Debug for PendingReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingReply").field("id", &self.id).finish_non_exhaustive()
    }
}
