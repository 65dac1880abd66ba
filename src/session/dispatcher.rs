//! The session task.
//!
//! One task owns everything that changes while the link is up: the frame
//! decoder, the request in flight, the queue behind it and the retry timer.
//! Callers and the transport reach it only through channels.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::config::{RequestOptions, SessionConfig, UnknownCommandPolicy};
use crate::error::{Error, FrameError, Result};
use crate::event::{Event, EventDispatcher};
use crate::history::HistoryState;
use crate::host::{AlarmSink, KeepAlive, KeepAliveGuard};
use crate::message::{Message, MessageBody, MessageRegistry};
use crate::protocol::{CommandCode, Frame, FrameDecoder, encode_frame};
use crate::session::{Command, RequestId, UnsolicitedHandler};
use crate::transport::{LinkEvent, Transport};
use crate::types::AlarmKind;

/// A request waiting for its turn.
pub(crate) struct QueuedRequest {
    pub(crate) id: RequestId,
    pub(crate) message: Message,
    pub(crate) options: RequestOptions,
    pub(crate) reply: oneshot::Sender<Result<Message>>,
}

/// The request currently on the wire.
struct PendingRequest {
    id: RequestId,
    message: Message,
    expected: CommandCode,
    frame: Bytes,
    options: RequestOptions,
    issued_at: Instant,
    attempt: u32,
    deadline: Instant,
    backing_off: bool,
    reply: oneshot::Sender<Result<Message>>,
    keep_alive: KeepAliveGuard,
}

impl PendingRequest {
    fn matches(&self, code: CommandCode) -> bool {
        code == self.expected || self.message.consumes(code)
    }

    /// Returns true if `frame` continues this request's reply.
    ///
    /// A history download only claims the data frame carrying its next
    /// sequence counter, and its end marker once records have arrived.
    fn claims(&self, frame: &Frame) -> bool {
        let code = frame.command();
        if !self.matches(code) {
            return false;
        }
        match self.message.body() {
            MessageBody::History(history) if code == CommandCode::HISTORY_RECORD => {
                frame.payload().first() == Some(&history.next_sequence())
            }
            MessageBody::History(history) => history.state() == HistoryState::Receiving,
            _ => true,
        }
    }

    /// Fences off what may still arrive for this request once it is gone.
    fn stale(&self, multi_frame: bool) -> StaleReply {
        StaleReply {
            id: self.id,
            expected: self.expected,
            multi_frame,
            until: Instant::now() + self.options.timeout,
        }
    }

    const fn retries_remaining(&self) -> bool {
        self.attempt <= self.options.max_retries
    }

    /// Hands the outcome to the requester and releases the keep-alive.
    fn finish(self, error: Option<Error>) {
        let Self {
            id,
            message,
            reply,
            keep_alive,
            issued_at,
            attempt,
            ..
        } = self;
        drop(keep_alive);

        let result = match error {
            None => {
                tracing::debug!(
                    %id,
                    command = %message.command(),
                    attempt,
                    elapsed_ms = issued_at.elapsed().as_millis() as u64,
                    "request completed"
                );
                Ok(message)
            }
            Some(error) => {
                tracing::debug!(%id, attempt, %error, "request failed");
                Err(error)
            }
        };
        if reply.send(result).is_err() {
            tracing::debug!(%id, "requester went away");
        }
    }
}

/// Reply codes of a cancelled, failed or finished request that may still arrive.
struct StaleReply {
    id: RequestId,
    expected: CommandCode,
    multi_frame: bool,
    until: Instant,
}

impl StaleReply {
    fn covers(&self, code: CommandCode) -> bool {
        code == self.expected || (self.multi_frame && code == CommandCode::HISTORY_RECORD)
    }
}

/// Outcome of feeding a frame to the pending request.
enum Progress {
    Done,
    Partial,
    Failed(Error),
}

pub(crate) struct Dispatcher<T> {
    transport: T,
    registry: MessageRegistry,
    config: SessionConfig,
    keep_alive: Arc<dyn KeepAlive>,
    alarms: Arc<dyn AlarmSink>,
    events: EventDispatcher,
    decoder: FrameDecoder,
    pending: Option<PendingRequest>,
    queue: VecDeque<QueuedRequest>,
    stale: Vec<StaleReply>,
    handlers: Vec<UnsolicitedHandler>,
}

impl<T: Transport> Dispatcher<T> {
    pub(crate) fn new(
        transport: T,
        registry: MessageRegistry,
        config: SessionConfig,
        keep_alive: Arc<dyn KeepAlive>,
        alarms: Arc<dyn AlarmSink>,
        events: EventDispatcher,
    ) -> Self {
        Self {
            transport,
            registry,
            decoder: FrameDecoder::new(config.frame),
            config,
            keep_alive,
            alarms,
            events,
            pending: None,
            queue: VecDeque::new(),
            stale: Vec::new(),
            handlers: Vec::new(),
        }
    }

    /// Runs until shutdown, link loss or every handle is gone.
    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut link: mpsc::Receiver<LinkEvent>,
    ) {
        tracing::debug!("session started");
        loop {
            self.start_next().await;
            let deadline = self.pending.as_ref().map(|p| p.deadline);

            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(Command::Shutdown(done)) => {
                        self.close(|| Error::Cancelled);
                        let _ = done.send(());
                        break;
                    }
                    Some(command) => self.on_command(command),
                    None => {
                        self.close(|| Error::SessionClosed);
                        break;
                    }
                },
                event = link.recv() => match event {
                    Some(LinkEvent::Bytes(data)) => self.on_bytes(&data).await,
                    Some(LinkEvent::Error(reason)) => {
                        self.link_lost(reason);
                        break;
                    }
                    None => {
                        self.link_lost("link closed".to_owned());
                        break;
                    }
                },
                () = sleep_until(deadline) => self.on_deadline().await,
            }
        }
        tracing::debug!("session stopped");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Submit(request) => {
                tracing::trace!(id = %request.id, command = %request.message.command(), "request queued");
                self.queue.push_back(request);
            }
            Command::Cancel(id) => self.cancel(id),
            Command::OnUnsolicited(handler) => self.handlers.push(handler),
            Command::Shutdown(_) => {}
        }
    }

    fn cancel(&mut self, id: RequestId) {
        if let Some(pending) = self.pending.take_if(|p| p.id == id) {
            tracing::debug!(%id, command = %pending.message.command(), "cancelled in flight");
            self.stale.push(pending.stale(pending.message.is_multi_frame()));
            pending.finish(Some(Error::Cancelled));
            return;
        }

        let queued = self.queue.iter().position(|r| r.id == id);
        if let Some(request) = queued.and_then(|index| self.queue.remove(index)) {
            tracing::debug!(%id, "cancelled before sending");
            let _ = request.reply.send(Err(Error::Cancelled));
        }
    }

    /// Puts the next queued request on the wire if nothing is in flight.
    async fn start_next(&mut self) {
        while self.pending.is_none() {
            let Some(request) = self.queue.pop_front() else {
                return;
            };
            let QueuedRequest {
                id,
                message,
                options,
                reply,
            } = request;

            let command = message.command();
            let expected = self
                .registry
                .expected_response(command)
                .unwrap_or_else(|_| message.body().response_command());

            let frame = match encode_frame(&self.config.frame, &Frame::new(command, message.serialize())) {
                Ok(frame) => frame,
                Err(error) => {
                    let _ = reply.send(Err(error.into()));
                    continue;
                }
            };

            let keep_alive = KeepAliveGuard::acquire(Arc::clone(&self.keep_alive));
            tracing::debug!(%id, %command, %expected, "sending request");
            tracing::trace!(bytes = %hex::encode(&frame), "tx");
            if let Err(error) = self.transport.write_bytes(frame.clone()).await {
                tracing::warn!(%id, %error, "write failed");
                drop(keep_alive);
                let _ = reply.send(Err(error));
                continue;
            }

            let now = Instant::now();
            self.pending = Some(PendingRequest {
                id,
                message,
                expected,
                frame,
                options,
                issued_at: now,
                attempt: 1,
                deadline: now + options.timeout,
                backing_off: false,
                reply,
                keep_alive,
            });
        }
    }

    /// Sends the pending request's frame again.
    async fn resend(&mut self) {
        let Some(pending) = self.pending.as_mut() else {
            return;
        };
        pending.attempt += 1;
        pending.backing_off = false;
        pending.message.restart();
        let frame = pending.frame.clone();
        tracing::debug!(id = %pending.id, attempt = pending.attempt, "re-sending request");

        match self.transport.write_bytes(frame).await {
            Ok(()) => {
                if let Some(pending) = self.pending.as_mut() {
                    pending.deadline = Instant::now() + pending.options.timeout;
                }
            }
            Err(error) => self.fail_pending(error),
        }
    }

    async fn on_deadline(&mut self) {
        let Some(pending) = self.pending.as_mut() else {
            return;
        };

        if pending.backing_off {
            self.resend().await;
            return;
        }

        if !pending.retries_remaining() {
            let error = Error::Timeout {
                timeout_ms: u64::try_from(pending.options.timeout.as_millis()).unwrap_or(u64::MAX),
                attempts: pending.attempt,
            };
            tracing::warn!(id = %pending.id, command = %pending.message.command(), "request timed out");
            self.fail_pending(error);
            return;
        }

        let backoff = pending.options.backoff_for(pending.attempt);
        tracing::debug!(id = %pending.id, attempt = pending.attempt, "no reply, retrying");
        if backoff.is_zero() {
            self.resend().await;
        } else {
            pending.message.restart();
            pending.backing_off = true;
            pending.deadline = Instant::now() + backoff;
        }
    }

    async fn on_bytes(&mut self, data: &[u8]) {
        tracing::trace!(bytes = %hex::encode(data), "rx");
        self.decoder.feed(data);
        loop {
            match self.decoder.decode() {
                Ok(Some(frame)) => self.on_frame(&frame),
                Ok(None) => break,
                Err(error) => {
                    self.on_corrupt(error).await;
                    break;
                }
            }
        }
    }

    /// The receive buffer was discarded because a frame failed verification.
    async fn on_corrupt(&mut self, error: FrameError) {
        tracing::warn!(%error, "discarding receive buffer");
        self.events.dispatch(Event::ChecksumFailure);
        if let Err(error) = self.transport.resync().await {
            tracing::warn!(%error, "transport resync failed");
        }

        let Some(pending) = self.pending.as_ref() else {
            return;
        };
        if pending.retries_remaining() {
            self.resend().await;
        } else {
            self.fail_pending(error.into());
        }
    }

    fn on_frame(&mut self, frame: &Frame) {
        let code = frame.command();
        tracing::trace!(command = %code, len = frame.payload().len(), "frame");

        if self.is_stale(frame) {
            return;
        }
        if !self.pending.as_ref().is_some_and(|p| p.matches(code)) {
            self.on_unmatched(frame);
            return;
        }
        let Some(pending) = self.pending.as_mut() else {
            return;
        };

        let progress = match pending.message.deserialize(code, frame.payload()) {
            Ok(()) if pending.message.is_complete() => Progress::Done,
            Ok(()) => {
                pending.deadline = Instant::now() + pending.options.timeout;
                pending.backing_off = false;
                Progress::Partial
            }
            Err(error) => Progress::Failed(error),
        };

        match progress {
            Progress::Partial => {}
            Progress::Failed(error) => {
                tracing::warn!(command = %code, %error, "reply rejected");
                self.fail_pending(error);
            }
            Progress::Done => {
                if let Some(pending) = self.pending.take() {
                    // Ended on an end-of-log record; the end marker may follow.
                    if code == CommandCode::HISTORY_RECORD && pending.message.is_multi_frame() {
                        self.stale.push(pending.stale(false));
                    }
                    if let Some(alarm) = pending.message.alarm() {
                        self.raise(alarm);
                    }
                    pending.finish(None);
                }
            }
        }
    }

    /// Drops leftovers of a request that is no longer pending.
    fn is_stale(&mut self, frame: &Frame) -> bool {
        let code = frame.command();
        let now = Instant::now();
        self.stale.retain(|s| s.until > now);
        let Some(index) = self.stale.iter().position(|s| s.covers(code)) else {
            return false;
        };
        if self.pending.as_ref().is_some_and(|p| p.claims(frame)) {
            return false;
        }

        tracing::debug!(id = %self.stale[index].id, command = %code, "dropping late reply");
        if code == self.stale[index].expected {
            self.stale.remove(index);
        }
        true
    }

    fn on_unmatched(&mut self, frame: &Frame) {
        let code = frame.command();
        let definition = match self.registry.resolve(code) {
            Ok(definition) => definition,
            Err(error) => {
                match self.config.unknown_commands {
                    UnknownCommandPolicy::Ignore => {
                        tracing::warn!(command = %code, payload = %hex::encode(frame.payload()), "ignoring unknown command");
                    }
                    UnknownCommandPolicy::Fail => {
                        tracing::warn!(command = %code, "unknown command");
                        self.fail_pending(error);
                    }
                }
                return;
            }
        };

        let mut message = definition.create();
        if let Err(error) = message.deserialize(code, frame.payload()) {
            tracing::warn!(command = %code, %error, "dropping malformed unsolicited frame");
            return;
        }
        tracing::debug!(command = %code, name = definition.name(), "unsolicited message");

        if let Some(alarm) = message.alarm() {
            self.raise(alarm);
        }
        for handler in &self.handlers {
            handler(&message);
        }
        self.events.dispatch(Event::Unsolicited(Box::new(message)));
    }

    fn raise(&self, alarm: AlarmKind) {
        tracing::warn!(%alarm, "pump alarm");
        self.alarms.raise(alarm);
        self.events.dispatch(Event::Alarm(alarm));
    }

    fn fail_pending(&mut self, error: Error) {
        if let Some(mut pending) = self.pending.take() {
            if pending.message.is_multi_frame() {
                self.stale.push(pending.stale(true));
            }
            pending.message.fail();
            pending.finish(Some(error));
        }
    }

    fn link_lost(&mut self, reason: String) {
        tracing::error!(%reason, "link lost");
        let failure = || Error::Link {
            reason: reason.clone(),
        };
        self.close(failure);
        self.events.dispatch(Event::LinkLost { reason });
    }

    /// Fails the request in flight and everything queued behind it.
    fn close(&mut self, error: impl Fn() -> Error) {
        self.fail_pending(error());
        for request in self.queue.drain(..) {
            let _ = request.reply.send(Err(error()));
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
