//! Adapter between the host transport primitive and the lifecycle controller.
//!
//! # Design
//! The host supplies a `Transport` that can open a connection for a
//! `WireRequest` and hands back a `TransportHandle` for writing the body and
//! aborting. Everything the connection reports afterwards goes through the
//! `EventSink` it was given, tagged with the attempt id, so the controller
//! can tell events of the current attempt from those of a superseded one.
//!
//! Hosts report either node-style events (`Response`, `Data`, `End`,
//! `Close`, `Error`) or XHR-style ready-state transitions. `Attempt`
//! translates both into the `LifecycleEvent` union and swallows anything
//! that arrives after the attempt finished or was aborted.

use tokio::sync::mpsc::UnboundedSender;
use tracing::trace;
use url::Url;

use crate::error::TransportError;
use crate::http::{Headers, Method, ResponseHead};
use crate::options::{Pool, PoolMode};
use crate::policy::Hop;

/// Identifies one attempt within a process. Never reused.
pub type AttemptId = u64;

/// XHR-style progress of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadyState {
    Opened,
    HeadersReceived(ResponseHead),
    Loading(Vec<u8>),
    Done,
}

/// What a host connection reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent {
    Response(ResponseHead),
    Data(Vec<u8>),
    End,
    Close,
    Error(TransportError),
    ReadyState(ReadyState),
}

/// Canonical events the controller consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Opened,
    HeadersReceived(ResponseHead),
    Data(Vec<u8>),
    Ended,
    /// The connection went away after the response started.
    Closed,
    Errored(TransportError),
}

/// Where a host connection pushes its events.
#[derive(Debug, Clone)]
pub struct EventSink {
    attempt: AttemptId,
    tx: UnboundedSender<(AttemptId, RawEvent)>,
}

impl EventSink {
    pub(crate) fn new(attempt: AttemptId, tx: UnboundedSender<(AttemptId, RawEvent)>) -> Self {
        Self { attempt, tx }
    }

    pub fn attempt(&self) -> AttemptId {
        self.attempt
    }

    /// Queue an event. Returns `false` once the owning request is gone.
    pub fn emit(&self, event: RawEvent) -> bool {
        self.tx.send((self.attempt, event)).is_ok()
    }
}

/// A fully resolved request for the host to execute.
#[derive(Debug, Clone)]
pub struct WireRequest {
    pub attempt: AttemptId,
    pub method: Method,
    pub url: Url,
    pub headers: Headers,
    pub pool: Option<Pool>,
}

/// The host's request primitive.
pub trait Transport {
    /// Start a connection for `request`. Events are reported through `sink`.
    fn open(&self, request: &WireRequest, sink: EventSink) -> Result<Box<dyn TransportHandle>, TransportError>;
}

/// The writable side of an open connection.
pub trait TransportHandle {
    fn write(&mut self, chunk: &[u8]) -> Result<(), TransportError>;

    fn end(&mut self, chunk: Option<&[u8]>) -> Result<(), TransportError>;

    fn abort(&mut self);

    /// Flow control for the response stream.
    fn pause(&mut self) {}

    fn resume(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    Responded,
    Done,
    Aborted,
}

/// One concrete connection attempt owned by a controller.
pub(crate) struct Attempt {
    id: AttemptId,
    handle: Box<dyn TransportHandle>,
    phase: Phase,
}

impl Attempt {
    pub(crate) fn open(
        transport: &dyn Transport,
        id: AttemptId,
        hop: &Hop,
        pool: &PoolMode,
        tx: &UnboundedSender<(AttemptId, RawEvent)>,
    ) -> Result<Self, TransportError> {
        let mut headers = hop.headers.clone();
        headers.set_default("connection", pool.connection_header());
        let request = WireRequest {
            attempt: id,
            method: hop.method,
            url: hop.url.clone(),
            headers,
            pool: pool.pool().cloned(),
        };
        let handle = transport.open(&request, EventSink::new(id, tx.clone()))?;
        Ok(Self {
            id,
            handle,
            phase: Phase::Open,
        })
    }

    pub(crate) fn id(&self) -> AttemptId {
        self.id
    }

    pub(crate) fn is_finished(&self) -> bool {
        matches!(self.phase, Phase::Done | Phase::Aborted)
    }

    pub(crate) fn write(&mut self, chunk: &[u8]) -> Result<(), TransportError> {
        if self.is_finished() {
            return Ok(());
        }
        self.handle.write(chunk)
    }

    pub(crate) fn end(&mut self, chunk: Option<&[u8]>) -> Result<(), TransportError> {
        if self.is_finished() {
            return Ok(());
        }
        self.handle.end(chunk)
    }

    /// Idempotent; a no-op once the attempt completed.
    pub(crate) fn abort(&mut self) {
        if self.is_finished() {
            return;
        }
        self.phase = Phase::Aborted;
        self.handle.abort();
    }

    pub(crate) fn pause(&mut self) {
        if self.phase == Phase::Responded {
            self.handle.pause();
        }
    }

    pub(crate) fn resume(&mut self) {
        if self.phase == Phase::Responded {
            self.handle.resume();
        }
    }

    /// Map a raw host event onto the canonical union.
    pub(crate) fn translate(&mut self, raw: RawEvent) -> Option<LifecycleEvent> {
        if self.is_finished() {
            trace!(attempt = self.id, ?raw, "dropping event for finished attempt");
            return None;
        }
        match raw {
            RawEvent::ReadyState(ReadyState::Opened) => Some(LifecycleEvent::Opened),
            RawEvent::Response(head) | RawEvent::ReadyState(ReadyState::HeadersReceived(head)) => {
                if self.phase == Phase::Responded {
                    return None;
                }
                if head.status == 0 {
                    self.phase = Phase::Done;
                    return Some(LifecycleEvent::Errored(TransportError::no_response()));
                }
                self.phase = Phase::Responded;
                Some(LifecycleEvent::HeadersReceived(head))
            }
            RawEvent::Data(chunk) | RawEvent::ReadyState(ReadyState::Loading(chunk)) => {
                (self.phase == Phase::Responded).then_some(LifecycleEvent::Data(chunk))
            }
            RawEvent::End | RawEvent::ReadyState(ReadyState::Done) => {
                let responded = self.phase == Phase::Responded;
                self.phase = Phase::Done;
                if responded {
                    Some(LifecycleEvent::Ended)
                } else {
                    Some(LifecycleEvent::Errored(TransportError::no_response()))
                }
            }
            RawEvent::Close => {
                let responded = self.phase == Phase::Responded;
                self.phase = Phase::Done;
                if responded {
                    Some(LifecycleEvent::Closed)
                } else {
                    Some(LifecycleEvent::Errored(TransportError::no_response()))
                }
            }
            RawEvent::Error(err) => {
                self.phase = Phase::Done;
                Some(LifecycleEvent::Errored(err))
            }
        }
    }
}
