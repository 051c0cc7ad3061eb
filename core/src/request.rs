//! The request lifecycle controller.
//!
//! # Design
//! A `Request` mediates one logical request across any number of attempts.
//! It opens the transport lazily on the first `write`/`end`, or by itself
//! the first time it is driven if the caller never touched the body. Host
//! events arrive over a single-consumer channel tagged with the attempt id;
//! anything not addressed to the current attempt is dropped.
//!
//! Redirects and retries swap in a fresh attempt without the caller seeing
//! it: the caller observes one `Sent`, at most one `Response`, zero or more
//! `Data` and exactly one terminal event. The completion callback is guarded
//! by a `delivered` flag, so whichever terminal outcome happens first is the
//! only one that reaches it.
//!
//! The controller is single-threaded (`!Send`) and is driven by awaiting
//! `next_event`, `run` or `collect` on a tokio current-thread runtime.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace, warn};

use crate::codec::{self, Decoded};
use crate::error::{CurlyError, Result, TransportError};
use crate::http::{Headers, ResponseHead, ResponseView};
use crate::options::PoolMode;
use crate::pipe::{PipeDest, SourceInfo, CHUNK_SIZE};
use crate::policy::{Hop, RedirectDecision, RedirectPolicy, RetryPolicy, StatusPolicy};
use crate::transport::{Attempt, AttemptId, LifecycleEvent, RawEvent, Transport};

static NEXT_REQUEST: AtomicU64 = AtomicU64::new(1);
static NEXT_ATTEMPT: AtomicU64 = AtomicU64::new(1);

/// Invoked once with the outcome of the logical request.
pub type Callback = Box<dyn FnOnce(Completion)>;

/// What the callback receives: the final response (if one arrived) and
/// either the decoded body or the error that ended the request.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub response: Option<ResponseView>,
    pub result: Result<Decoded>,
}

impl Completion {
    pub fn error(&self) -> Option<&CurlyError> {
        self.result.as_ref().err()
    }

    pub fn body(&self) -> Option<&Decoded> {
        self.result.as_ref().ok()
    }

    pub fn status(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.status)
    }
}

/// Stream-side events, in the order they can occur.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The request body was finalized and handed to the transport.
    Sent,
    Response(ResponseView),
    Data(Vec<u8>),
    End,
    /// Destroyed by the caller, or the connection closed mid-response.
    Close,
    Error(CurlyError),
}

impl Event {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::End | Event::Close | Event::Error(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Opening,
    Writing,
    RequestSent,
    AwaitingResponse,
    ResponseReceived,
    Streaming,
    Ended,
    Closed,
    Aborted,
    Errored,
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Ended | State::Closed | State::Aborted | State::Errored)
    }
}

/// A normalized request ready to be driven.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub hop: Hop,
    pub pool: PoolMode,
    pub json: bool,
    pub timeout: Option<Duration>,
    pub retries: u32,
    pub retry_delay: Duration,
    pub follow_redirects: bool,
    pub max_redirects: u32,
    pub redirect_strip_headers: Vec<String>,
    pub status: StatusPolicy,
}

enum Outcome {
    End,
    Destroyed,
    PrematureClose,
    Failed(CurlyError),
}

pub struct Request {
    id: u64,
    transport: Rc<dyn Transport>,
    tx: UnboundedSender<(AttemptId, RawEvent)>,
    rx: UnboundedReceiver<(AttemptId, RawEvent)>,
    hop: Option<Hop>,
    pool: PoolMode,
    json: bool,
    timeout: Option<Duration>,
    redirects: RedirectPolicy,
    retries: RetryPolicy,
    status: StatusPolicy,
    state: State,
    attempt: Option<Attempt>,
    readable: bool,
    writable: bool,
    writing: bool,
    piping: bool,
    auto_end: bool,
    paused: bool,
    sent: bool,
    deadline: Option<Instant>,
    retry_at: Option<Instant>,
    response: Option<ResponseView>,
    buffer: Option<Vec<u8>>,
    dest: Option<Box<dyn PipeDest>>,
    outbox: VecDeque<Event>,
    callback: Option<Callback>,
    completion: Option<Completion>,
    delivered: bool,
    pending_failure: Option<CurlyError>,
}

impl Request {
    pub fn new(transport: Rc<dyn Transport>, prepared: Prepared) -> Self {
        let redirects = RedirectPolicy::new(
            prepared.follow_redirects,
            prepared.max_redirects,
            prepared.redirect_strip_headers,
        );
        let retries = RetryPolicy::new(prepared.retries, prepared.retry_delay);
        let mut request = Self::blank(transport, redirects, retries, prepared.status);
        request.hop = Some(prepared.hop);
        request.pool = prepared.pool;
        request.json = prepared.json;
        request.timeout = prepared.timeout;
        request
    }

    /// A request that could not be prepared. It fails with `err` the first
    /// time it is driven, so the error still arrives through the usual path.
    pub fn rejected(transport: Rc<dyn Transport>, err: CurlyError) -> Self {
        let redirects = RedirectPolicy::new(false, 0, Vec::new());
        let retries = RetryPolicy::new(0, Duration::ZERO);
        let status = StatusPolicy::new(false, Default::default());
        let mut request = Self::blank(transport, redirects, retries, status);
        request.pending_failure = Some(err);
        request
    }

    fn blank(
        transport: Rc<dyn Transport>,
        redirects: RedirectPolicy,
        retries: RetryPolicy,
        status: StatusPolicy,
    ) -> Self {
        let (tx, rx) = unbounded_channel();
        Self {
            id: NEXT_REQUEST.fetch_add(1, Ordering::Relaxed),
            transport,
            tx,
            rx,
            hop: None,
            pool: PoolMode::Default,
            json: false,
            timeout: None,
            redirects,
            retries,
            status,
            state: State::Idle,
            attempt: None,
            readable: true,
            writable: true,
            writing: false,
            piping: false,
            auto_end: true,
            paused: false,
            sent: false,
            deadline: None,
            retry_at: None,
            response: None,
            buffer: None,
            dest: None,
            outbox: VecDeque::new(),
            callback: None,
            completion: None,
            delivered: false,
            pending_failure: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// URL of the current hop; changes as redirects are followed.
    pub fn url(&self) -> Option<&url::Url> {
        self.hop.as_ref().map(|hop| &hop.url)
    }

    pub fn headers(&self) -> Option<&Headers> {
        self.hop.as_ref().map(|hop| &hop.headers)
    }

    pub fn response(&self) -> Option<&ResponseView> {
        self.response.as_ref()
    }

    pub fn is_readable(&self) -> bool {
        self.readable
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Amend a header. Only allowed until the transport is opened.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) -> Result<()> {
        if self.attempt.is_some() || self.sent || !self.writable {
            return Err(CurlyError::HeadersAlreadySent);
        }
        if let Some(hop) = self.hop.as_mut() {
            hop.headers.set(name, value);
        }
        Ok(())
    }

    /// Register the completion callback; turns on body buffering.
    pub fn on_complete(&mut self, callback: Callback) {
        self.callback = Some(callback);
        if self.dest.is_none() {
            self.buffer.get_or_insert_with(Vec::new);
        }
    }

    /// Append a chunk to the outgoing body.
    pub fn write(&mut self, chunk: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(CurlyError::NotWritable);
        }
        self.auto_end = false;
        let first = !self.writing;
        if first {
            self.writing = true;
            self.retries.disable();
            self.redirects.body_streamed();
            // The encoded length only covered the upfront body.
            if let Some(hop) = self.hop.as_mut().filter(|hop| hop.body.is_some()) {
                hop.headers.remove("content-length");
            }
        }
        self.ensure_open();
        if !self.readable {
            return Ok(());
        }
        self.state = State::Writing;
        // An upfront body goes out ahead of streamed chunks and can no
        // longer be replayed on its own.
        let upfront = if first {
            self.hop.as_mut().and_then(|hop| hop.body.take())
        } else {
            None
        };
        let result = match self.attempt.as_mut() {
            Some(attempt) => match upfront {
                Some(body) => attempt.write(&body).and_then(|_| attempt.write(chunk)),
                None => attempt.write(chunk),
            },
            None => Ok(()),
        };
        if let Err(err) = result {
            self.on_attempt_error(err);
        }
        Ok(())
    }

    /// Finalize the outgoing body and send the request.
    pub fn end(&mut self, chunk: Option<&[u8]>) -> Result<()> {
        if !self.writable {
            return Err(CurlyError::NotWritable);
        }
        self.finish_body(chunk);
        Ok(())
    }

    fn finish_body(&mut self, chunk: Option<&[u8]>) {
        self.writable = false;
        self.auto_end = false;

        if self.writing {
            let result = self.attempt.as_mut().map(|attempt| attempt.end(chunk));
            self.mark_sent();
            if let Some(Err(err)) = result {
                self.on_attempt_error(err);
            }
            return;
        }

        if let (Some(chunk), Some(hop)) = (chunk, self.hop.as_mut()) {
            let body = hop.body.get_or_insert_with(Vec::new);
            body.extend_from_slice(chunk);
            let length = body.len().to_string();
            hop.headers.set("content-length", length);
        }
        self.mark_sent();
        self.ensure_open();
        self.send_hop_body();
    }

    /// Stream `source` into the request body and end it.
    ///
    /// The source's headers are copied onto the request unless already set,
    /// and its length becomes `content-length`. A piped body is never
    /// retried.
    pub fn pipe_from<R: Read>(&mut self, mut source: R, info: SourceInfo) -> Result<()> {
        if !self.writable {
            return Err(CurlyError::NotWritable);
        }
        self.piping = true;
        self.auto_end = false;
        self.retries.disable();
        self.redirects.body_streamed();
        if let Some(hop) = self.hop.as_mut() {
            for (name, value) in info.headers.iter() {
                hop.headers.set_default(name, value);
            }
            if let Some(length) = info.length {
                hop.headers.set_default("content-length", length.to_string());
            }
        }

        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    let err = CurlyError::from(e);
                    self.fail(err.clone());
                    return Err(err);
                }
            };
            self.write(&buf[..n])?;
            if !self.readable {
                return Ok(());
            }
        }
        self.end(None)
    }

    /// Send the response body to `dest` instead of buffering it. `Data`
    /// events are still emitted for stream consumers.
    pub fn pipe_to(&mut self, dest: impl PipeDest + 'static) {
        let mut dest: Box<dyn PipeDest> = Box::new(dest);
        if let Some(response) = &self.response {
            copy_head(dest.as_mut(), response);
        }
        self.dest = Some(dest);
        self.buffer = None;
    }

    pub fn pause(&mut self) {
        self.paused = true;
        if self.response.is_some() {
            if let Some(attempt) = self.attempt.as_mut() {
                attempt.pause();
            }
        }
    }

    pub fn resume(&mut self) {
        self.paused = false;
        if self.response.is_some() {
            if let Some(attempt) = self.attempt.as_mut() {
                attempt.resume();
            }
        }
    }

    /// Abandon the request. Emits `Close`; the callback, if it has not fired
    /// yet, receives `Aborted`. No-op once the request finished.
    pub fn destroy(&mut self) {
        if !self.readable {
            return;
        }
        debug!(request = self.id, state = ?self.state, "destroyed");
        self.retries.disable();
        self.finish(Outcome::Destroyed);
    }

    /// Drive the request until the next caller-visible event.
    ///
    /// Returns `None` after the terminal event has been handed out.
    pub async fn next_event(&mut self) -> Option<Event> {
        loop {
            if let Some(event) = self.outbox.pop_front() {
                return Some(event);
            }
            if !self.readable {
                return None;
            }
            if self.auto_end || self.pending_failure.is_some() {
                self.tick();
                continue;
            }
            if self.state == State::RequestSent {
                self.state = State::AwaitingResponse;
            }

            let deadline = self.deadline;
            let retry_at = self.retry_at;
            tokio::select! {
                Some((id, raw)) = self.rx.recv() => self.on_raw_event(id, raw),
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.on_timeout();
                }
                _ = sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    self.on_retry_due();
                }
            }
        }
    }

    /// Drive the request to completion, discarding stream events.
    pub async fn run(&mut self) {
        while self.next_event().await.is_some() {}
    }

    /// Buffer the body, drive to completion and return the outcome.
    pub async fn collect(mut self) -> Completion {
        if self.dest.is_none() {
            self.buffer.get_or_insert_with(Vec::new);
        }
        self.run().await;
        self.completion.take().unwrap_or(Completion {
            response: None,
            result: Err(CurlyError::PrematureClose),
        })
    }

    /// The first scheduling tick: surface a preparation failure, or send a
    /// zero-length body if the caller never wrote one.
    fn tick(&mut self) {
        if let Some(err) = self.pending_failure.take() {
            self.fail(err);
            return;
        }
        if !self.auto_end {
            return;
        }
        self.auto_end = false;
        if self.writing || self.piping || !self.writable {
            return;
        }
        if let Some(hop) = self.hop.as_mut() {
            let length = hop.body.as_ref().map_or(0, Vec::len);
            hop.headers.set_default("content-length", length.to_string());
        }
        trace!(request = self.id, "no body written, ending request");
        self.finish_body(None);
    }

    fn mark_sent(&mut self) {
        self.state = State::RequestSent;
        if !self.sent {
            self.sent = true;
            self.outbox.push_back(Event::Sent);
        }
    }

    fn ensure_open(&mut self) {
        if self.attempt.is_none() && self.retry_at.is_none() && self.readable {
            self.open_attempt();
        }
    }

    fn open_attempt(&mut self) {
        let Some(hop) = self.hop.as_ref() else {
            return;
        };
        let id = NEXT_ATTEMPT.fetch_add(1, Ordering::Relaxed);
        if self.deadline.is_none() {
            self.deadline = self.timeout.map(|timeout| Instant::now() + timeout);
        }
        debug!(request = self.id, attempt = id, method = %hop.method, url = %hop.url, "opening attempt");
        let opened = Attempt::open(self.transport.as_ref(), id, hop, &self.pool, &self.tx);
        if self.state == State::Idle {
            self.state = State::Opening;
        }
        match opened {
            Ok(attempt) => self.attempt = Some(attempt),
            Err(err) => self.on_attempt_error(err),
        }
    }

    fn send_hop_body(&mut self) {
        let body = self.hop.as_ref().and_then(|hop| hop.body.clone());
        let result = self.attempt.as_mut().map(|attempt| attempt.end(body.as_deref()));
        if let Some(Err(err)) = result {
            self.on_attempt_error(err);
        }
    }

    fn on_raw_event(&mut self, id: AttemptId, raw: RawEvent) {
        let Some(attempt) = self.attempt.as_mut() else {
            trace!(request = self.id, attempt = id, "event with no current attempt");
            return;
        };
        if attempt.id() != id {
            trace!(request = self.id, attempt = id, current = attempt.id(), "stale event dropped");
            return;
        }
        if let Some(event) = attempt.translate(raw) {
            self.on_lifecycle(event);
        }
    }

    fn on_lifecycle(&mut self, event: LifecycleEvent) {
        if !self.readable {
            return;
        }
        match event {
            LifecycleEvent::Opened => trace!(request = self.id, "transport opened"),
            LifecycleEvent::HeadersReceived(head) => self.on_headers(head),
            LifecycleEvent::Data(chunk) => self.on_data(chunk),
            LifecycleEvent::Ended => self.finish(Outcome::End),
            LifecycleEvent::Closed => self.finish(Outcome::PrematureClose),
            LifecycleEvent::Errored(err) => self.on_attempt_error(err),
        }
    }

    fn on_headers(&mut self, head: ResponseHead) {
        let Some(hop) = self.hop.as_ref() else {
            return;
        };
        match self.redirects.evaluate(hop, &head) {
            Err(err) => self.fail(err),
            Ok(RedirectDecision::Follow(next)) => {
                debug!(
                    request = self.id,
                    status = head.status,
                    from = %hop.url,
                    to = %next.url,
                    remaining = self.redirects.remaining(),
                    "following redirect"
                );
                if let Some(mut previous) = self.attempt.take() {
                    previous.abort();
                }
                self.hop = Some(next);
                self.open_attempt();
                self.send_hop_body();
            }
            Ok(RedirectDecision::Deliver) => {
                let view = ResponseView::from_head(head, &hop.url);
                let status = view.status;
                self.state = State::ResponseReceived;
                if self.paused {
                    if let Some(attempt) = self.attempt.as_mut() {
                        attempt.pause();
                    }
                }
                if let Some(dest) = self.dest.as_mut() {
                    copy_head(dest.as_mut(), &view);
                }
                self.response = Some(view.clone());
                self.outbox.push_back(Event::Response(view));
                match self.status.check(status) {
                    Ok(()) => self.state = State::Streaming,
                    Err(err) => self.fail(err),
                }
            }
        }
    }

    fn on_data(&mut self, chunk: Vec<u8>) {
        self.state = State::Streaming;
        if let Some(dest) = self.dest.as_mut() {
            if let Err(e) = dest.write(&chunk) {
                self.fail(CurlyError::from(e));
                return;
            }
        } else if let Some(buffer) = self.buffer.as_mut() {
            buffer.extend_from_slice(&chunk);
        }
        self.outbox.push_back(Event::Data(chunk));
    }

    fn on_attempt_error(&mut self, err: TransportError) {
        if !self.readable {
            return;
        }
        let err = CurlyError::Network(err);
        if let Some(mut attempt) = self.attempt.take() {
            attempt.abort();
        }
        let replayable = !self.writing && !self.piping && self.response.is_none();
        match self.retries.next_delay(&err, replayable) {
            Some(delay) => {
                warn!(
                    request = self.id,
                    remaining = self.retries.remaining(),
                    ?delay,
                    "attempt failed, retrying: {err}"
                );
                self.retry_at = Some(Instant::now() + delay);
            }
            None => self.fail(err),
        }
    }

    fn on_retry_due(&mut self) {
        self.retry_at = None;
        if !self.readable {
            return;
        }
        self.open_attempt();
        self.send_hop_body();
    }

    fn on_timeout(&mut self) {
        self.deadline = None;
        let timeout = self.timeout.unwrap_or_default();
        warn!(request = self.id, ?timeout, "request timed out");
        self.fail(CurlyError::Timeout(timeout));
    }

    fn fail(&mut self, err: CurlyError) {
        self.finish(Outcome::Failed(err));
    }

    /// The single terminal transition. Everything after it is a no-op.
    fn finish(&mut self, outcome: Outcome) {
        if !self.readable {
            return;
        }
        self.readable = false;
        self.writable = false;
        self.auto_end = false;
        self.retry_at = None;
        self.deadline = None;
        if let Some(attempt) = self.attempt.as_mut() {
            attempt.abort();
        }

        let outcome = match outcome {
            Outcome::End => match self.dest.as_mut().map(|dest| dest.finish()) {
                Some(Err(e)) => Outcome::Failed(e.into()),
                _ => Outcome::End,
            },
            other => other,
        };

        let (state, event, result) = match outcome {
            Outcome::End => match self.take_body() {
                Ok(body) => (State::Ended, Event::End, Ok(body)),
                Err(err) => (State::Errored, Event::Error(err.clone()), Err(err)),
            },
            Outcome::Destroyed => (State::Aborted, Event::Close, Err(CurlyError::Aborted)),
            Outcome::PrematureClose => (State::Closed, Event::Close, Err(CurlyError::PrematureClose)),
            Outcome::Failed(err) => (State::Errored, Event::Error(err.clone()), Err(err)),
        };
        self.state = state;
        debug!(request = self.id, ?state, "request finished");
        self.outbox.push_back(event);
        self.deliver(result);
    }

    fn take_body(&mut self) -> Result<Decoded> {
        let Some(bytes) = self.buffer.take() else {
            return Ok(Decoded::Streamed);
        };
        let decoded = codec::decode(&bytes, self.json);
        if let Some(response) = self.response.as_mut() {
            response.body = Some(bytes);
        }
        decoded
    }

    fn deliver(&mut self, result: Result<Decoded>) {
        if self.delivered {
            return;
        }
        self.delivered = true;
        let completion = Completion {
            response: self.response.clone(),
            result,
        };
        self.completion = Some(completion.clone());
        if let Some(callback) = self.callback.take() {
            callback(completion);
        }
    }
}

fn copy_head(dest: &mut dyn PipeDest, response: &ResponseView) {
    dest.set_status(response.status);
    for (name, value) in response.headers.iter() {
        dest.set_header(name, value);
    }
}
