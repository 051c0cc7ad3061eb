//! In-memory transport whose replies are scripted per attempt.
//!
//! Each opened attempt takes the next `Reply`. Replies are emitted through
//! the attempt's sink when the request body is ended, which is when a real
//! host would put the request on the wire.

#![allow(dead_code)]

use std::cell::{Ref, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use curly_core::{
    callback, AttemptId, Callback, Completion, Event, EventSink, Headers, RawEvent, Request, ResponseHead, Transport,
    TransportError, TransportErrorKind, TransportHandle, WireRequest,
};

pub enum Reply {
    Respond {
        status: u16,
        headers: Headers,
        chunks: Vec<Vec<u8>>,
    },
    /// The connection fails after the request was sent.
    Fail(TransportErrorKind),
    /// `Transport::open` itself fails.
    Refuse(TransportErrorKind),
    /// Headers and one chunk, then the connection drops.
    Truncate(u16),
    /// Never answers.
    Hang,
    Raw(Vec<RawEvent>),
}

impl Reply {
    pub fn status(status: u16, body: &str) -> Self {
        Reply::Respond {
            status,
            headers: Headers::new(),
            chunks: if body.is_empty() { Vec::new() } else { vec![body.as_bytes().to_vec()] },
        }
    }

    pub fn ok(body: &str) -> Self {
        Reply::status(200, body)
    }

    pub fn chunked(chunks: &[&str]) -> Self {
        Reply::Respond {
            status: 200,
            headers: Headers::new(),
            chunks: chunks.iter().map(|c| c.as_bytes().to_vec()).collect(),
        }
    }

    pub fn redirect(status: u16, location: &str) -> Self {
        Reply::Respond {
            status,
            headers: [("location", location)].into_iter().collect(),
            chunks: vec![b"moved".to_vec()],
        }
    }
}

#[derive(Default)]
pub struct Log {
    pub opened: Vec<WireRequest>,
    pub written: Vec<(AttemptId, Vec<u8>)>,
    pub ended: Vec<(AttemptId, Option<Vec<u8>>)>,
    pub aborted: Vec<AttemptId>,
    pub paused: Vec<AttemptId>,
    pub resumed: Vec<AttemptId>,
    pub sinks: Vec<EventSink>,
}

impl Log {
    pub fn urls(&self) -> Vec<String> {
        self.opened.iter().map(|r| r.url.to_string()).collect()
    }

    /// Everything written to `attempt`, including the final chunk.
    pub fn body(&self, attempt: AttemptId) -> Vec<u8> {
        let mut body: Vec<u8> = self
            .written
            .iter()
            .filter(|(id, _)| *id == attempt)
            .flat_map(|(_, chunk)| chunk.clone())
            .collect();
        for (id, chunk) in &self.ended {
            if *id == attempt {
                body.extend(chunk.iter().flatten());
            }
        }
        body
    }
}

#[derive(Clone, Default)]
pub struct ScriptedTransport {
    replies: Rc<RefCell<VecDeque<Reply>>>,
    log: Rc<RefCell<Log>>,
}

impl ScriptedTransport {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            replies: Rc::new(RefCell::new(replies.into_iter().collect())),
            log: Rc::default(),
        }
    }

    pub fn log(&self) -> Ref<'_, Log> {
        self.log.borrow()
    }
}

impl Transport for ScriptedTransport {
    fn open(&self, request: &WireRequest, sink: EventSink) -> Result<Box<dyn TransportHandle>, TransportError> {
        let reply = self.replies.borrow_mut().pop_front().unwrap_or(Reply::Hang);
        let mut log = self.log.borrow_mut();
        log.opened.push(request.clone());
        log.sinks.push(sink.clone());
        if let Reply::Refuse(kind) = reply {
            return Err(TransportError::new(kind, "connection refused"));
        }
        Ok(Box::new(ScriptedHandle {
            id: request.attempt,
            reply: Some(reply),
            sink,
            log: self.log.clone(),
        }))
    }
}

struct ScriptedHandle {
    id: AttemptId,
    reply: Option<Reply>,
    sink: EventSink,
    log: Rc<RefCell<Log>>,
}

impl ScriptedHandle {
    fn play(&mut self) {
        let Some(reply) = self.reply.take() else {
            return;
        };
        let events = match reply {
            Reply::Respond {
                status,
                headers,
                chunks,
            } => {
                let mut events = vec![RawEvent::Response(ResponseHead::new(status, headers))];
                events.extend(chunks.into_iter().map(RawEvent::Data));
                events.push(RawEvent::End);
                events
            }
            Reply::Fail(kind) => vec![RawEvent::Error(TransportError::new(kind, "socket hang up"))],
            Reply::Truncate(status) => vec![
                RawEvent::Response(ResponseHead::new(status, Headers::new())),
                RawEvent::Data(b"partial".to_vec()),
                RawEvent::Close,
            ],
            Reply::Raw(events) => events,
            Reply::Hang | Reply::Refuse(_) => Vec::new(),
        };
        for event in events {
            self.sink.emit(event);
        }
    }
}

impl TransportHandle for ScriptedHandle {
    fn write(&mut self, chunk: &[u8]) -> Result<(), TransportError> {
        self.log.borrow_mut().written.push((self.id, chunk.to_vec()));
        Ok(())
    }

    fn end(&mut self, chunk: Option<&[u8]>) -> Result<(), TransportError> {
        self.log.borrow_mut().ended.push((self.id, chunk.map(<[u8]>::to_vec)));
        self.play();
        Ok(())
    }

    fn abort(&mut self) {
        self.log.borrow_mut().aborted.push(self.id);
    }

    fn pause(&mut self) {
        self.log.borrow_mut().paused.push(self.id);
    }

    fn resume(&mut self) {
        self.log.borrow_mut().resumed.push(self.id);
    }
}

/// Drive `request` to the end, collecting every event it hands out.
pub async fn drain(request: &mut Request) -> Vec<Event> {
    let mut events = Vec::new();
    while let Some(event) = request.next_event().await {
        events.push(event);
    }
    events
}

/// Event kinds only, for asserting on ordering.
pub fn kinds(events: &[Event]) -> Vec<&'static str> {
    events
        .iter()
        .map(|event| match event {
            Event::Sent => "sent",
            Event::Response(_) => "response",
            Event::Data(_) => "data",
            Event::End => "end",
            Event::Close => "close",
            Event::Error(_) => "error",
        })
        .collect()
}

/// A callback that records every completion it receives.
pub fn recorder() -> (Callback, Rc<RefCell<Vec<Completion>>>) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    (callback(move |done| sink.borrow_mut().push(done)), seen)
}
