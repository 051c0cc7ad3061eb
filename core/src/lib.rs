//! Minimal HTTP client core with a host-supplied transport.
//!
//! # Overview
//! The host environment (a server runtime, or a browser-like shell) supplies
//! the request primitive through the `Transport` trait. This crate owns
//! everything above it: normalizing call arguments, encoding JSON and form
//! bodies, following redirects, retrying connection failures, validating
//! status codes and delivering exactly one outcome per logical request.
//!
//! # Design
//! - `Curly` is the stateless facade: it normalizes calls, runs the
//!   middleware chain and creates a `Request` per call.
//! - `Request` is the lifecycle state machine. It is driven by awaiting
//!   `next_event`/`run`/`collect` and is single-threaded.
//! - `transport::Attempt` adapts host events (node-style or ready-state) to
//!   one canonical event union and guards against stale or late events.
//! - Policies (`policy`) only decide; the controller acts on decisions.
//!
//! ```rust,ignore
//! let curly = Curly::new(host_transport);
//! let done = curly
//!     .get(("http://example.test/items", RequestOptions::default().query("x", "1").json()))
//!     .collect()
//!     .await;
//! assert_eq!(done.status(), Some(200));
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod http;
pub mod middleware;
pub mod options;
pub mod pipe;
pub mod policy;
pub mod request;
pub mod transport;

pub use client::{callback, Call, Curly, IntoCall, Target};
pub use codec::Decoded;
pub use config::ClientConfig;
pub use error::{CurlyError, Result, TransportError, TransportErrorKind};
pub use http::{Headers, Method, ResponseHead, ResponseView};
pub use middleware::{base_url, default_headers, default_query, Middleware, Next};
pub use options::{Body, Pool, PoolMode, RequestOptions};
pub use pipe::{PipeDest, SourceInfo, WriteDest};
pub use request::{Callback, Completion, Event, Request, State};
pub use transport::{AttemptId, EventSink, RawEvent, ReadyState, Transport, TransportHandle, WireRequest};
