//! Builder and dispatcher.
//!
//! # Design
//! `Curly` holds the host transport, the client defaults and a middleware
//! chain, and carries no per-request state. Every call shape is normalized
//! into one `RequestOptions` (`IntoCall`), the middleware chain may rewrite
//! it, and the innermost sender turns it into a `Request` controller.
//! Preparation failures (a bad URL, a body that will not serialize) do not
//! panic or return early: the controller is created in a rejected state and
//! reports the error through the normal completion path.

use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;
use url::Url;

use crate::codec;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::http::{Method, UnknownMethod};
use crate::middleware::{Middleware, Next};
use crate::options::RequestOptions;
use crate::policy::{Hop, StatusPolicy};
use crate::request::{Callback, Prepared, Request};
use crate::transport::Transport;

/// Box a closure as a completion callback.
pub fn callback(f: impl FnOnce(crate::request::Completion) + 'static) -> Callback {
    Box::new(f)
}

/// What the caller is pointing the request at.
#[derive(Debug, Clone)]
pub enum Target {
    Url(String),
    Parsed(Url),
    /// An options record carrying its own url.
    Options(RequestOptions),
}

impl From<&str> for Target {
    fn from(url: &str) -> Self {
        Target::Url(url.to_string())
    }
}

impl From<String> for Target {
    fn from(url: String) -> Self {
        Target::Url(url)
    }
}

impl From<Url> for Target {
    fn from(url: Url) -> Self {
        Target::Parsed(url)
    }
}

impl From<RequestOptions> for Target {
    fn from(options: RequestOptions) -> Self {
        Target::Options(options)
    }
}

/// A normalized call: one options record and an optional callback.
pub struct Call {
    pub options: RequestOptions,
    pub callback: Option<Callback>,
}

impl Call {
    pub fn new(target: Target, options: Option<RequestOptions>, callback: Option<Callback>) -> Self {
        let options = match (target, options) {
            (Target::Options(options), _) => options,
            (Target::Url(url), options) => RequestOptions {
                url,
                ..options.unwrap_or_default()
            },
            (Target::Parsed(url), options) => RequestOptions {
                url: url.to_string(),
                ..options.unwrap_or_default()
            },
        };
        Self { options, callback }
    }
}

/// Every argument shape `Curly::request` accepts: a target, optional
/// options and an optional callback, in any order.
pub trait IntoCall {
    fn into_call(self) -> Call;
}

macro_rules! target_calls {
    ($($ty:ty),*) => {$(
        impl IntoCall for $ty {
            fn into_call(self) -> Call {
                Call::new(self.into(), None, None)
            }
        }

        impl IntoCall for ($ty, RequestOptions) {
            fn into_call(self) -> Call {
                Call::new(self.0.into(), Some(self.1), None)
            }
        }

        impl IntoCall for ($ty, Callback) {
            fn into_call(self) -> Call {
                Call::new(self.0.into(), None, Some(self.1))
            }
        }

        impl IntoCall for ($ty, RequestOptions, Callback) {
            fn into_call(self) -> Call {
                Call::new(self.0.into(), Some(self.1), Some(self.2))
            }
        }

        impl IntoCall for (RequestOptions, $ty) {
            fn into_call(self) -> Call {
                Call::new(self.1.into(), Some(self.0), None)
            }
        }

        impl IntoCall for (Callback, $ty) {
            fn into_call(self) -> Call {
                Call::new(self.1.into(), None, Some(self.0))
            }
        }

        impl IntoCall for ($ty, Callback, RequestOptions) {
            fn into_call(self) -> Call {
                Call::new(self.0.into(), Some(self.2), Some(self.1))
            }
        }

        impl IntoCall for (RequestOptions, $ty, Callback) {
            fn into_call(self) -> Call {
                Call::new(self.1.into(), Some(self.0), Some(self.2))
            }
        }

        impl IntoCall for (RequestOptions, Callback, $ty) {
            fn into_call(self) -> Call {
                Call::new(self.2.into(), Some(self.0), Some(self.1))
            }
        }

        impl IntoCall for (Callback, $ty, RequestOptions) {
            fn into_call(self) -> Call {
                Call::new(self.1.into(), Some(self.2), Some(self.0))
            }
        }

        impl IntoCall for (Callback, RequestOptions, $ty) {
            fn into_call(self) -> Call {
                Call::new(self.2.into(), Some(self.1), Some(self.0))
            }
        }
    )*};
}

target_calls!(&str, String, Url);

impl IntoCall for RequestOptions {
    fn into_call(self) -> Call {
        Call::new(Target::Options(self), None, None)
    }
}

impl IntoCall for (RequestOptions, Callback) {
    fn into_call(self) -> Call {
        Call::new(Target::Options(self.0), None, Some(self.1))
    }
}

impl IntoCall for (Callback, RequestOptions) {
    fn into_call(self) -> Call {
        Call::new(Target::Options(self.1), None, Some(self.0))
    }
}

impl IntoCall for Call {
    fn into_call(self) -> Call {
        self
    }
}

/// The client facade.
#[derive(Clone)]
pub struct Curly {
    transport: Rc<dyn Transport>,
    config: Rc<ClientConfig>,
    chain: Vec<Rc<dyn Middleware>>,
}

impl Curly {
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self::with_config(transport, ClientConfig::default())
    }

    pub fn with_config(transport: impl Transport + 'static, config: ClientConfig) -> Self {
        Self {
            transport: Rc::new(transport),
            config: Rc::new(config),
            chain: Vec::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// A new client whose chain runs `middleware` before this client's.
    pub fn layer(&self, middleware: impl Middleware + 'static) -> Curly {
        let mut chain: Vec<Rc<dyn Middleware>> = Vec::with_capacity(self.chain.len() + 1);
        chain.push(Rc::new(middleware));
        chain.extend(self.chain.iter().cloned());
        Curly {
            transport: self.transport.clone(),
            config: self.config.clone(),
            chain,
        }
    }

    pub fn request(&self, call: impl IntoCall) -> Request {
        self.dispatch(call.into_call())
    }

    pub fn method(&self, method: Method, call: impl IntoCall) -> Request {
        let mut call = call.into_call();
        call.options.method = method;
        self.dispatch(call)
    }

    /// Dispatch by verb name through `Method::VERBS` (`del` included).
    pub fn verb(&self, name: &str, call: impl IntoCall) -> std::result::Result<Request, UnknownMethod> {
        let method = name.parse::<Method>()?;
        Ok(self.method(method, call))
    }

    pub fn get(&self, call: impl IntoCall) -> Request {
        self.method(Method::Get, call)
    }

    pub fn head(&self, call: impl IntoCall) -> Request {
        self.method(Method::Head, call)
    }

    pub fn post(&self, call: impl IntoCall) -> Request {
        self.method(Method::Post, call)
    }

    pub fn put(&self, call: impl IntoCall) -> Request {
        self.method(Method::Put, call)
    }

    pub fn delete(&self, call: impl IntoCall) -> Request {
        self.method(Method::Delete, call)
    }

    fn dispatch(&self, call: Call) -> Request {
        let Call { options, callback } = call;
        let mut request = Next::new(self, &self.chain).run(options);
        if let Some(callback) = callback {
            request.on_complete(callback);
        }
        request
    }

    /// The innermost sender, reached once the middleware chain is done.
    pub(crate) fn send(&self, options: RequestOptions) -> Request {
        match prepare(options, &self.config) {
            Ok(prepared) => Request::new(self.transport.clone(), prepared),
            Err(err) => {
                warn!("request rejected before sending: {err}");
                Request::rejected(self.transport.clone(), err)
            }
        }
    }
}

/// Resolve `options` against the client defaults into a sendable request.
pub fn prepare(options: RequestOptions, config: &ClientConfig) -> Result<Prepared> {
    let target = if options.url.contains("://") {
        options.url.clone()
    } else {
        format!("http://{}", options.url)
    };
    let mut url = Url::parse(&target)?;

    let bust = options.bust.unwrap_or(config.bust);
    if !options.query.is_empty() || bust {
        let mut pairs = url.query_pairs_mut();
        pairs.extend_pairs(&options.query);
        if bust {
            pairs.append_pair("t", &unix_millis().to_string());
        }
    }

    let mut headers = options.headers.clone();
    for (name, value) in config.default_headers().iter() {
        headers.set_default(name, value);
    }
    let body = codec::encode(
        options.method,
        &mut headers,
        options.body.as_ref(),
        options.json,
        options.form.as_deref(),
    )?;

    Ok(Prepared {
        hop: Hop {
            method: options.method,
            url,
            headers,
            body,
        },
        pool: options.pool,
        json: options.json,
        timeout: options.timeout.or_else(|| config.timeout()),
        retries: options.retries.unwrap_or(config.retries),
        retry_delay: config.retry_delay(),
        follow_redirects: options.follow_redirects,
        max_redirects: options.max_redirects.unwrap_or(config.max_redirects),
        redirect_strip_headers: options.redirect_strip_headers,
        status: StatusPolicy::new(options.validate_status, options.allowed_status_codes),
    })
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}
