//! Middleware composition for layered clients.
//!
//! A middleware sees the normalized `RequestOptions` before the request is
//! prepared and decides how to continue: usually by adjusting the options
//! and calling `next.run(options)`.

use std::rc::Rc;

use crate::client::Curly;
use crate::http::Headers;
use crate::options::RequestOptions;
use crate::request::Request;

pub trait Middleware {
    fn handle(&self, options: RequestOptions, next: Next<'_>) -> Request;
}

impl<F> Middleware for F
where
    F: Fn(RequestOptions, Next<'_>) -> Request,
{
    fn handle(&self, options: RequestOptions, next: Next<'_>) -> Request {
        self(options, next)
    }
}

/// The rest of the chain, ending in the client's sender.
pub struct Next<'a> {
    client: &'a Curly,
    rest: &'a [Rc<dyn Middleware>],
}

impl<'a> Next<'a> {
    pub(crate) fn new(client: &'a Curly, rest: &'a [Rc<dyn Middleware>]) -> Self {
        Self { client, rest }
    }

    pub fn run(self, options: RequestOptions) -> Request {
        match self.rest.split_first() {
            Some((middleware, rest)) => middleware.handle(options, Next::new(self.client, rest)),
            None => self.client.send(options),
        }
    }
}

/// Resolve relative targets against a base URL.
#[derive(Debug, Clone)]
pub struct BaseUrl(String);

pub fn base_url(base: impl Into<String>) -> BaseUrl {
    BaseUrl(base.into().trim_end_matches('/').to_string())
}

impl Middleware for BaseUrl {
    fn handle(&self, mut options: RequestOptions, next: Next<'_>) -> Request {
        if !options.url.contains("://") {
            options.url = format!("{}/{}", self.0, options.url.trim_start_matches('/'));
        }
        next.run(options)
    }
}

/// Add query parameters the call did not set.
#[derive(Debug, Clone)]
pub struct DefaultQuery(Vec<(String, String)>);

pub fn default_query<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> DefaultQuery
where
    K: Into<String>,
    V: Into<String>,
{
    DefaultQuery(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
}

impl Middleware for DefaultQuery {
    fn handle(&self, mut options: RequestOptions, next: Next<'_>) -> Request {
        for (key, value) in &self.0 {
            if !options.query.iter().any(|(k, _)| k == key) {
                options.query.push((key.clone(), value.clone()));
            }
        }
        next.run(options)
    }
}

/// Add headers the call did not set.
#[derive(Debug, Clone)]
pub struct DefaultHeaders(Headers);

pub fn default_headers(headers: Headers) -> DefaultHeaders {
    DefaultHeaders(headers)
}

impl Middleware for DefaultHeaders {
    fn handle(&self, mut options: RequestOptions, next: Next<'_>) -> Request {
        for (name, value) in self.0.iter() {
            options.headers.set_default(name, value);
        }
        next.run(options)
    }
}
