//! Per-request state shared by every layer of one dispatch.
//!
//! A [`Context`] is a cheap handle; cloning it gives another view of the same
//! request. The router rewrites `path`/`base_url` while a mounted layer runs
//! and puts them back afterwards, so handlers always see paths relative to
//! where they were mounted.

use crate::error::ServerError;
use crate::handler::{Flow, HandlerResult};
use crate::http::{Method, Request, Response};
use crate::plugins::Plugins;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Captured path parameters, keyed by name (wildcards use `"0"`, `"1"`, ...).
pub type Params = HashMap<String, String>;

#[derive(Debug)]
struct ContextInner {
    request: Arc<Request>,
    path: String,
    base_url: String,
    params: Params,
    state: HashMap<String, Value>,
    response: Response,
    finished: bool,
    aborted: bool,
    plugins: Plugins,
}

#[derive(Debug, Clone)]
pub struct Context {
    inner: Arc<Mutex<ContextInner>>,
}

impl Context {
    pub fn new(request: Request) -> Self {
        let path = request.path.clone();
        Self {
            inner: Arc::new(Mutex::new(ContextInner {
                request: Arc::new(request),
                path,
                base_url: String::new(),
                params: Params::new(),
                state: HashMap::new(),
                response: Response::new(200),
                finished: false,
                aborted: false,
                plugins: Plugins::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ContextInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn method(&self) -> Method {
        self.lock().request.method
    }

    /// Path relative to the current mount point.
    pub fn path(&self) -> String {
        self.lock().path.clone()
    }

    /// Relative path plus the query string, if any.
    pub fn url(&self) -> String {
        let inner = self.lock();
        match &inner.request.query {
            Some(query) => format!("{}?{}", inner.path, query),
            None => inner.path.clone(),
        }
    }

    pub fn original_url(&self) -> String {
        self.lock().request.url.clone()
    }

    /// The portion of the path consumed by the mount points above the
    /// current layer, without a trailing slash.
    pub fn base_url(&self) -> String {
        self.lock().base_url.clone()
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.lock().request.get_header(name).map(str::to_string)
    }

    pub fn body(&self) -> Vec<u8> {
        self.lock().request.body.clone()
    }

    /// Runs `f` against the request. The context is not locked while `f`
    /// runs, so it may call back into `self`.
    pub fn with_request<R>(&self, f: impl FnOnce(&Request) -> R) -> R {
        let request = Arc::clone(&self.lock().request);
        f(&request)
    }

    pub fn param(&self, name: &str) -> Option<String> {
        self.lock().params.get(name).cloned()
    }

    pub fn params(&self) -> Params {
        self.lock().params.clone()
    }

    pub fn set_param(&self, name: &str, value: impl Into<String>) {
        self.lock().params.insert(name.to_string(), value.into());
    }

    pub fn get_data(&self, key: &str) -> Option<Value> {
        self.lock().state.get(key).cloned()
    }

    pub fn set_data<T>(&self, key: &str, value: T)
    where
        T: Serialize,
    {
        if let Ok(value) = serde_json::to_value(value) {
            self.lock().state.insert(key.to_string(), value);
        }
    }

    pub fn get_typed_data<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        self.get_data(key)
            .and_then(|value| serde_json::from_value(value).ok())
    }

    pub fn plugins(&self) -> Plugins {
        self.lock().plugins.clone()
    }

    /// Mutates the pending response (status, headers) without finalizing it.
    ///
    /// `f` works on a copy, written back afterwards, so it may read the
    /// context. A response sent from inside `f` wins over the copy.
    pub fn response_mut<R>(&self, f: impl FnOnce(&mut Response) -> R) -> R {
        let (mut response, was_finished) = {
            let inner = self.lock();
            (inner.response.clone(), inner.finished)
        };
        let result = f(&mut response);

        let mut inner = self.lock();
        if was_finished || !inner.finished {
            inner.response = response;
        }
        result
    }

    pub fn response(&self) -> Response {
        self.lock().response.clone()
    }

    /// Finalizes `response` as the answer to this request and ends the chain.
    ///
    /// Headers already set on the pending response are kept unless
    /// `response` sets them too.
    pub fn send(&self, response: Response) -> HandlerResult {
        let mut inner = self.lock();
        if inner.finished {
            return Err(ServerError::HeadersSent);
        }
        let mut headers = std::mem::take(&mut inner.response.headers);
        headers.retain(|name, _| {
            !response
                .headers
                .keys()
                .any(|key| key.eq_ignore_ascii_case(name))
        });
        headers.extend(response.headers);
        inner.response = Response {
            status: response.status,
            body: response.body,
            headers,
        };
        inner.finished = true;
        Ok(Flow::Done)
    }

    /// True once a response has been finalized or the connection dropped.
    pub fn is_finished(&self) -> bool {
        let inner = self.lock();
        inner.finished || inner.aborted
    }

    /// Marks the connection for termination without writing anything more.
    pub fn abort(&self) {
        self.lock().aborted = true;
    }

    pub fn is_aborted(&self) -> bool {
        self.lock().aborted
    }

    pub(crate) fn set_plugins(&self, plugins: Plugins) -> Plugins {
        std::mem::replace(&mut self.lock().plugins, plugins)
    }

    pub(crate) fn replace_params(&self, params: Params) -> Params {
        std::mem::replace(&mut self.lock().params, params)
    }

    /// Current `(path, base_url)`, used to put a mount rewrite back.
    pub(crate) fn location(&self) -> (String, String) {
        let inner = self.lock();
        (inner.path.clone(), inner.base_url.clone())
    }

    pub(crate) fn set_location(&self, path: String, base_url: String) {
        let mut inner = self.lock();
        inner.path = path;
        inner.base_url = base_url;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_send_is_rejected() {
        let ctx = Context::new(Request::new(Method::GET, "/"));
        ctx.response_mut(|res| {
            res.header("X-Request-Id", "abc");
        });
        assert_eq!(ctx.send(Response::text("first")).unwrap(), Flow::Done);
        assert!(matches!(
            ctx.send(Response::text("second")),
            Err(ServerError::HeadersSent)
        ));
        let response = ctx.response();
        assert_eq!(response.body, "first");
        assert_eq!(response.get_header("x-request-id"), Some("abc"));
        assert!(ctx.is_finished());
    }

    #[test]
    fn typed_state_round_trips() {
        let ctx = Context::new(Request::new(Method::GET, "/"));
        ctx.set_data("user", vec!["ada", "grace"]);
        let users: Option<Vec<String>> = ctx.get_typed_data("user");
        assert_eq!(users, Some(vec!["ada".to_string(), "grace".to_string()]));
        assert_eq!(ctx.get_typed_data::<u32>("missing"), None);
    }

    #[test]
    fn url_keeps_query_after_rewrite() {
        let ctx = Context::new(Request::new(Method::GET, "/api/users?page=2"));
        ctx.set_location("/users".into(), "/api".into());
        assert_eq!(ctx.url(), "/users?page=2");
        assert_eq!(ctx.original_url(), "/api/users?page=2");
        assert_eq!(ctx.base_url(), "/api");
    }

    #[test]
    fn closures_may_read_the_context() {
        let ctx = Context::new(Request::new(Method::GET, "/items/7"));
        ctx.set_param("id", "7");

        ctx.response_mut(|res| {
            res.header("X-Id", ctx.param("id").unwrap_or_default());
        });
        let seen = ctx.with_request(|req| format!("{} {}", req.path, ctx.path()));

        assert_eq!(ctx.response().get_header("x-id"), Some("7"));
        assert_eq!(seen, "/items/7 /items/7");
    }

    #[test]
    fn send_inside_response_mut_is_kept() {
        let ctx = Context::new(Request::new(Method::GET, "/"));
        ctx.response_mut(|res| {
            res.header("X-Late", "1");
            let _ = ctx.send(Response::text("sent"));
        });
        let response = ctx.response();
        assert_eq!(response.body, "sent");
        assert!(!response.has_header("X-Late"));
    }

    #[test]
    fn sent_headers_replace_pending_ones_ignoring_case() {
        let ctx = Context::new(Request::new(Method::GET, "/"));
        ctx.response_mut(|res| {
            res.headers.insert("content-type".into(), "text/html".into());
            res.header("X-Kept", "yes");
        });
        ctx.send(Response::text("plain")).unwrap();

        let response = ctx.response();
        let content_types = response
            .headers
            .keys()
            .filter(|name| name.eq_ignore_ascii_case("content-type"))
            .count();
        assert_eq!(content_types, 1);
        assert_eq!(
            response.get_header("Content-Type"),
            Some("text/plain; charset=utf-8")
        );
        assert_eq!(response.get_header("x-kept"), Some("yes"));
    }
}
