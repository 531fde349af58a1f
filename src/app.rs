//! Application is the main entry point for a strata service.
//!
//! An [`Application`] owns a root [`Router`], the plugins it hands to every
//! request, and the terminal handler that answers whatever the router leaves
//! unanswered. Applications can be mounted inside each other; the child
//! inherits the parent's plugins at mount time.
//!
//! # Examples
//!
//! ```rust,no_run
//! use strata::{Application, Response};
//!
//! let mut app = Application::new();
//! app.get("/", |ctx| async move { ctx.send(Response::text("Hello!")) });
//! app.listen("127.0.0.1:3000").unwrap();
//! ```

use crate::config::AppConfig;
use crate::context::Context;
use crate::error::{PatternError, ServerError, ServerResult};
use crate::finalhandler::{self, ErrorResponder};
use crate::handler::{Handler, IntoHandlerFuture, ParamCallback};
use crate::http::{Method, Request, Response};
use crate::plugins::Plugins;
use crate::router::{Dispatch, Outcome, Route, Router};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::io::{self, ErrorKind};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::runtime::Runtime;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, info, warn};

type MountListener = Arc<dyn Fn(&Application, &mut Plugins) + Send + Sync>;

/// The main application struct that represents your web server.
///
/// # Example
///
/// ```rust,no_run
/// use strata::{Application, Flow, Response};
///
/// let mut app = Application::new();
///
/// app.use_fn(|ctx| async move {
///     ctx.response_mut(|res| {
///         res.header("X-Powered-By", "strata");
///     });
///     Ok(Flow::Next)
/// });
/// app.get("/users/:id", |ctx| async move {
///     let id = ctx.param("id").unwrap_or_default();
///     ctx.send(Response::text(id))
/// });
///
/// app.listen("127.0.0.1:3000").unwrap();
/// ```
#[derive(Clone)]
pub struct Application {
    config: AppConfig,
    router: Router,
    plugins: Plugins,
    on_error: Option<Arc<ErrorResponder>>,
    mountpath: String,
    mount_listeners: Vec<MountListener>,
}

impl Default for Application {
    fn default() -> Self {
        Self::new()
    }
}

impl Application {
    pub fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    pub fn with_config(config: AppConfig) -> Self {
        Self {
            router: Router::with_options(config.router),
            config,
            plugins: Plugins::new(),
            on_error: None,
            mountpath: "/".to_string(),
            mount_listeners: Vec::new(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn max_connections(&mut self, max_connections: usize) -> &mut Self {
        self.config.max_connections = max_connections;
        self
    }

    pub fn keep_alive(&mut self, keep_alive: Duration) -> &mut Self {
        self.config.keep_alive_secs = keep_alive.as_secs();
        self
    }

    /// Registers a shared capability, available to handlers through
    /// `Context::plugins`.
    pub fn plugins<T>(&mut self, plugin: T) -> &mut Self
    where
        T: Send + Sync + 'static,
    {
        self.plugins.insert(plugin);
        self
    }

    pub fn get_plugins(&self) -> &Plugins {
        &self.plugins
    }

    /// Replaces the default error page for unhandled errors.
    pub fn on_error<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&ServerError) -> Response + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(handler));
        self
    }

    /// Runs `listener` each time this application is mounted with
    /// [`Application::mount_app`]. It receives the parent and this
    /// application's plugins, after inheritance.
    pub fn on_mount<F>(&mut self, listener: F) -> &mut Self
    where
        F: Fn(&Application, &mut Plugins) + Send + Sync + 'static,
    {
        self.mount_listeners.push(Arc::new(listener));
        self
    }

    /// Where this application was last mounted; `/` for a root application.
    pub fn mountpath(&self) -> &str {
        &self.mountpath
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn route(&mut self, path: &str) -> &mut Route {
        self.router.route(path)
    }

    pub fn try_route(&mut self, path: &str) -> Result<&mut Route, PatternError> {
        self.router.try_route(path)
    }

    path_verbs! {
        get => GET,
        post => POST,
        put => PUT,
        patch => PATCH,
        delete => DELETE,
        head => HEAD,
        options => OPTIONS,
        trace => TRACE,
        connect => CONNECT,
    }

    pub fn all<F, R>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(Context) -> R + Send + Sync + 'static,
        R: IntoHandlerFuture,
    {
        self.router.all(path, handler);
        self
    }

    pub fn use_fn<F, R>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(Context) -> R + Send + Sync + 'static,
        R: IntoHandlerFuture,
    {
        self.router.use_fn(handler);
        self
    }

    pub fn use_at<F, R>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(Context) -> R + Send + Sync + 'static,
        R: IntoHandlerFuture,
    {
        self.router.use_at(path, handler);
        self
    }

    /// Adds a middleware to the application
    pub fn middleware<M: Handler>(&mut self, middleware: M) -> &mut Self {
        self.router.middleware(middleware);
        self
    }

    pub fn middleware_at<M: Handler>(&mut self, path: &str, middleware: M) -> &mut Self {
        self.router.middleware_at(path, middleware);
        self
    }

    pub fn catch<F, R>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(Context, ServerError) -> R + Send + Sync + 'static,
        R: IntoHandlerFuture,
    {
        self.router.catch(handler);
        self
    }

    pub fn catch_at<F, R>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(Context, ServerError) -> R + Send + Sync + 'static,
        R: IntoHandlerFuture,
    {
        self.router.catch_at(path, handler);
        self
    }

    /// Mounts a router at a specific path
    pub fn mount<D: Dispatch>(&mut self, path: &str, target: D) -> &mut Self {
        self.router.mount(path, target);
        self
    }

    /// Mounts a whole application at `path`.
    ///
    /// The child records `path` as its mount path, copies every plugin it
    /// does not already have from this application, and runs its mount
    /// listeners once. While a request is inside the child, handlers see the
    /// child's plugins; the parent's are back in place when it returns.
    pub fn mount_app(&mut self, path: &str, mut app: Application) -> &mut Self {
        app.mountpath = path.to_string();
        app.plugins.inherit(&self.plugins);

        let listeners = std::mem::take(&mut app.mount_listeners);
        for listener in &listeners {
            listener(self, &mut app.plugins);
        }
        app.mount_listeners = listeners;

        debug!(path, plugins = app.plugins.len(), "mounted application");
        self.router.mount(path, app);
        self
    }

    pub fn param<F, R>(&mut self, name: &str, callback: F) -> &mut Self
    where
        F: Fn(Context, String, String) -> R + Send + Sync + 'static,
        R: Future<Output = ServerResult<()>> + Send + 'static,
    {
        self.router.param(name, callback);
        self
    }

    pub fn param_hook<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&str, ParamCallback) -> ParamCallback + Send + Sync + 'static,
    {
        self.router.param_hook(hook);
        self
    }

    /// Dispatches `ctx` through the application and answers it with the
    /// terminal handler if nothing else did.
    pub async fn handle(&self, ctx: &Context) {
        ctx.set_plugins(self.plugins.clone());
        if let Outcome::Next(err) = self.router.handle(ctx).await {
            finalhandler::finish(ctx, err, self.on_error.as_deref());
        }
    }

    /// Builds a context for `request`, handles it and returns the context
    /// holding the final response.
    pub async fn handle_request(&self, request: Request) -> Context {
        let ctx = Context::new(request);
        self.handle(&ctx).await;
        ctx
    }

    /// Starts the HTTP server
    ///
    /// # Arguments
    /// * `addr` - Address to listen on (e.g. "127.0.0.1:3000")
    pub fn listen(self, addr: &str) -> Result<(), Box<dyn std::error::Error>> {
        let runtime = Runtime::new()?;
        runtime.block_on(self.serve(addr))?;
        Ok(())
    }

    /// Accepts connections on `addr` until the listener fails, serving at
    /// most `max_connections` of them at a time.
    pub async fn serve(self, addr: &str) -> io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!(
            addr,
            max_connections = self.config.max_connections,
            "server running on http://{}",
            addr
        );

        let permits = Arc::new(Semaphore::new(self.config.max_connections.max(1)));
        let app = Arc::new(self);

        loop {
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                return Ok(());
            };

            match listener.accept().await {
                Ok((stream, peer)) => {
                    let app = Arc::clone(&app);
                    tokio::spawn(async move {
                        if let Err(err) = app.handle_connection(stream).await {
                            warn!(%peer, error = %err, "connection error");
                        }
                        drop(permit);
                    });
                }
                Err(err) => warn!(error = %err, "connection failed"),
            }
        }
    }

    async fn handle_connection<S>(&self, stream: S) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);

        loop {
            let read = read_request(&mut reader, &self.config);
            let raw = match timeout(self.config.keep_alive(), read).await {
                Ok(Ok(Some(raw))) => raw,
                Ok(Ok(None)) => return Ok(()),
                Ok(Err(ReadError::Io(err))) => return Err(err),
                Ok(Err(err)) => {
                    debug!(error = %err, "rejecting request");
                    write_response(&mut writer, &status_response(err.status()), false, true).await?;
                    return Ok(());
                }
                Err(_) => {
                    debug!("keep-alive timeout");
                    return Ok(());
                }
            };

            let close = raw.wants_close();
            let Some(method) = Method::parse(&raw.method) else {
                debug!(method = %raw.method, "unsupported method");
                write_response(&mut writer, &status_response(501), false, true).await?;
                return Ok(());
            };

            let mut request = Request::new(method, &raw.target);
            request.headers = raw.headers;
            request.body = raw.body;

            let ctx = self.handle_request(request).await;
            if ctx.is_aborted() {
                debug!("dropping connection after aborted response");
                return Ok(());
            }

            write_response(&mut writer, &ctx.response(), method == Method::HEAD, close).await?;
            if close {
                return Ok(());
            }
        }
    }
}

impl Dispatch for Application {
    fn dispatch<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let parent = ctx.set_plugins(self.plugins.clone());
            let outcome = self.router.handle(ctx).await;
            ctx.set_plugins(parent);
            outcome
        })
    }
}

struct RawRequest {
    method: String,
    target: String,
    version: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl RawRequest {
    fn wants_close(&self) -> bool {
        match self.headers.get("connection") {
            Some(value) if value.eq_ignore_ascii_case("close") => true,
            Some(value) if value.eq_ignore_ascii_case("keep-alive") => false,
            _ => self.version == "HTTP/1.0",
        }
    }
}

/// Why a request could not be read off the connection.
#[derive(Debug, Error)]
enum ReadError {
    #[error("malformed request: {0}")]
    Malformed(&'static str),
    #[error("request exceeds limits, answering {0}")]
    TooLarge(u16),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ReadError {
    fn status(&self) -> u16 {
        match self {
            ReadError::TooLarge(status) => *status,
            _ => 400,
        }
    }
}

/// Reads one `\n`-terminated line of at most `limit` bytes; `None` on a
/// clean EOF. An overlong line fails with `too_long` before more is read.
async fn read_bounded_line<R>(
    reader: &mut BufReader<R>,
    limit: usize,
    too_long: u16,
) -> Result<Option<String>, ReadError>
where
    R: AsyncRead + Unpin,
{
    let mut line = String::new();
    let read = match (&mut *reader).take(limit as u64).read_line(&mut line).await {
        Ok(read) => read,
        Err(err) if err.kind() == ErrorKind::InvalidData => {
            return Err(ReadError::Malformed("line is not valid UTF-8"))
        }
        Err(err) => return Err(err.into()),
    };
    if read == 0 {
        return Ok(None);
    }
    if !line.ends_with('\n') {
        if read >= limit {
            return Err(ReadError::TooLarge(too_long));
        }
        return Err(ReadError::Malformed("connection closed mid-line"));
    }
    Ok(Some(line))
}

/// Reads one request off the connection; `None` on a clean EOF.
async fn read_request<R>(
    reader: &mut BufReader<R>,
    config: &AppConfig,
) -> Result<Option<RawRequest>, ReadError>
where
    R: AsyncRead + Unpin,
{
    let Some(request_line) = read_bounded_line(reader, config.max_header_size, 414).await? else {
        return Ok(None);
    };

    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or(ReadError::Malformed("invalid request line"))?;
    let target = parts.next().ok_or(ReadError::Malformed("invalid request line"))?;
    let version = parts.next().unwrap_or("HTTP/1.1");

    let mut headers = HashMap::new();
    loop {
        let Some(line) = read_bounded_line(reader, config.max_header_size, 431).await? else {
            return Err(ReadError::Malformed("connection closed inside headers"));
        };
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if headers.len() >= config.max_headers {
            return Err(ReadError::TooLarge(431));
        }
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_lowercase(), value.trim().to_string());
        }
    }

    let mut body = Vec::new();
    if let Some(length) = headers.get("content-length") {
        let length: usize = length
            .parse()
            .map_err(|_| ReadError::Malformed("invalid Content-Length"))?;
        if length > config.max_body_size {
            return Err(ReadError::TooLarge(413));
        }
        body.reserve_exact(length);
        (&mut *reader).take(length as u64).read_to_end(&mut body).await?;
        if body.len() < length {
            return Err(ReadError::Malformed("body shorter than Content-Length"));
        }
    }

    Ok(Some(RawRequest {
        method: method.to_string(),
        target: target.to_string(),
        version: version.to_string(),
        headers,
        body,
    }))
}

fn status_response(status: u16) -> Response {
    let mut response = Response::text(Response::reason_phrase(status));
    response.status(status);
    response
}

async fn write_response<W>(writer: &mut W, response: &Response, head: bool, close: bool) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut head_text = format!(
        "HTTP/1.1 {} {}\r\n",
        response.status,
        Response::reason_phrase(response.status)
    );
    for (name, value) in &response.headers {
        if name.eq_ignore_ascii_case("connection") {
            continue;
        }
        head_text += &format!("{name}: {value}\r\n");
    }
    if !response.has_header("Date") {
        head_text += &format!("Date: {}\r\n", httpdate::fmt_http_date(SystemTime::now()));
    }
    if !response.has_header("Content-Length") {
        head_text += &format!("Content-Length: {}\r\n", response.body.len());
    }
    if close {
        head_text += "Connection: close\r\n";
    }
    head_text += "\r\n";

    writer.write_all(head_text.as_bytes()).await?;
    if !head {
        writer.write_all(response.body.as_bytes()).await?;
    }
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Flow;
    use tokio::io::duplex;

    fn app() -> Application {
        app_with(AppConfig::default())
    }

    fn app_with(config: AppConfig) -> Application {
        let mut app = Application::with_config(config);
        app.get("/hello", |ctx| async move { ctx.send(Response::text("hi")) })
            .post("/echo", |ctx| async move {
                let body = String::from_utf8_lossy(&ctx.body()).to_string();
                ctx.send(Response::text(body))
            });
        app
    }

    async fn exchange(app: Application, raw: &str) -> String {
        let (mut client, server) = duplex(4096);
        let task = tokio::spawn(async move { app.handle_connection(server).await });
        client.write_all(raw.as_bytes()).await.unwrap();
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        task.await.unwrap().unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn serves_over_a_stream() {
        let out = exchange(app(), "GET /hello HTTP/1.1\r\nConnection: close\r\n\r\n").await;
        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(out.contains("Content-Length: 2\r\n"));
        assert!(out.contains("Date: "));
        assert!(out.ends_with("\r\n\r\nhi"));
    }

    #[tokio::test]
    async fn reads_bodies_and_keeps_alive() {
        let raw = "POST /echo HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello\
                   GET /hello HTTP/1.0\r\n\r\n";
        let out = exchange(app(), raw).await;
        assert_eq!(out.matches("HTTP/1.1 200 OK").count(), 2);
        assert!(out.contains("hello"));
    }

    #[tokio::test]
    async fn head_omits_body() {
        let out = exchange(app(), "HEAD /hello HTTP/1.0\r\n\r\n").await;
        assert!(out.contains("Content-Length: 2\r\n"));
        assert!(out.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn unknown_method_is_not_implemented() {
        let out = exchange(app(), "BREW /pot HTTP/1.1\r\n\r\n").await;
        assert!(out.starts_with("HTTP/1.1 501 Not Implemented\r\n"));
    }

    #[tokio::test]
    async fn oversized_body_is_rejected_before_reading() {
        let raw = "POST /echo HTTP/1.1\r\nContent-Length: 4000000000000\r\n\r\nx";
        let out = exchange(app(), raw).await;
        assert!(out.starts_with("HTTP/1.1 413 "), "{out}");
        assert!(out.contains("Connection: close\r\n"));
    }

    #[tokio::test]
    async fn body_limit_is_inclusive() {
        let config = AppConfig {
            max_body_size: 5,
            ..AppConfig::default()
        };
        let ok = exchange(
            app_with(config.clone()),
            "POST /echo HTTP/1.0\r\nContent-Length: 5\r\n\r\nhello",
        )
        .await;
        assert!(ok.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(ok.ends_with("hello"));

        let too_big = exchange(
            app_with(config),
            "POST /echo HTTP/1.0\r\nContent-Length: 6\r\n\r\nhello!",
        )
        .await;
        assert!(too_big.starts_with("HTTP/1.1 413 "));
    }

    #[tokio::test]
    async fn overlong_lines_are_rejected() {
        let config = AppConfig {
            max_header_size: 64,
            ..AppConfig::default()
        };

        let long_target = format!("GET /{} HTTP/1.1\r\n\r\n", "a".repeat(200));
        let out = exchange(app_with(config.clone()), &long_target).await;
        assert!(out.starts_with("HTTP/1.1 414 "), "{out}");

        let long_header = format!("GET /hello HTTP/1.1\r\nX-Pad: {}\r\n\r\n", "b".repeat(200));
        let out = exchange(app_with(config), &long_header).await;
        assert!(out.starts_with("HTTP/1.1 431 "), "{out}");
    }

    #[tokio::test]
    async fn too_many_headers_are_rejected() {
        let config = AppConfig {
            max_headers: 2,
            ..AppConfig::default()
        };
        let raw = "GET /hello HTTP/1.1\r\nA: 1\r\nB: 2\r\nC: 3\r\n\r\n";
        let out = exchange(app_with(config), raw).await;
        assert!(out.starts_with("HTTP/1.1 431 "));
    }

    #[tokio::test]
    async fn truncated_body_is_a_bad_request() {
        let (mut client, server) = duplex(4096);
        let task = tokio::spawn(async move { app().handle_connection(server).await });
        client
            .write_all(b"POST /echo HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc")
            .await
            .unwrap();
        client.shutdown().await.unwrap();
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        task.await.unwrap().unwrap();
        assert!(String::from_utf8(out).unwrap().starts_with("HTTP/1.1 400 "));
    }

    #[tokio::test]
    async fn mounted_app_swaps_plugins() {
        struct Theme(&'static str);

        let mut child = Application::new();
        child.plugins(Theme("child")).get("/theme", |ctx| async move {
            let theme = ctx.plugins().get::<Theme>().map(|t| t.0).unwrap_or("none");
            ctx.set_data("theme", theme);
            Ok(Flow::Next)
        });

        let mut parent = Application::new();
        parent.plugins(Theme("parent")).mount_app("/admin", child).use_fn(|ctx| async move {
            let theme = ctx.plugins().get::<Theme>().map(|t| t.0).unwrap_or("none");
            ctx.send(Response::text(theme))
        });

        let ctx = parent
            .handle_request(Request::new(Method::GET, "/admin/theme"))
            .await;
        assert_eq!(ctx.get_typed_data::<String>("theme").as_deref(), Some("child"));
        assert_eq!(ctx.response().body, "parent");
    }
}
