//! Layered request dispatch.
//!
//! A [`Router`] is an ordered stack of layers. Each request walks the stack
//! once, front to back: the first layer whose pattern matches the remaining
//! path (and whose kind fits the current mode) runs, then the walk continues
//! or stops depending on the [`Flow`](crate::handler::Flow) it returns. An
//! error switches the walk into error mode, where only error handlers are
//! eligible until one of them recovers.

mod layer;
mod params;
mod pattern;
mod route;

pub use pattern::{PathMatch, Pattern, PatternOptions};
pub use route::Route;

use crate::config::RouterOptions;
use crate::context::{Context, Params};
use crate::error::{PatternError, ServerError};
use crate::handler::{ErrorHandler, Handler, IntoHandlerFuture, ParamCallback, ParamHook};
use crate::http::{Method, Response};
use futures::future::BoxFuture;
use layer::{Layer, LayerKind, Step};
use params::{merge_params, process_params, ParamMemos};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, trace};

/// How a dispatch through a router (or a mounted application) ended.
#[derive(Debug)]
pub enum Outcome {
    /// A response was produced or the connection was dropped.
    Completed,
    /// Nothing answered; the caller continues, in error mode if `Some`.
    Next(Option<ServerError>),
}

/// Anything that can sit behind a mount point.
pub trait Dispatch: Send + Sync + 'static {
    fn dispatch<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, Outcome>;
}

/// Scratch state for one walk of one router's stack.
struct DispatchState {
    error: Option<ServerError>,
    allowed: Vec<Method>,
    called: ParamMemos,
}

#[derive(Clone, Default)]
pub struct Router {
    options: RouterOptions,
    stack: Vec<Layer>,
    params: HashMap<String, Vec<ParamCallback>>,
    param_hooks: Vec<ParamHook>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: RouterOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    fn compile(&self, path: &str, end: bool) -> Result<Pattern, PatternError> {
        Pattern::compile(
            path,
            PatternOptions {
                end,
                strict: self.options.strict,
                case_sensitive: self.options.case_sensitive,
            },
        )
    }

    fn push(&mut self, path: &str, kind: LayerKind) -> Result<&mut Self, PatternError> {
        let pattern = self.compile(path, false)?;
        self.stack.push(Layer::new(pattern, kind));
        Ok(self)
    }

    /// Adds a route for `path` and returns it for method registration.
    pub fn try_route(&mut self, path: &str) -> Result<&mut Route, PatternError> {
        let pattern = self.compile(path, true)?;
        self.stack
            .push(Layer::new(pattern, LayerKind::Route(Route::new(path))));
        match self.stack.last_mut().map(Layer::kind_mut) {
            Some(LayerKind::Route(route)) => Ok(route),
            _ => unreachable!("a route layer was just pushed"),
        }
    }

    /// Like [`Router::try_route`], panicking on an invalid pattern.
    pub fn route(&mut self, path: &str) -> &mut Route {
        registered(self.try_route(path))
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

    /// Registers a handler for `path` that runs for every method.
    pub fn all<F, R>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(Context) -> R + Send + Sync + 'static,
        R: IntoHandlerFuture,
    {
        self.route(path).all(handler);
        self
    }

    /// Adds middleware that runs for every path.
    pub fn use_fn<F, R>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(Context) -> R + Send + Sync + 'static,
        R: IntoHandlerFuture,
    {
        self.use_at("/", handler)
    }

    /// Adds middleware for `path` and everything below it.
    pub fn use_at<F, R>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(Context) -> R + Send + Sync + 'static,
        R: IntoHandlerFuture,
    {
        registered(self.try_use_at(path, handler))
    }

    pub fn try_use_at<F, R>(&mut self, path: &str, handler: F) -> Result<&mut Self, PatternError>
    where
        F: Fn(Context) -> R + Send + Sync + 'static,
        R: IntoHandlerFuture,
    {
        self.push(path, LayerKind::Handler(Arc::new(handler)))
    }

    /// Adds a [`Handler`] implementor as middleware for every path.
    pub fn middleware<M: Handler>(&mut self, middleware: M) -> &mut Self {
        self.middleware_at("/", middleware)
    }

    pub fn middleware_at<M: Handler>(&mut self, path: &str, middleware: M) -> &mut Self {
        registered(self.push(path, LayerKind::Handler(Arc::new(middleware))))
    }

    /// Adds an error handler for every path.
    pub fn catch<F, R>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(Context, ServerError) -> R + Send + Sync + 'static,
        R: IntoHandlerFuture,
    {
        self.catch_at("/", handler)
    }

    pub fn catch_at<F, R>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(Context, ServerError) -> R + Send + Sync + 'static,
        R: IntoHandlerFuture,
    {
        let handler: Arc<dyn ErrorHandler> = Arc::new(handler);
        registered(self.push(path, LayerKind::ErrorHandler(handler)))
    }

    /// Mounts a router or application under `path`. Inside it, layers see
    /// paths with `path` stripped and `Context::base_url` extended by it.
    pub fn mount<D: Dispatch>(&mut self, path: &str, target: D) -> &mut Self {
        registered(self.try_mount(path, target))
    }

    pub fn try_mount<D: Dispatch>(&mut self, path: &str, target: D) -> Result<&mut Self, PatternError> {
        self.push(path, LayerKind::Mounted(Arc::new(target)))
    }

    /// Registers a callback for the `:name` parameter. It runs before any
    /// matched layer that captures the parameter, once per distinct value.
    pub fn param<F, R>(&mut self, name: &str, callback: F) -> &mut Self
    where
        F: Fn(Context, String, String) -> R + Send + Sync + 'static,
        R: Future<Output = crate::error::ServerResult<()>> + Send + 'static,
    {
        let name = name.trim_start_matches(':');
        let mut callback: ParamCallback = Arc::new(callback);
        for hook in &self.param_hooks {
            callback = hook(name, callback);
        }
        self.params
            .entry(name.to_string())
            .or_default()
            .push(callback);
        self
    }

    /// Installs a hook that may wrap or replace every param callback
    /// registered after it.
    pub fn param_hook<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&str, ParamCallback) -> ParamCallback + Send + Sync + 'static,
    {
        self.param_hooks.push(Arc::new(hook));
        self
    }

    /// Walks the stack for `ctx`.
    ///
    /// The context's params are restored to what they were on entry before
    /// this returns, whatever the outcome.
    pub async fn handle(&self, ctx: &Context) -> Outcome {
        let parent_params = ctx.params();
        let mut state = DispatchState {
            error: None,
            allowed: Vec::new(),
            called: ParamMemos::new(),
        };

        let outcome = self.run(ctx, &parent_params, &mut state).await;
        ctx.replace_params(parent_params);
        outcome
    }

    async fn run(&self, ctx: &Context, parent_params: &Params, state: &mut DispatchState) -> Outcome {
        let method = ctx.method();

        for layer in &self.stack {
            if ctx.is_finished() {
                break;
            }

            let path = ctx.path();
            let matched = match layer.matches(&path) {
                Ok(Some(matched)) => matched,
                Ok(None) => continue,
                Err(err) => {
                    state.error.get_or_insert(err);
                    continue;
                }
            };

            match layer.kind() {
                LayerKind::Route(route) => {
                    if state.error.is_some() {
                        continue;
                    }
                    if !route.handles_method(method) {
                        if method == Method::OPTIONS {
                            for allowed in route.allowed_methods() {
                                if !state.allowed.contains(allowed) {
                                    state.allowed.push(*allowed);
                                }
                            }
                        }
                        if method != Method::HEAD {
                            continue;
                        }
                    }
                }
                LayerKind::ErrorHandler(_) if state.error.is_none() => continue,
                LayerKind::Handler(_) | LayerKind::Mounted(_) if state.error.is_some() => continue,
                _ => {}
            }

            trace!(pattern = layer.pattern().source(), path = %path, "layer matched");

            let params = if self.options.merge_params {
                merge_params(matched.params, parent_params)
            } else {
                matched.params
            };
            ctx.replace_params(params);

            if let Err(err) =
                process_params(&self.params, layer.pattern().keys(), &mut state.called, ctx).await
            {
                state.error.get_or_insert(err);
                continue;
            }
            if ctx.is_finished() {
                return Outcome::Completed;
            }

            let step = if layer.is_route() {
                layer.handle(ctx).await
            } else {
                self.enter(layer, &matched.path, ctx, state.error.take()).await
            };

            match step {
                Step::Completed => return Outcome::Completed,
                Step::ExitRouter => {
                    state.error = None;
                    break;
                }
                Step::Next(err) => state.error = err,
                Step::SkipRoute => state.error = None,
            }
        }

        if state.error.is_none() {
            if ctx.is_finished() {
                return Outcome::Completed;
            }
            if method == Method::OPTIONS && !state.allowed.is_empty() {
                return self.send_allow(ctx, &state.allowed);
            }
        }
        Outcome::Next(state.error.take())
    }

    /// Runs a non-route layer with `removed` stripped from the path, putting
    /// the path and base URL back afterwards.
    async fn enter(
        &self,
        layer: &Layer,
        removed: &str,
        ctx: &Context,
        error: Option<ServerError>,
    ) -> Step {
        let (path, base_url) = ctx.location();

        if !removed.is_empty() {
            let rest = path.get(removed.len()..).unwrap_or_default();
            let rest = if rest.starts_with('/') {
                rest.to_string()
            } else {
                format!("/{rest}")
            };
            let base = format!("{}{}", base_url, removed.strip_suffix('/').unwrap_or(removed));
            debug!(from = %path, to = %rest, base_url = %base, "entering mount point");
            ctx.set_location(rest, base);
        }

        let step = match error {
            Some(err) => layer.handle_error(ctx, err).await,
            None => layer.handle(ctx).await,
        };

        ctx.set_location(path, base_url);
        step
    }

    fn send_allow(&self, ctx: &Context, allowed: &[Method]) -> Outcome {
        let allow = allowed
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        debug!(allow = %allow, "answering OPTIONS from registered routes");

        let mut response = Response::text(&allow);
        response.header("Allow", &allow);
        match ctx.send(response) {
            Ok(_) => Outcome::Completed,
            Err(err) => Outcome::Next(Some(err)),
        }
    }
}

impl Dispatch for Router {
    fn dispatch<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, Outcome> {
        Box::pin(self.handle(ctx))
    }
}

fn registered<T>(result: Result<T, PatternError>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => panic!("invalid route pattern: {err}"),
    }
}
