use super::layer::{Layer, LayerKind, Step};
use crate::context::Context;
use crate::error::ServerError;
use crate::handler::IntoHandlerFuture;
use crate::http::Method;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Handlers registered for one path, selected by method.
///
/// A route is installed into its router as a single layer; its own stack runs
/// with the same next/error protocol as the router's but only ever sees
/// layers for the request's method (or for every method).
#[derive(Clone)]
pub struct Route {
    path: String,
    stack: Vec<Layer>,
    methods: Vec<Method>,
    all: bool,
}

impl Route {
    pub(crate) fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            stack: Vec::new(),
            methods: Vec::new(),
            all: false,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether a request with `method` has anything to run here.
    /// HEAD is served by GET handlers when no HEAD handler exists.
    pub fn handles_method(&self, method: Method) -> bool {
        if self.all || self.methods.contains(&method) {
            return true;
        }
        method == Method::HEAD && self.methods.contains(&Method::GET)
    }

    /// Explicitly registered methods, in registration order.
    pub fn allowed_methods(&self) -> &[Method] {
        &self.methods
    }

    pub fn method<F, R>(&mut self, method: Method, handler: F) -> &mut Self
    where
        F: Fn(Context) -> R + Send + Sync + 'static,
        R: IntoHandlerFuture,
    {
        if !self.methods.contains(&method) {
            self.methods.push(method);
        }
        self.stack.push(Layer::for_method(
            Some(method),
            LayerKind::Handler(Arc::new(handler)),
        ));
        self
    }

    route_verbs! {
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

    /// Appends a handler that runs for every method.
    pub fn all<F, R>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(Context) -> R + Send + Sync + 'static,
        R: IntoHandlerFuture,
    {
        self.all = true;
        self.stack
            .push(Layer::for_method(None, LayerKind::Handler(Arc::new(handler))));
        self
    }

    /// Appends an error handler scoped to this route's chain.
    pub fn catch<F, R>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(Context, ServerError) -> R + Send + Sync + 'static,
        R: IntoHandlerFuture,
    {
        self.stack.push(Layer::for_method(
            None,
            LayerKind::ErrorHandler(Arc::new(handler)),
        ));
        self
    }

    /// Boxed because a route's layers are dispatched through `Layer::handle`,
    /// which is also what calls into here.
    pub(crate) fn dispatch<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, Step> {
        Box::pin(async move {
            let mut method = ctx.method();
            if method == Method::HEAD && !self.methods.contains(&Method::HEAD) {
                method = Method::GET;
            }

            let mut error: Option<ServerError> = None;
            for layer in &self.stack {
                if ctx.is_finished() {
                    break;
                }
                if layer.method().is_some_and(|m| m != method) {
                    continue;
                }

                let step = match error.take() {
                    Some(err) => layer.handle_error(ctx, err).await,
                    None if layer.handles_errors() => continue,
                    None => layer.handle(ctx).await,
                };

                match step {
                    Step::Next(err) => error = err,
                    Step::SkipRoute => return Step::Next(None),
                    other => return other,
                }
            }

            if error.is_none() && ctx.is_finished() {
                return Step::Completed;
            }
            Step::Next(error)
        })
    }
}
