use super::pattern::{PathMatch, Pattern};
use super::route::Route;
use super::{Dispatch, Outcome};
use crate::context::Context;
use crate::error::{ServerError, ServerResult};
use crate::handler::{ErrorHandler, Flow, Handler, HandlerResult};
use crate::http::Method;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::debug;

/// What a layer runs once it matches.
#[derive(Clone)]
pub(crate) enum LayerKind {
    Handler(Arc<dyn Handler>),
    ErrorHandler(Arc<dyn ErrorHandler>),
    Route(Route),
    Mounted(Arc<dyn Dispatch>),
}

/// Result of running one layer, as seen by the loop that owns it.
#[derive(Debug)]
pub(crate) enum Step {
    /// Continue the search, entering or staying in error mode if `Some`.
    Next(Option<ServerError>),
    SkipRoute,
    ExitRouter,
    Completed,
}

impl From<HandlerResult> for Step {
    fn from(result: HandlerResult) -> Self {
        match result {
            Ok(Flow::Next) => Step::Next(None),
            Ok(Flow::SkipRoute) => Step::SkipRoute,
            Ok(Flow::SkipRouter) => Step::ExitRouter,
            Ok(Flow::Done) => Step::Completed,
            Err(err) => Step::Next(Some(err)),
        }
    }
}

#[derive(Clone)]
pub(crate) struct Layer {
    pattern: Pattern,
    kind: LayerKind,
    /// Only set for layers inside a route's stack.
    method: Option<Method>,
}

impl Layer {
    pub(crate) fn new(pattern: Pattern, kind: LayerKind) -> Self {
        Self {
            pattern,
            kind,
            method: None,
        }
    }

    pub(crate) fn for_method(method: Option<Method>, kind: LayerKind) -> Self {
        Self {
            pattern: Pattern::root(),
            kind,
            method,
        }
    }

    pub(crate) fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub(crate) fn kind(&self) -> &LayerKind {
        &self.kind
    }

    pub(crate) fn kind_mut(&mut self) -> &mut LayerKind {
        &mut self.kind
    }

    pub(crate) fn method(&self) -> Option<Method> {
        self.method
    }

    pub(crate) fn handles_errors(&self) -> bool {
        matches!(self.kind, LayerKind::ErrorHandler(_))
    }

    pub(crate) fn is_route(&self) -> bool {
        matches!(self.kind, LayerKind::Route(_))
    }

    pub(crate) fn matches(&self, path: &str) -> ServerResult<Option<PathMatch>> {
        self.pattern.matches(path)
    }

    /// Runs a request handler. Error handlers never run here.
    pub(crate) async fn handle(&self, ctx: &Context) -> Step {
        match &self.kind {
            LayerKind::Handler(handler) => guarded(|| handler.call(ctx.clone())).await.into(),
            LayerKind::ErrorHandler(_) => {
                debug!(pattern = self.pattern.source(), "error handler skipped without a pending error");
                Step::Next(None)
            }
            LayerKind::Route(route) => route.dispatch(ctx).await,
            LayerKind::Mounted(mounted) => {
                match guarded(|| mounted.dispatch(ctx).map(Ok).boxed()).await {
                    Ok(Outcome::Completed) => Step::Completed,
                    Ok(Outcome::Next(err)) => Step::Next(err),
                    Err(err) => Step::Next(Some(err)),
                }
            }
        }
    }

    /// Runs an error handler; every other kind hands `err` back untouched.
    pub(crate) async fn handle_error(&self, ctx: &Context, err: ServerError) -> Step {
        match &self.kind {
            LayerKind::ErrorHandler(handler) => {
                guarded(|| handler.call(ctx.clone(), err)).await.into()
            }
            _ => Step::Next(Some(err)),
        }
    }
}

/// Calls `start` and awaits the future it returns, turning a panic at either
/// point into [`ServerError::PanicError`].
pub(crate) async fn guarded<'a, T>(
    start: impl FnOnce() -> BoxFuture<'a, ServerResult<T>>,
) -> ServerResult<T> {
    let future = match panic::catch_unwind(AssertUnwindSafe(start)) {
        Ok(future) => future,
        Err(payload) => return Err(panic_error(payload)),
    };
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(panic_error(payload)),
    }
}

fn panic_error(payload: Box<dyn Any + Send>) -> ServerError {
    let panic_msg = if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "Unknown panic".to_string()
    };
    ServerError::PanicError(panic_msg)
}
