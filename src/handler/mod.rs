use crate::context::Context;
use crate::error::{ServerError, ServerResult};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// What a handler wants the dispatch loop to do once it returns.
///
/// Returning `Err(e)` instead puts the loop into error mode, where only
/// error handlers are eligible until one of them returns `Ok(Flow::Next)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Continue with the next matching layer.
    Next,
    /// Skip the remaining handlers of the current route.
    SkipRoute,
    /// Leave the current router as if its stack were exhausted.
    SkipRouter,
    /// The chain ends here.
    Done,
}

pub type HandlerResult = ServerResult<Flow>;

pub type HandlerFuture = BoxFuture<'static, HandlerResult>;

pub type ParamFuture = BoxFuture<'static, ServerResult<()>>;

pub trait IntoHandlerFuture {
    fn into_handler_future(self) -> HandlerFuture;
}

impl<F: Future<Output = HandlerResult> + Send + 'static> IntoHandlerFuture for F {
    fn into_handler_future(self) -> HandlerFuture {
        Box::pin(self)
    }
}

/// A request handler: route handlers and middleware alike.
///
/// Closures get this for free; reusable middleware can implement it on a
/// struct and be registered with `Router::middleware`.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, ctx: Context) -> HandlerFuture;
}

impl<F, R> Handler for F
where
    F: Fn(Context) -> R + Send + Sync + 'static,
    R: IntoHandlerFuture,
{
    fn call(&self, ctx: Context) -> HandlerFuture {
        (self)(ctx).into_handler_future()
    }
}

/// A handler that only runs while an error is pending.
pub trait ErrorHandler: Send + Sync + 'static {
    fn call(&self, ctx: Context, err: ServerError) -> HandlerFuture;
}

impl<F, R> ErrorHandler for F
where
    F: Fn(Context, ServerError) -> R + Send + Sync + 'static,
    R: IntoHandlerFuture,
{
    fn call(&self, ctx: Context, err: ServerError) -> HandlerFuture {
        (self)(ctx, err).into_handler_future()
    }
}

/// Callback bound to a named path parameter. Receives the current value and
/// the parameter name; may rewrite the value with `Context::set_param`.
pub trait ParamHandler: Send + Sync + 'static {
    fn call(&self, ctx: Context, value: String, name: String) -> ParamFuture;
}

impl<F, R> ParamHandler for F
where
    F: Fn(Context, String, String) -> R + Send + Sync + 'static,
    R: Future<Output = ServerResult<()>> + Send + 'static,
{
    fn call(&self, ctx: Context, value: String, name: String) -> ParamFuture {
        Box::pin((self)(ctx, value, name))
    }
}

pub type ParamCallback = Arc<dyn ParamHandler>;

/// Rewrites a param callback as it is registered. Returning the callback
/// unchanged passes it through.
pub type ParamHook = Arc<dyn Fn(&str, ParamCallback) -> ParamCallback + Send + Sync>;
