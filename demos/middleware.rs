//! Middleware example for strata
//!
//! This example demonstrates:
//! - A struct middleware logging every request
//! - An authentication gate scoped to a mounted router
//! - Error handlers and a custom error responder
//! - A sub-application inheriting plugins from its parent

use strata::handler::HandlerFuture;
use strata::{Application, Context, Flow, Handler, Response, Router, ServerError};
use tracing::info;

// Logs every request and tags the response
struct Logger;

impl Handler for Logger {
    fn call(&self, ctx: Context) -> HandlerFuture {
        Box::pin(async move {
            info!(method = %ctx.method(), path = %ctx.path(), "incoming request");
            ctx.response_mut(|res| {
                res.header("X-Powered-By", "strata");
            });
            Ok(Flow::Next)
        })
    }
}

struct SiteName(&'static str);

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut app = Application::new();
    app.plugins(SiteName("strata demo"));

    // Apply logger middleware globally
    app.middleware(Logger);

    // Public route - no auth required
    app.get("/public", |ctx| async move {
        ctx.send(Response::text("This is a public endpoint"))
    });

    // Protected routes behind a bearer token check
    let mut protected = Router::new();
    protected.use_fn(|ctx| async move {
        match ctx.header("Authorization") {
            Some(token) if token.starts_with("Bearer ") => Ok(Flow::Next),
            _ => Err(ServerError::Unauthorized("Authentication required".to_string())
                .with_header("WWW-Authenticate", "Bearer")),
        }
    });
    protected.get("/profile", |ctx| async move {
        ctx.send(Response::ok(&serde_json::json!({
            "name": "User",
            "email": "user@example.com"
        }))?)
    });
    app.mount("/api", protected);

    // A sub-application; it sees the parent's SiteName plugin once mounted
    let mut blog = Application::new();
    blog.on_mount(|parent, _plugins| {
        info!(parent = parent.mountpath(), "blog mounted");
    })
    .get("/", |ctx| async move {
        let site = ctx.plugins().get::<SiteName>().map(|s| s.0).unwrap_or("unknown");
        ctx.send(Response::html(format!("<h1>{site} blog</h1>")))
    });
    app.mount_app("/blog", blog);

    // Turn unauthorized errors into JSON; everything else falls through
    app.catch(|ctx, err| async move {
        if err.status_code() != 401 {
            return Err(err);
        }
        let mut response = Response::ok(&serde_json::json!({ "error": err.to_string() }))?;
        response.status(401);
        for (name, value) in err.headers() {
            response.header(name, value);
        }
        ctx.send(response)
    });

    app.on_error(|err| {
        let mut response = Response::text(format!("Something went wrong: {err}"));
        response.status(err.status_code());
        response
    });

    app.listen("127.0.0.1:3000")
        .expect("Server failed to start");
}
