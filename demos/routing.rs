//! Routing example for strata
//!
//! This example demonstrates:
//! - Path parameters, optional segments and wildcards
//! - Per-method handlers on one route
//! - Parameter callbacks
//! - Routers mounted under a prefix

use serde::{Deserialize, Serialize};
use strata::{json, Application, Response, Router, ServerError};

#[derive(Serialize, Deserialize)]
struct User {
    name: String,
    role: String,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("strata=debug"))
        .init();

    let mut app = Application::new();

    // Basic GET route
    app.get("/", |ctx| async move {
        ctx.send(Response::text("Welcome to the strata demo server!"))
    });

    // Validate :id once per request, before any handler that captures it
    app.param("id", |ctx, value, name| async move {
        match value.parse::<u32>() {
            Ok(id) => {
                ctx.set_data("user_id", id);
                Ok(())
            }
            Err(_) => Err(ServerError::BadRequest(format!("{name} must be numeric"))),
        }
    });

    // One route, several methods
    app.route("/users/:id")
        .get(|ctx| async move {
            let id: u32 = ctx.get_typed_data("user_id").unwrap_or_default();
            ctx.send(Response::text(format!("User ID: {id}")))
        })
        .post(|ctx| async move {
            let user: User = serde_json::from_slice(&ctx.body())
                .map_err(|e| ServerError::BadRequest(format!("Invalid JSON body: {e}")))?;
            ctx.send(Response::created(&user)?)
        });

    // Optional extension: /files/report and /files/report.pdf
    app.get("/files/:name.:ext?", |ctx| async move {
        let name = ctx.param("name").unwrap_or_default();
        let ext = ctx.param("ext").unwrap_or_else(|| "none".to_string());
        ctx.send(Response::text(format!("{name} ({ext})")))
    });

    // Group routes under /api prefix
    let mut api = Router::new();
    api.get("/status", |ctx| async move {
        let body = json!({
            "status": "operational",
            "mounted_at": ctx.base_url(),
        });
        ctx.send(Response::ok(&body)?)
    })
    .get("/docs/*", |ctx| async move {
        let page = ctx.param("0").unwrap_or_default();
        ctx.send(Response::text(format!("docs page: {page}")))
    });

    // Mount the API router to the main server
    app.mount("/api", api);

    app.listen("127.0.0.1:3000")
        .expect("Server failed to start")
}
