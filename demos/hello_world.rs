//! A minimal "Hello, World!" server using strata
//!
//! Responds with "Hello, World!" on `/` and the default 404 page elsewhere.

use strata::{Application, Response};

fn main() {
    tracing_subscriber::fmt::init();

    let mut app = Application::new();

    // Add a route that handles GET requests to "/"
    app.get("/", |ctx| async move { ctx.send(Response::text("Hello, World!")) });

    app.listen("127.0.0.1:3000")
        .expect("Server failed to start");
}
