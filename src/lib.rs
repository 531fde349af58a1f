//! # Strata
//!
//! An Express-style layered request dispatcher for Rust.
//!
//! ## Features
//!
//! - Ordered middleware and route stacks, first match wins
//! - Path parameters, optional segments and wildcards
//! - Error handlers that only run while an error is pending
//! - Parameter callbacks, memoized per request
//! - Routers and whole applications mountable under a path prefix
//! - Automatic `OPTIONS` answers and a default 404/error page
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use strata::{Application, Response};
//!
//! fn main() {
//!     let mut app = Application::new();
//!
//!     // Add routes
//!     app.get("/", |ctx| async move {
//!         ctx.send(Response::text("Hello, World!"))
//!     });
//!
//!     // Start server
//!     app.listen("127.0.0.1:3000").unwrap();
//! }
//! ```
//!
//! ## Mounting
//!
//! ```rust
//! use strata::{Application, Response, Router};
//!
//! let mut api = Router::new();
//! api.get("/users/:id", |ctx| async move {
//!     let id = ctx.param("id").unwrap_or_default();
//!     ctx.send(Response::text(format!("user {id} under {}", ctx.base_url())))
//! });
//!
//! let mut app = Application::new();
//! app.mount("/api", api);
//! ```

#[macro_use]
mod macros;

pub mod app;
pub mod config;
pub mod context;
pub mod error;
pub mod finalhandler;
pub mod handler;
pub mod http;
pub mod plugins;
pub mod router;
pub extern crate serde_json;

pub use app::Application;
pub use config::{AppConfig, RouterOptions};
pub use context::{Context, Params};
pub use error::{PatternError, ServerError, ServerResult};
pub use handler::{Flow, Handler, HandlerResult};
pub use http::{Method, Request, Response};
pub use plugins::Plugins;
pub use router::{Dispatch, Outcome, Route, Router};

// Reexport serde_json
pub use serde_json::{json, Value};
