use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use futures::future::BoxFuture;
use strata::{
    Application, Context, Dispatch, Flow, Method, Outcome, Request, Response, Router,
    RouterOptions, ServerError,
};

async fn call(app: &Application, method: Method, url: &str) -> Context {
    app.handle_request(Request::new(method, url)).await
}

fn observe(ctx: &Context, key: &str) {
    ctx.set_data(
        key,
        serde_json::json!({
            "path": ctx.path(),
            "base_url": ctx.base_url(),
            "original_url": ctx.original_url(),
        }),
    );
}

fn observed(ctx: &Context, key: &str, field: &str) -> String {
    ctx.get_data(key)
        .and_then(|value| value[field].as_str().map(str::to_string))
        .unwrap_or_default()
}

#[tokio::test]
async fn nested_mounts_strip_and_restore_prefixes() {
    let mut inner = Router::new();
    inner.get("/x", |ctx| async move {
        observe(&ctx, "inner");
        Ok(Flow::Next)
    });

    let mut middle = Router::new();
    middle.mount("/a", inner).use_fn(|ctx| async move {
        observe(&ctx, "middle");
        Ok(Flow::Next)
    });

    let mut app = Application::new();
    app.mount("/b", middle).use_fn(|ctx| async move {
        observe(&ctx, "outer");
        ctx.send(Response::text("done"))
    });

    let ctx = call(&app, Method::GET, "/b/a/x").await;

    assert_eq!(observed(&ctx, "inner", "path"), "/x");
    assert_eq!(observed(&ctx, "inner", "base_url"), "/b/a");
    assert_eq!(observed(&ctx, "inner", "original_url"), "/b/a/x");

    assert_eq!(observed(&ctx, "middle", "path"), "/a/x");
    assert_eq!(observed(&ctx, "middle", "base_url"), "/b");

    assert_eq!(observed(&ctx, "outer", "path"), "/b/a/x");
    assert_eq!(observed(&ctx, "outer", "base_url"), "");
    assert_eq!(ctx.response().body, "done");
}

#[tokio::test]
async fn mount_point_itself_is_seen_as_root() {
    let mut api = Router::new();
    api.get("/", |ctx| async move {
        let seen = format!("{} {}", ctx.path(), ctx.base_url());
        ctx.send(Response::text(seen))
    });

    let mut app = Application::new();
    app.mount("/api", api);

    assert_eq!(call(&app, Method::GET, "/api").await.response().body, "/ /api");
    assert_eq!(call(&app, Method::GET, "/api/").await.response().body, "/ /api");
    assert_eq!(call(&app, Method::GET, "/apix").await.response().status, 404);
}

#[tokio::test]
async fn mounts_only_match_on_segment_boundaries() {
    let mut app = Application::new();
    app.use_at("/admin", |ctx| async move { ctx.send(Response::text("admin")) });

    assert_eq!(call(&app, Method::GET, "/admin/users").await.response().body, "admin");
    assert_eq!(call(&app, Method::GET, "/ADMIN").await.response().body, "admin");
    assert_eq!(call(&app, Method::GET, "/administrator").await.response().status, 404);
}

#[tokio::test]
async fn errors_in_mounted_routers_reach_the_parent() {
    let mut api = Router::new();
    api.get("/fail", |_ctx| async move { Err(ServerError::Conflict("dup".into())) });

    let mut app = Application::new();
    app.mount("/api", api).catch(|ctx, err| async move {
        let body = format!("{} at {}", err, ctx.path());
        let mut response = Response::text(body);
        response.status(err.status_code());
        ctx.send(response)
    });

    let response = call(&app, Method::GET, "/api/fail").await.response();
    assert_eq!(response.status, 409);
    assert_eq!(response.body, "Conflict: dup at /api/fail");
}

#[tokio::test]
async fn unmatched_mount_falls_through() {
    let mut api = Router::new();
    api.get("/users", |ctx| async move { ctx.send(Response::text("users")) });

    let mut app = Application::new();
    app.mount("/api", api)
        .get("/api/health", |ctx| async move { ctx.send(Response::text("ok")) });

    assert_eq!(call(&app, Method::GET, "/api/health").await.response().body, "ok");
}

#[tokio::test]
async fn skip_router_returns_to_parent() {
    let mut gated = Router::new();
    gated
        .use_fn(|ctx| async move {
            if ctx.header("x-beta").is_some() {
                Ok(Flow::Next)
            } else {
                Ok(Flow::SkipRouter)
            }
        })
        .get("/feature", |ctx| async move { ctx.send(Response::text("beta")) });

    let mut app = Application::new();
    app.mount("/", gated)
        .get("/feature", |ctx| async move { ctx.send(Response::text("stable")) });

    let stable = call(&app, Method::GET, "/feature").await;
    assert_eq!(stable.response().body, "stable");

    let beta = app
        .handle_request(Request::new(Method::GET, "/feature").with_header("X-Beta", "1"))
        .await;
    assert_eq!(beta.response().body, "beta");
}

#[tokio::test]
async fn merge_params_exposes_parent_params() {
    let handler = |ctx: Context| async move {
        let user = ctx.param("user").unwrap_or_else(|| "-".to_string());
        let post = ctx.param("post").unwrap_or_default();
        ctx.send(Response::text(format!("{user}/{post}")))
    };

    let mut merged = Router::with_options(RouterOptions {
        merge_params: true,
        ..Default::default()
    });
    merged.get("/posts/:post", handler);

    let mut isolated = Router::new();
    isolated.get("/posts/:post", handler);

    let mut app = Application::new();
    app.mount("/merged/:user", merged)
        .mount("/isolated/:user", isolated);

    let body = call(&app, Method::GET, "/merged/ada/posts/7").await.response().body;
    assert_eq!(body, "ada/7");

    let body = call(&app, Method::GET, "/isolated/ada/posts/7").await.response().body;
    assert_eq!(body, "-/7");
}

#[tokio::test]
async fn options_are_collected_inside_mounts() {
    let mut api = Router::new();
    api.get("/items", |ctx| async move { ctx.send(Response::text("list")) })
        .delete("/items", |ctx| async move { ctx.send(Response::no_content()) });

    let mut app = Application::new();
    app.mount("/api", api);

    let response = call(&app, Method::OPTIONS, "/api/items").await.response();
    assert_eq!(response.get_header("Allow"), Some("GET, DELETE"));
}

struct Greeter(&'static str);
struct Mailer;

#[tokio::test]
async fn mounted_apps_inherit_plugins_once() {
    let fired = Arc::new(AtomicUsize::new(0));

    let mut admin = Application::new();
    let counter = Arc::clone(&fired);
    admin
        .plugins(Greeter("admin"))
        .on_mount(move |parent, plugins| {
            counter.fetch_add(1, Ordering::SeqCst);
            assert_eq!(parent.mountpath(), "/");
            assert!(plugins.contains::<Mailer>());
        })
        .get("/hello", |ctx| async move {
            let plugins = ctx.plugins();
            let greeting = plugins.get::<Greeter>().map(|g| g.0).unwrap_or("none");
            let mailer = plugins.contains::<Mailer>();
            ctx.send(Response::text(format!("{greeting} {mailer} {}", ctx.base_url())))
        });

    let mut app = Application::new();
    app.plugins(Greeter("root")).plugins(Mailer);
    app.mount_app("/admin", admin);

    assert_eq!(fired.load(Ordering::SeqCst), 1);

    let response = call(&app, Method::GET, "/admin/hello").await.response();
    assert_eq!(response.body, "admin true /admin");

    call(&app, Method::GET, "/admin/hello").await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn mounted_app_errors_use_the_parent_terminal_handler() {
    let mut child = Application::new();
    child
        .get("/fail", |_ctx| async move { Err(ServerError::TooManyRequests) })
        .on_error(|_err| Response::text("child responder"));

    let mut app = Application::new();
    app.mount_app("/child", child)
        .on_error(|err| {
            let mut response = Response::text("parent responder");
            response.status(err.status_code());
            response
        });

    let response = call(&app, Method::GET, "/child/fail").await.response();
    assert_eq!(response.status, 429);
    assert_eq!(response.body, "parent responder");
}

struct Exploding;

impl Dispatch for Exploding {
    fn dispatch<'a>(&'a self, _ctx: &'a Context) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            if true {
                panic!("mounted target exploded");
            }
            Outcome::Completed
        })
    }
}

#[tokio::test]
async fn panicking_mount_enters_error_mode_with_path_restored() {
    let mut app = Application::new();
    app.mount("/boom", Exploding).catch(|ctx, err| async move {
        let kind = match err {
            ServerError::PanicError(message) => message,
            other => other.to_string(),
        };
        let body = format!("{kind} at {} base '{}'", ctx.path(), ctx.base_url());
        ctx.send(Response::text(body))
    });

    let response = call(&app, Method::GET, "/boom/inner").await.response();
    assert_eq!(response.body, "mounted target exploded at /boom/inner base ''");
}
