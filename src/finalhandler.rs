//! What happens when a request falls off the end of the application's stack.

use crate::context::Context;
use crate::error::ServerError;
use crate::http::Response;
use tracing::{debug, error};

/// Custom rendering for unhandled errors, see `Application::on_error`.
pub type ErrorResponder = dyn Fn(&ServerError) -> Response + Send + Sync;

/// Answers a request nothing else answered.
///
/// Without an error this is a 404 naming the method and URL. With one, the
/// status comes from the error if it declares a 4xx/5xx, then from a pending
/// 4xx/5xx status on the response, else 500. If a response was already
/// finalized the connection is aborted instead.
pub fn finish(ctx: &Context, err: Option<ServerError>, responder: Option<&ErrorResponder>) {
    let Some(err) = err else {
        if ctx.is_finished() {
            debug!("request already answered");
            return;
        }
        let method = ctx.method();
        let url = ctx.original_url();
        debug!(%method, url = %url, "no route matched");
        respond(ctx, document(404, &format!("Cannot {method} {url}")));
        return;
    };

    error!(error = %err, status = err.status_code(), "unhandled error");

    if ctx.is_finished() {
        debug!("cannot render error after the response was sent, aborting");
        ctx.abort();
        return;
    }

    let response = match responder {
        Some(responder) => responder(&err),
        None => error_response(ctx, &err),
    };
    respond(ctx, response);
}

fn respond(ctx: &Context, response: Response) {
    if ctx.send(response).is_err() {
        ctx.abort();
    }
}

fn error_response(ctx: &Context, err: &ServerError) -> Response {
    let declared = err
        .declared_status()
        .filter(|status| (400..600).contains(status));

    let status = declared.unwrap_or_else(|| {
        let pending = ctx.response().status;
        if (400..600).contains(&pending) {
            pending
        } else {
            500
        }
    });

    let mut response = document(status, Response::reason_phrase(status));
    if declared.is_some() {
        for (name, value) in err.headers() {
            response.header(name, value);
        }
    }
    response
}

/// Minimal HTML page with `message` escaped into a `<pre>` block.
fn document(status: u16, message: &str) -> Response {
    let body = format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<title>Error</title>\n</head>\n<body>\n<pre>{}</pre>\n</body>\n</html>\n",
        escape_html(message)
            .replace('\n', "<br>")
            .replace("  ", " &nbsp;")
    );

    let mut response = Response::html(&body);
    response
        .status(status)
        .header("Content-Security-Policy", "default-src 'none'")
        .header("X-Content-Type-Options", "nosniff")
        .header("Content-Length", body.len().to_string());
    response
}

fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
