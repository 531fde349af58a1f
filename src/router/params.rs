use super::layer::guarded;
use crate::context::{Context, Params};
use crate::error::{ServerError, ServerResult};
use crate::handler::{ParamCallback, ParamHandler};
use std::collections::HashMap;
use tracing::debug;

/// What happened the last time a parameter's callbacks ran in this dispatch.
#[derive(Debug, Clone)]
pub(crate) struct ParamMemo {
    matched: String,
    value: String,
    error: Option<ServerError>,
}

pub(crate) type ParamMemos = HashMap<String, ParamMemo>;

/// Runs the registered callbacks for each of `keys` present in the context's
/// params, left to right.
///
/// A name whose value was already processed with the same raw value (or
/// whose callbacks failed) is not re-run: the stored value is restored and
/// the stored error replayed.
pub(crate) async fn process_params(
    callbacks: &HashMap<String, Vec<ParamCallback>>,
    keys: &[String],
    called: &mut ParamMemos,
    ctx: &Context,
) -> ServerResult<()> {
    if callbacks.is_empty() {
        return Ok(());
    }

    for key in keys {
        let Some(fns) = callbacks.get(key) else {
            continue;
        };
        let Some(value) = ctx.param(key) else {
            continue;
        };

        if let Some(memo) = called.get(key) {
            if memo.matched == value || memo.error.is_some() {
                debug!(param = %key, value = %value, "reusing param callback result");
                ctx.set_param(key, memo.value.clone());
                if let Some(err) = &memo.error {
                    return Err(err.clone());
                }
                continue;
            }
        }

        let mut memo = ParamMemo {
            matched: value.clone(),
            value,
            error: None,
        };
        for callback in fns {
            let current = memo.value.clone();
            let result = guarded(|| callback.call(ctx.clone(), current, key.clone())).await;
            memo.value = ctx.param(key).unwrap_or_default();
            if let Err(err) = result {
                memo.error = Some(err);
                break;
            }
            if ctx.is_finished() {
                break;
            }
        }

        let failed = memo.error.clone();
        called.insert(key.clone(), memo);
        if let Some(err) = failed {
            return Err(err);
        }
        if ctx.is_finished() {
            return Ok(());
        }
    }

    Ok(())
}

/// Combines a mounted router's params with its parent's. The child's keys
/// win; when both sides carry positional wildcard keys the child's are
/// shifted past the parent's so neither is lost.
pub(crate) fn merge_params(params: Params, parent: &Params) -> Params {
    let mut merged = parent.clone();
    if !params.contains_key("0") || !parent.contains_key("0") {
        merged.extend(params);
        return merged;
    }

    let positional = |p: &Params| {
        (0usize..)
            .take_while(|i| p.contains_key(&i.to_string()))
            .count()
    };
    let offset = positional(parent);
    let mut params = params;
    for i in (0..positional(&params)).rev() {
        if let Some(value) = params.remove(&i.to_string()) {
            params.insert((i + offset).to_string(), value);
        }
    }

    merged.extend(params);
    merged
}
