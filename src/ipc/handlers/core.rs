use crate::config::PortalConfig;
use crate::ipc::error::{describe, err, ok};
use crate::ipc::types::{AppState, Request};
use crate::store::Full;
use serde_json::json;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "session": state.session.state().as_str(),
            "sessionError": describe(state.session.error()),
            "configured": state.session.config().is_configured(),
            "store": state.store.as_ref().map(|s| s.kind()),
            "storeConn": state.store_conn,
            "cached": state.cache.is_some(),
        }),
    )
}

fn handle_configure(state: &mut AppState, req: &Request) -> serde_json::Value {
    let params = match &req.params {
        serde_json::Value::Null => json!({}),
        v => v.clone(),
    };
    let patch: PortalConfig = match serde_json::from_value(params) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", e.to_string(), None),
    };
    let mut config = state.session.config().clone();
    config.merge(patch);
    state.session.reconfigure(config);
    let config = state.session.config();
    ok(
        &req.id,
        json!({
            "baseUrl": config.base(),
            "username": config.username,
            "logBodies": config.log_bodies,
            "configured": config.is_configured(),
        }),
    )
}

fn handle_reset(state: &mut AppState, req: &Request) -> serde_json::Value {
    state.session.reset();
    ok(&req.id, json!({ "session": state.session.state().as_str() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "session.configure" => Some(handle_configure(state, req)),
        "session.reset" => Some(handle_reset(state, req)),
        _ => None,
    }
}
