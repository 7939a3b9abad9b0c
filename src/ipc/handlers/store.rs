use crate::archive;
use crate::ipc::error::{describe, err, fail, ok};
use crate::ipc::types::{AppState, Request};
use crate::store::{read_tree, Full, Write};
use serde_json::json;
use std::path::PathBuf;

fn store_json(store: &dyn Full, conn: Option<&str>) -> serde_json::Value {
    json!({
        "kind": store.kind(),
        "conn": conn,
        "error": describe(store.error()),
    })
}

fn no_store(req: &Request) -> serde_json::Value {
    err(&req.id, "no_store", "no store is open", None)
}

fn handle_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = req
        .params
        .get("conn")
        .and_then(|v| v.as_str())
        .map(str::to_string)
    else {
        return err(&req.id, "bad_params", "missing params.conn", None);
    };
    let Some(store) = state.open_store(&conn) else {
        return err(
            &req.id,
            "no_backend",
            format!("no storage backend for {conn}"),
            None,
        );
    };
    if let Some(e) = store.error() {
        return fail(&req.id, e);
    }
    let body = store_json(store.as_ref(), Some(conn.as_str()));
    ok(&req.id, body)
}

fn handle_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_mut() else {
        return no_store(req);
    };
    let source = req
        .params
        .get("source")
        .and_then(|v| v.as_str())
        .unwrap_or("cache");
    let saved = match source {
        "cache" => {
            let Some(data) = state.cache.as_mut() else {
                return err(&req.id, "no_data", "nothing collected yet", None);
            };
            store.save(data)
        }
        "session" => store.save(&mut state.session),
        other => {
            return err(
                &req.id,
                "bad_params",
                format!("unknown source: {other}"),
                None,
            )
        }
    };
    match saved {
        Ok(()) => ok(&req.id, json!({ "saved": true, "source": source })),
        Err(e) => fail(&req.id, &e),
    }
}

fn handle_load(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_mut() else {
        return no_store(req);
    };
    match read_tree(store.as_mut()) {
        Ok(data) => {
            let counts = json!({
                "students": data.students.len(),
                "courses": data.course_count(),
                "assignments": data.assignment_count(),
            });
            state.cache = Some(data);
            ok(&req.id, json!({ "counts": counts }))
        }
        Err(e) => fail(&req.id, &e),
    }
}

fn handle_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_ref() else {
        return no_store(req);
    };
    ok(&req.id, store_json(store.as_ref(), state.store_conn.as_deref()))
}

fn handle_reset(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_mut() else {
        return no_store(req);
    };
    match store.reset() {
        Ok(()) => ok(
            &req.id,
            store_json(store.as_ref(), state.store_conn.as_deref()),
        ),
        Err(e) => fail(&req.id, &e),
    }
}

/// Archives only apply to the relational backend's database file.
fn sqlite_path(state: &AppState, req: &Request) -> Result<PathBuf, serde_json::Value> {
    match (&state.store, &state.store_conn) {
        (Some(store), Some(conn)) if store.kind() == "sqlite" => Ok(PathBuf::from(conn)),
        (Some(_), _) => Err(err(
            &req.id,
            "unsupported",
            "archives need a sqlite store",
            None,
        )),
        _ => Err(no_store(req)),
    }
}

fn path_param(req: &Request, key: &str) -> Result<PathBuf, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing params.{key}"), None))
}

fn handle_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let db = match sqlite_path(state, req) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let out = match path_param(req, "out") {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    match archive::export_bundle(&db, &out) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "path": out.to_string_lossy(),
                "format": summary.bundle_format,
                "entryCount": summary.entry_count,
                "sha256": summary.sha256,
                "dbBytes": summary.db_bytes,
            }),
        ),
        Err(e) => err(&req.id, "export_failed", format!("{e:#}"), None),
    }
}

fn handle_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let db = match sqlite_path(state, req) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let input = match path_param(req, "in") {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    // Release the file before it is replaced.
    state.store = None;
    let result = archive::import_bundle(&input, &db);
    let conn = db.to_string_lossy().to_string();
    if state.open_store(&conn).is_none() {
        return err(&req.id, "no_backend", format!("no storage backend for {conn}"), None);
    }
    match result {
        Ok(summary) => {
            state.cache = None;
            ok(
                &req.id,
                json!({
                    "formatDetected": summary.bundle_format_detected,
                    "sha256": summary.sha256,
                }),
            )
        }
        Err(e) => err(&req.id, "import_failed", format!("{e:#}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "store.open" => Some(handle_open(state, req)),
        "store.save" => Some(handle_save(state, req)),
        "store.load" => Some(handle_load(state, req)),
        "store.status" => Some(handle_status(state, req)),
        "store.reset" => Some(handle_reset(state, req)),
        "store.export" => Some(handle_export(state, req)),
        "store.import" => Some(handle_import(state, req)),
        _ => None,
    }
}
