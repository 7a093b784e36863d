//! HTTP front for the pickup desk.
//!
//! Every route is translated into an IPC [`Request`] and dispatched through
//! the same router the stdin sidecar uses. GET routes answer the handler
//! result as JSON; POST routes answer `303 See Other` and carry the handler
//! messages to the next page in a flash cookie.

use crate::config::HttpConfig;
use crate::db;
use crate::ipc::{self, AppState, Request};
use anyhow::anyhow;
use serde_json::{json, Value};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use tiny_http::{Header, Method, Response, Server};
use url::form_urlencoded;

pub const FLASH_COOKIE: &str = "retiros_flash";
const MAX_BODY_BYTES: u64 = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Post,
}

impl Verb {
    fn as_str(self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub verb: Verb,
    pub method: &'static str,
    pub params: Value,
}

/// Maps a request path (without query string) to the IPC method serving it.
pub fn resolve(path: &str) -> Option<Route> {
    fn id(raw: &str) -> Option<i64> {
        raw.parse().ok()
    }

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let (verb, method, params) = match segments.as_slice() {
        [] => (Verb::Get, "roles.home", json!({})),
        ["porteria"] => (Verb::Get, "porteria.levels", json!({})),
        ["nivel", level] => (Verb::Get, "porteria.grades", json!({ "levelId": id(level)? })),
        ["grado", grade] => (Verb::Get, "porteria.students", json!({ "gradeId": id(grade)? })),
        ["retiro", student] => (
            Verb::Post,
            "retiros.create",
            json!({ "studentId": id(student)? }),
        ),
        ["retiros", "masivos"] => (Verb::Post, "retiros.createBulk", json!({})),
        ["docente"] => (Verb::Get, "docente.grades", json!({})),
        ["docente", grade] => (Verb::Get, "docente.pending", json!({ "gradeId": id(grade)? })),
        ["docente", grade, "cantidad"] => (
            Verb::Get,
            "docente.pendingCount",
            json!({ "gradeId": id(grade)? }),
        ),
        ["docente", grade, "lista"] => (
            Verb::Get,
            "docente.pendingList",
            json!({ "gradeId": id(grade)? }),
        ),
        ["entregar", request] => (
            Verb::Post,
            "retiros.deliver",
            json!({ "requestId": id(request)? }),
        ),
        ["buscar"] => (Verb::Get, "students.search", json!({})),
        _ => return None,
    };
    Some(Route {
        verb,
        method,
        params,
    })
}

/// The parts of an HTTP request the translation layer looks at.
#[derive(Debug, Clone)]
pub struct Incoming {
    pub verb: Verb,
    pub url: String,
    pub content_type: Option<String>,
    pub referer: Option<String>,
    pub cookie: Option<String>,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub status: u16,
    pub location: Option<String>,
    pub set_cookie: Option<String>,
    pub body: Option<Value>,
}

impl Outgoing {
    fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            location: None,
            set_cookie: None,
            body: Some(body),
        }
    }

    fn redirect(location: String, messages: &[Value]) -> Self {
        Self {
            status: 303,
            location: Some(location),
            set_cookie: (!messages.is_empty()).then(|| flash_cookie(messages)),
            body: None,
        }
    }
}

pub fn status_for_code(code: &str) -> u16 {
    match code {
        "not_found" => 404,
        "bad_params" => 400,
        _ => 500,
    }
}

fn flash_cookie(messages: &[Value]) -> String {
    let payload = Value::Array(messages.to_vec()).to_string();
    let encoded: String = form_urlencoded::byte_serialize(payload.as_bytes()).collect();
    format!("{FLASH_COOKIE}={encoded}; Path=/; HttpOnly; SameSite=Lax")
}

fn clear_flash_cookie() -> String {
    format!("{FLASH_COOKIE}=; Path=/; Max-Age=0")
}

/// Messages stored in the flash cookie, if any.
pub fn read_flash(cookie_header: &str) -> Option<Vec<Value>> {
    cookie_header
        .split(';')
        .flat_map(|piece| form_urlencoded::parse(piece.trim().as_bytes()))
        .find(|(k, _)| k == FLASH_COOKIE)
        .and_then(|(_, v)| serde_json::from_str::<Vec<Value>>(&v).ok())
        .filter(|m| !m.is_empty())
}

fn query_params(query: &str) -> Value {
    let mut params = serde_json::Map::new();
    for (k, v) in form_urlencoded::parse(query.as_bytes()) {
        params.insert(k.into_owned(), Value::String(v.into_owned()));
    }
    Value::Object(params)
}

fn is_json(content_type: Option<&str>) -> bool {
    content_type
        .map(|ct| ct.trim_start().starts_with("application/json"))
        .unwrap_or(false)
}

/// Folds the request body into the params of a POST route.
fn body_params(route: &mut Route, incoming: &Incoming) -> Result<(), String> {
    let json_body = is_json(incoming.content_type.as_deref());
    match route.method {
        "retiros.createBulk" => {
            let ids: Vec<Value> = if json_body {
                let parsed: Value = serde_json::from_str(&incoming.body)
                    .map_err(|e| format!("invalid JSON body: {e}"))?;
                match parsed.get("alumnos") {
                    None | Some(Value::Null) => Vec::new(),
                    Some(Value::Array(items)) => items.clone(),
                    Some(_) => return Err("alumnos must be an array".to_string()),
                }
            } else {
                form_urlencoded::parse(incoming.body.as_bytes())
                    .filter(|(k, _)| k == "alumnos")
                    .map(|(_, v)| Value::String(v.into_owned()))
                    .collect()
            };
            route.params["studentIds"] = Value::Array(ids);
        }
        "retiros.create" => {
            let note = if json_body {
                serde_json::from_str::<Value>(&incoming.body)
                    .ok()
                    .and_then(|v| v.get("observacion").and_then(|n| n.as_str()).map(String::from))
            } else {
                form_urlencoded::parse(incoming.body.as_bytes())
                    .find(|(k, _)| k == "observacion")
                    .map(|(_, v)| v.into_owned())
            };
            if let Some(note) = note {
                route.params["note"] = Value::String(note);
            }
        }
        _ => {}
    }
    Ok(())
}

/// Translates one HTTP request into an IPC call and its response back.
pub fn handle(state: &mut AppState, incoming: &Incoming) -> Outgoing {
    let (path, query) = match incoming.url.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (incoming.url.as_str(), None),
    };
    let Some(mut route) = resolve(path) else {
        return Outgoing::json(404, json!({ "code": "not_found", "message": "no such page" }));
    };
    if route.verb != incoming.verb {
        return Outgoing::json(
            405,
            json!({ "code": "method_not_allowed", "message": format!("use {}", route.verb.as_str()) }),
        );
    }

    if let (Some(q), Value::Object(params)) = (query, &mut route.params) {
        if let Value::Object(extra) = query_params(q) {
            for (k, v) in extra {
                params.entry(k).or_insert(v);
            }
        }
    }
    if route.verb == Verb::Post {
        if let Err(message) = body_params(&mut route, incoming) {
            return Outgoing::json(400, json!({ "code": "bad_params", "message": message }));
        }
    }

    let req = Request::new(uuid::Uuid::new_v4().to_string(), route.method, route.params);
    let resp = ipc::handle_request(state, req);
    let ok = resp.get("ok").and_then(|v| v.as_bool()) == Some(true);

    match route.verb {
        Verb::Get => {
            if !ok {
                return error_response(&resp);
            }
            let mut result = resp.get("result").cloned().unwrap_or_else(|| json!({}));
            let flash = incoming.cookie.as_deref().and_then(read_flash);
            let mut out = Outgoing::json(200, json!({}));
            if let Some(messages) = flash {
                result["messages"] = Value::Array(messages);
                out.set_cookie = Some(clear_flash_cookie());
            }
            out.body = Some(result);
            out
        }
        Verb::Post => {
            let back = incoming.referer.clone().unwrap_or_else(|| "/".to_string());
            if ok {
                let result = resp.get("result").cloned().unwrap_or_else(|| json!({}));
                let location = result
                    .get("redirect")
                    .and_then(|v| v.as_str())
                    .map(String::from)
                    .unwrap_or(back);
                let messages = result
                    .get("messages")
                    .and_then(|v| v.as_array())
                    .cloned()
                    .unwrap_or_default();
                return Outgoing::redirect(location, &messages);
            }
            if error_code(&resp) == Some("already_delivered") {
                let warning = ipc::helpers::message("warning", "Este retiro ya fue entregado.");
                return Outgoing::redirect(back, &[warning]);
            }
            error_response(&resp)
        }
    }
}

fn error_code(resp: &Value) -> Option<&str> {
    resp.get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

fn error_response(resp: &Value) -> Outgoing {
    let status = status_for_code(error_code(resp).unwrap_or("internal"));
    let body = resp.get("error").cloned().unwrap_or_else(|| json!({}));
    Outgoing::json(status, body)
}

#[derive(Debug, thiserror::Error)]
pub enum BodyError {
    #[error("request body exceeds {} bytes", MAX_BODY_BYTES)]
    TooLarge,

    #[error("failed to read request body: {0}")]
    Unreadable(#[from] std::io::Error),

    #[error("request body is not valid UTF-8")]
    NotUtf8,
}

impl BodyError {
    fn status(&self) -> u16 {
        match self {
            Self::TooLarge => 413,
            Self::Unreadable(_) | Self::NotUtf8 => 400,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::TooLarge => "payload_too_large",
            Self::Unreadable(_) | Self::NotUtf8 => "bad_request",
        }
    }
}

/// Reads a whole request body, refusing anything over `MAX_BODY_BYTES`
/// rather than handing a truncated form to the router.
pub fn read_body(reader: impl Read, declared: Option<usize>) -> Result<String, BodyError> {
    if declared.is_some_and(|n| n as u64 > MAX_BODY_BYTES) {
        return Err(BodyError::TooLarge);
    }
    let mut bytes = Vec::new();
    reader.take(MAX_BODY_BYTES + 1).read_to_end(&mut bytes)?;
    if bytes.len() as u64 > MAX_BODY_BYTES {
        return Err(BodyError::TooLarge);
    }
    String::from_utf8(bytes).map_err(|_| BodyError::NotUtf8)
}

fn header_value(rq: &tiny_http::Request, name: &'static str) -> Option<String> {
    rq.headers()
        .iter()
        .find(|h| h.field.equiv(name))
        .map(|h| h.value.as_str().to_string())
}

fn header(name: &str, value: &str) -> Option<Header> {
    Header::from_bytes(name.as_bytes(), value.as_bytes()).ok()
}

fn serve_one(state: &mut AppState, mut rq: tiny_http::Request) {
    let verb = match rq.method() {
        Method::Get | Method::Head => Some(Verb::Get),
        Method::Post => Some(Verb::Post),
        _ => None,
    };
    let Some(verb) = verb else {
        tracing::info!(method = %rq.method(), url = %rq.url(), status = 405, "http request");
        let _ = rq.respond(Response::from_string("method not allowed").with_status_code(405));
        return;
    };

    let mut body = String::new();
    if verb == Verb::Post {
        let declared = rq.body_length();
        match read_body(rq.as_reader(), declared) {
            Ok(text) => body = text,
            Err(e) => {
                let status = e.status();
                tracing::info!(url = %rq.url(), status, error = %e, "http request rejected");
                let payload = json!({ "code": e.code(), "message": e.to_string() }).to_string();
                let mut response = Response::from_data(payload.into_bytes()).with_status_code(status);
                if let Some(h) = header("Content-Type", "application/json; charset=utf-8") {
                    response.add_header(h);
                }
                let _ = rq.respond(response);
                return;
            }
        }
    }

    let incoming = Incoming {
        verb,
        url: rq.url().to_string(),
        content_type: header_value(&rq, "Content-Type"),
        referer: header_value(&rq, "Referer"),
        cookie: header_value(&rq, "Cookie"),
        body,
    };
    let out = handle(state, &incoming);
    tracing::info!(
        method = verb.as_str(),
        url = %incoming.url,
        status = out.status,
        "http request"
    );

    let payload = out
        .body
        .as_ref()
        .map(|b| b.to_string().into_bytes())
        .unwrap_or_default();
    let mut response = Response::from_data(payload).with_status_code(out.status);
    if out.body.is_some() {
        if let Some(h) = header("Content-Type", "application/json; charset=utf-8") {
            response.add_header(h);
        }
    }
    if let Some(h) = out.location.as_deref().and_then(|l| header("Location", l)) {
        response.add_header(h);
    }
    if let Some(h) = out.set_cookie.as_deref().and_then(|c| header("Set-Cookie", c)) {
        response.add_header(h);
    }
    if let Err(e) = rq.respond(response) {
        tracing::warn!(error = %e, "failed to write response");
    }
}

fn worker(server: &Server, mut state: AppState) {
    loop {
        match server.recv() {
            Ok(rq) => serve_one(&mut state, rq),
            Err(e) => {
                tracing::error!(error = %e, "http accept failed");
                break;
            }
        }
    }
}

/// Binds `http.bind` and serves until the listener fails.
pub fn serve(workspace: &Path, http: &HttpConfig) -> anyhow::Result<()> {
    let server = Server::http(http.bind.as_str())
        .map_err(|e| anyhow!("failed to bind {}: {}", http.bind, e))?;
    let server = Arc::new(server);
    tracing::info!(bind = %http.bind, workers = http.workers, "http server listening");

    let mut handles = Vec::with_capacity(http.workers);
    for n in 0..http.workers {
        let state = AppState {
            workspace: Some(workspace.to_path_buf()),
            db: Some(db::open_db(workspace)?),
        };
        let server = Arc::clone(&server);
        let handle = thread::Builder::new()
            .name(format!("http-worker-{n}"))
            .spawn(move || worker(&server, state))?;
        handles.push(handle);
    }
    for handle in handles {
        if handle.join().is_err() {
            tracing::error!("http worker panicked");
        }
    }
    Ok(())
}
