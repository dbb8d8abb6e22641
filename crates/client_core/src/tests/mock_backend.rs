//! In-process stand-in for the hosted backend: a tiny PostgREST-like table store,
//! password auth and object storage, all behind one axum router.

use std::{collections::HashMap, sync::Arc};

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::Mutex};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RecordedRequest {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    }
}

#[derive(Clone)]
pub(crate) struct MockState {
    pub requests: Arc<Mutex<Vec<RecordedRequest>>>,
    pub tables: Arc<Mutex<HashMap<String, Vec<Value>>>>,
    /// email -> (password, user id)
    pub users: Arc<Mutex<HashMap<String, (String, String)>>>,
    /// Status and body returned by the next message insert instead of storing it.
    pub next_insert_failure: Arc<Mutex<Option<(u16, String)>>>,
    pub signup_returns_session: bool,
    next_id: Arc<Mutex<i64>>,
}

impl MockState {
    pub fn new() -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            tables: Arc::new(Mutex::new(HashMap::new())),
            users: Arc::new(Mutex::new(HashMap::new())),
            next_insert_failure: Arc::new(Mutex::new(None)),
            signup_returns_session: true,
            next_id: Arc::new(Mutex::new(42)),
        }
    }

    pub async fn seed(&self, table: &str, row: Value) {
        self.tables
            .lock()
            .await
            .entry(table.to_string())
            .or_default()
            .push(row);
    }

    pub async fn rows(&self, table: &str) -> Vec<Value> {
        self.tables
            .lock()
            .await
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn add_user(&self, email: &str, password: &str) -> String {
        let id = Uuid::new_v4().to_string();
        self.users
            .lock()
            .await
            .insert(email.to_string(), (password.to_string(), id.clone()));
        id
    }

    pub async fn requests_to(&self, method: Method, path: &str) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .await
            .iter()
            .filter(|request| request.method == method && request.path == path)
            .cloned()
            .collect()
    }
}

pub(crate) async fn spawn_mock_backend(state: MockState) -> anyhow::Result<String> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = Router::new().fallback(handle).with_state(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}"))
}

async fn handle(
    State(state): State<MockState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let query: HashMap<String, String> = uri
        .query()
        .map(|raw| {
            url::form_urlencoded::parse(raw.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default();
    let path = uri.path().to_string();
    state.requests.lock().await.push(RecordedRequest {
        method: method.clone(),
        path: path.clone(),
        query: query.clone(),
        headers: headers.clone(),
        body: body.clone(),
    });

    if let Some(table) = path.strip_prefix("/rest/v1/") {
        let prefer = headers
            .get("prefer")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        return table_request(&state, &method, table, &query, &prefer, &body).await;
    }
    if let Some(object) = path.strip_prefix("/storage/v1/object/") {
        return (StatusCode::OK, Json(json!({ "Key": object }))).into_response();
    }
    match path.as_str() {
        "/auth/v1/token" => token(&state, &body).await,
        "/auth/v1/signup" => signup(&state, &body).await,
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn table_request(
    state: &MockState,
    method: &Method,
    table: &str,
    query: &HashMap<String, String>,
    prefer: &str,
    body: &Bytes,
) -> Response {
    let payload: Value = serde_json::from_slice(body).unwrap_or(Value::Null);
    let mut tables = state.tables.lock().await;

    if *method == Method::GET {
        let Some(rows) = tables.get(table) else {
            if table == "chats" {
                return (
                    StatusCode::NOT_FOUND,
                    Json(json!({
                        "code": "42P01",
                        "message": "relation \"public.chats\" does not exist"
                    })),
                )
                    .into_response();
            }
            return Json(json!([])).into_response();
        };
        let mut selected: Vec<Value> = rows
            .iter()
            .filter(|row| matches_filters(row, query))
            .cloned()
            .collect();
        if let Some(order) = query.get("order") {
            let (field, direction) = order.split_once('.').unwrap_or((order.as_str(), "asc"));
            selected.sort_by_key(|row| field_text(row, field));
            if direction == "desc" {
                selected.reverse();
            }
        }
        if let Some(limit) = query.get("limit").and_then(|raw| raw.parse::<usize>().ok()) {
            selected.truncate(limit);
        }
        return Json(Value::Array(selected)).into_response();
    }

    if *method == Method::POST {
        if table == "messages" {
            if let Some((status, body)) = state.next_insert_failure.lock().await.take() {
                let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_REQUEST);
                return (status, body).into_response();
            }
        }
        if query.get("on_conflict").map(String::as_str) == Some("client_id") {
            let duplicate = tables.get(table).is_some_and(|rows| {
                rows.iter()
                    .any(|existing| existing["client_id"] == payload["client_id"])
            });
            if duplicate {
                if prefer.contains("ignore-duplicates") {
                    return (StatusCode::CREATED, Json(json!([]))).into_response();
                }
                return (
                    StatusCode::CONFLICT,
                    Json(json!({
                        "code": "23505",
                        "message": "duplicate key value violates unique constraint \"messages_client_id_key\""
                    })),
                )
                    .into_response();
            }
        }
        let mut row = payload;
        if table == "messages" {
            let mut next_id = state.next_id.lock().await;
            row["id"] = json!(*next_id);
            *next_id += 1;
            row["created_at"] = json!(Utc::now().to_rfc3339());
        }
        let rows = tables.entry(table.to_string()).or_default();
        if query.get("on_conflict").map(String::as_str) == Some("id") {
            rows.retain(|existing| existing["id"] != row["id"]);
        }
        rows.push(row.clone());
        return (StatusCode::CREATED, Json(json!([row]))).into_response();
    }

    if *method == Method::PATCH {
        if let (Some(rows), Value::Object(changes)) = (tables.get_mut(table), payload) {
            for row in rows.iter_mut().filter(|row| matches_filters(row, query)) {
                for (key, value) in &changes {
                    row[key] = value.clone();
                }
            }
        }
        return StatusCode::NO_CONTENT.into_response();
    }

    if *method == Method::DELETE {
        if let Some(rows) = tables.get_mut(table) {
            rows.retain(|row| !matches_filters(row, query));
        }
        return StatusCode::NO_CONTENT.into_response();
    }

    StatusCode::METHOD_NOT_ALLOWED.into_response()
}

fn matches_filters(row: &Value, query: &HashMap<String, String>) -> bool {
    query
        .iter()
        .filter(|(key, _)| !matches!(key.as_str(), "select" | "order" | "limit" | "on_conflict"))
        .all(|(key, filter)| match filter.strip_prefix("eq.") {
            Some(expected) => field_text(row, key) == expected,
            None => true,
        })
}

fn field_text(row: &Value, field: &str) -> String {
    match &row[field] {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn token_response(id: &str, email: &str) -> Value {
    json!({
        "access_token": format!("token-{id}"),
        "refresh_token": format!("refresh-{id}"),
        "expires_in": 3600,
        "token_type": "bearer",
        "user": { "id": id, "email": email },
    })
}

async fn token(state: &MockState, body: &Bytes) -> Response {
    let payload: Value = serde_json::from_slice(body).unwrap_or(Value::Null);
    let email = payload["email"].as_str().unwrap_or_default();
    let password = payload["password"].as_str().unwrap_or_default();
    let users = state.users.lock().await;
    match users.get(email) {
        Some((expected, id)) if expected == password => {
            Json(token_response(id, email)).into_response()
        }
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "invalid_grant",
                "error_description": "Invalid login credentials"
            })),
        )
            .into_response(),
    }
}

async fn signup(state: &MockState, body: &Bytes) -> Response {
    let payload: Value = serde_json::from_slice(body).unwrap_or(Value::Null);
    let email = payload["email"].as_str().unwrap_or_default().to_string();
    let password = payload["password"].as_str().unwrap_or_default().to_string();
    let mut users = state.users.lock().await;
    if users.contains_key(&email) {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "code": 422, "msg": "User already registered" })),
        )
            .into_response();
    }
    let id = Uuid::new_v4().to_string();
    users.insert(email.clone(), (password, id.clone()));
    if state.signup_returns_session {
        Json(token_response(&id, &email)).into_response()
    } else {
        Json(json!({ "id": id, "email": email })).into_response()
    }
}
