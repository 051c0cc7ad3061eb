use std::{collections::HashMap, sync::Arc};

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::debug;
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Item {
    pub id: Uuid,
    pub name: String,
}

#[derive(Deserialize)]
pub struct CreateItem {
    pub name: String,
}

pub type Db = Arc<RwLock<HashMap<Uuid, Item>>>;

/// Seeded with three items so `GET /items` answers `{"n":3,...}`.
pub fn app() -> Router {
    let seed = ["alpha", "beta", "gamma"].map(|name| Item {
        id: Uuid::new_v4(),
        name: name.to_string(),
    });
    let db: Db = Arc::new(RwLock::new(seed.into_iter().map(|i| (i.id, i)).collect()));
    Router::new()
        .route("/items", get(list_items).post(create_item))
        .route("/items/{id}", get(get_item).delete(delete_item))
        .route("/redirect/{hops}", get(redirect))
        .route("/status/{code}", get(status))
        .route("/malformed", get(malformed))
        .route("/echo", any(echo))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn list_items(State(db): State<Db>, Query(query): Query<HashMap<String, String>>) -> Json<Value> {
    let items = db.read().await;
    Json(json!({ "n": items.len(), "query": query }))
}

async fn create_item(State(db): State<Db>, Json(input): Json<CreateItem>) -> (StatusCode, Json<Item>) {
    let item = Item {
        id: Uuid::new_v4(),
        name: input.name,
    };
    db.write().await.insert(item.id, item.clone());
    (StatusCode::CREATED, Json(item))
}

async fn get_item(State(db): State<Db>, Path(id): Path<Uuid>) -> Result<Json<Item>, StatusCode> {
    let items = db.read().await;
    items.get(&id).cloned().map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn delete_item(State(db): State<Db>, Path(id): Path<Uuid>) -> Result<StatusCode, StatusCode> {
    let mut items = db.write().await;
    items.remove(&id).map(|_| StatusCode::NO_CONTENT).ok_or(StatusCode::NOT_FOUND)
}

/// `/redirect/{n}` answers 302 to `/redirect/{n-1}` until `n` reaches 0.
async fn redirect(Path(hops): Path<u32>) -> Response {
    if hops == 0 {
        return Json(json!({ "redirected": true })).into_response();
    }
    debug!(hops, "redirecting");
    (
        StatusCode::FOUND,
        [(header::LOCATION, format!("/redirect/{}", hops - 1))],
        format!("{} more", hops),
    )
        .into_response()
}

async fn status(Path(code): Path<u16>) -> Result<StatusCode, StatusCode> {
    StatusCode::from_u16(code).map_err(|_| StatusCode::BAD_REQUEST)
}

async fn malformed() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/json")], r#"{"n":"#)
}

async fn echo(method: Method, headers: HeaderMap, body: Bytes) -> Json<Value> {
    let header = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    Json(json!({
        "method": method.as_str(),
        "content_type": header(header::CONTENT_TYPE),
        "accept": header(header::ACCEPT),
        "body": String::from_utf8_lossy(&body),
    }))
}
