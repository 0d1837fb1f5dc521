/*
 * Copyright © 2025, United States Government, as represented by the Administrator of
 * the National Aeronautics and Space Administration. All rights reserved.
 *
 * The “ODIN” software is licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License. You may obtain a copy
 * of the License at http://www.apache.org/licenses/LICENSE-2.0.
 *
 * Unless required by applicable law or agreed to in writing, software distributed under
 * the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
 * either express or implied. See the License for the specific language governing permissions
 * and limitations under the License.
 */
#![allow(unused)]

//! the §6 HTTP/SSE surface, layered on top of the core's typed interfaces. This module is the
//! "thin binary" of §10.7: the admin auth token check, SPA static file serving conventions and
//! the `/api/stats` convenience endpoint (none of which are part of the core, per §1's explicit
//! non-goals) are implemented here rather than in `odin_trafikinfo` itself.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::services::ServeDir;

use odin_trafikinfo::model::{ClientInterest, PushSubscription};
use odin_trafikinfo::{OdinTrafikinfoError, Runtime};

pub fn build_router (runtime: Arc<Runtime>) -> Router {
    Router::new()
        .route("/api/events", get(list_events))
        .route("/api/events/{external_id}/history", get(event_history))
        .route("/api/road-conditions", get(list_road_conditions))
        .route("/api/cameras", get(list_cameras))
        .route("/api/cameras/{id}/toggle-favorite", post(toggle_camera_favorite))
        .route("/api/cameras/{id}/image", get(camera_image))
        .route("/api/stream", get(stream_events))
        .route("/api/client/interest", post(register_client_interest))
        .route("/api/push/vapid-public-key", get(vapid_public_key))
        .route("/api/push/subscribe", post(push_subscribe))
        .route("/api/push/unsubscribe", post(push_unsubscribe))
        .route("/api/settings", get(get_settings).post(post_settings))
        .route("/api/report-base-url", post(report_base_url))
        .route("/api/status", get(status))
        .route("/api/stats", get(stats))
        .nest_service("/api/snapshots", ServeDir::new(runtime.config.snapshot_root.clone()))
        .nest_service("/api/icons", ServeDir::new(runtime.config.icon_root.clone()))
        .with_state(runtime)
}

/// §7 "Configuration missing" / admin-auth non-goal: a minimal header check against the
/// configured admin password. An unconfigured password leaves mutating endpoints open, mirroring
/// `WorkerManager`'s own "idle until configured" stance (§4.7) rather than inventing a session
/// system the spec explicitly places outside the core.
fn require_admin (runtime: &Runtime, headers: &HeaderMap) -> Result<(), Response> {
    let Some(expected) = runtime.config.effective_admin_password() else { return Ok(()) };
    let provided = headers.get("x-admin-password").and_then(|v| v.to_str().ok()).unwrap_or("");
    if provided == expected {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "invalid admin password").into_response())
    }
}

impl IntoResponse for OdinTrafikinfoErrorResponse {
    fn into_response (self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string()).into_response()
    }
}

/// wraps `OdinTrafikinfoError` so handlers can use `?` against axum's `IntoResponse`
pub struct OdinTrafikinfoErrorResponse(OdinTrafikinfoError);
impl From<OdinTrafikinfoError> for OdinTrafikinfoErrorResponse {
    fn from (e: OdinTrafikinfoError) -> Self { OdinTrafikinfoErrorResponse(e) }
}

#[derive(Deserialize)]
struct EventsQuery {
    counties: Option<String>,
    hours: Option<i64>,
    date: Option<DateTime<Utc>>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

fn parse_counties (raw: &Option<String>) -> Option<Vec<i32>> {
    raw.as_ref().map(|s| s.split(',').filter_map(|c| c.trim().parse().ok()).collect())
}

/// `GET /api/events` (§6): current incidents, filtered by counties/hours/date/type ∈ {realtid, planned}.
async fn list_events (State(runtime): State<Arc<Runtime>>, Query(q): Query<EventsQuery>) -> Result<Json<serde_json::Value>, OdinTrafikinfoErrorResponse> {
    let counties = parse_counties(&q.counties);
    let mut incidents = runtime.store.list_incidents(counties.as_deref()).await?;

    if let Some(hours) = q.hours {
        let cutoff = Utc::now() - chrono::Duration::hours(hours);
        incidents.retain(|i| i.updated_at >= cutoff);
    }
    if let Some(date) = q.date {
        incidents.retain(|i| i.start_time.map(|t| t <= date).unwrap_or(true) && i.end_time.map(|t| t >= date).unwrap_or(true));
    }
    match q.kind.as_deref() {
        Some("realtid") => incidents.retain(|i| i.end_time.is_none() || i.end_time.unwrap() <= Utc::now()),
        Some("planned") => incidents.retain(|i| i.start_time.map(|t| t > Utc::now()).unwrap_or(false)),
        _ => {}
    }

    Ok(Json(json!(incidents)))
}

/// `GET /api/events/{external_id}/history` (§6)
async fn event_history (State(runtime): State<Arc<Runtime>>, AxumPath(external_id): AxumPath<String>) -> Result<Json<serde_json::Value>, OdinTrafikinfoErrorResponse> {
    let versions = runtime.store.incident_history(&external_id).await?;
    Ok(Json(json!(versions)))
}

#[derive(Deserialize)]
struct CountiesQuery {
    counties: Option<String>,
}

/// `GET /api/road-conditions` (§6)
async fn list_road_conditions (State(runtime): State<Arc<Runtime>>, Query(q): Query<CountiesQuery>) -> Result<Json<serde_json::Value>, OdinTrafikinfoErrorResponse> {
    let counties = parse_counties(&q.counties);
    let conditions = runtime.store.list_road_conditions(counties.as_deref()).await?;
    Ok(Json(json!(conditions)))
}

/// `GET /api/cameras` (§6)
async fn list_cameras (State(runtime): State<Arc<Runtime>>) -> Result<Json<serde_json::Value>, OdinTrafikinfoErrorResponse> {
    let cameras = runtime.store.load_cameras().await?;
    Ok(Json(json!(cameras)))
}

/// `POST /api/cameras/{id}/toggle-favorite` (§6, admin): flips `is_favorite`, the only field the
/// UI may mutate directly on a `Camera` row (§3).
async fn toggle_camera_favorite (State(runtime): State<Arc<Runtime>>, headers: HeaderMap, AxumPath(id): AxumPath<String>) -> Response {
    if let Err(resp) = require_admin(&runtime, &headers) { return resp }
    match runtime.store.toggle_camera_favorite(&id).await {
        Ok(is_favorite) => Json(json!({ "id": id, "is_favorite": is_favorite })).into_response(),
        Err(e) => OdinTrafikinfoErrorResponse(e).into_response(),
    }
}

/// `GET /api/cameras/{id}/image` (§6): proxies one upstream image, never exposing the upstream
/// URL itself to the caller.
async fn camera_image (State(runtime): State<Arc<Runtime>>, AxumPath(id): AxumPath<String>) -> Response {
    let cameras = match runtime.store.load_cameras().await {
        Ok(c) => c,
        Err(e) => return OdinTrafikinfoErrorResponse(e).into_response(),
    };
    let Some(camera) = cameras.into_iter().find(|c| c.id == id) else {
        return (StatusCode::NOT_FOUND, "camera not found").into_response();
    };
    let Some(url) = camera.fullsize_url.or(camera.photo_url) else {
        return (StatusCode::NOT_FOUND, "camera has no photo url").into_response();
    };

    let client = reqwest::Client::new();
    match client.get(&url).send().await {
        Ok(resp) if resp.status().is_success() => {
            let content_type = resp.headers().get("content-type").cloned();
            match resp.bytes().await {
                Ok(bytes) => {
                    let mut response = bytes.into_response();
                    if let Some(ct) = content_type {
                        response.headers_mut().insert("content-type", ct);
                    }
                    response
                }
                Err(_) => (StatusCode::BAD_GATEWAY, "upstream read failed").into_response(),
            }
        }
        _ => (StatusCode::BAD_GATEWAY, "upstream fetch failed").into_response(),
    }
}

/// unregisters the viewer queue once the SSE stream is dropped (client disconnect), so
/// `Broadcaster` doesn't accumulate dead entries for viewers that never unsubscribed explicitly.
struct ViewerGuard {
    runtime: Arc<Runtime>,
    client_id: String,
}
impl Drop for ViewerGuard {
    fn drop (&mut self) { self.runtime.broadcaster.unregister_viewer(&self.client_id); }
}

/// `GET /api/stream` (§6, §4.8): registers a new SSE viewer queue and forwards every entity
/// broadcast to it, newest-wins drop-oldest on a full queue per `Broadcaster::register_viewer`.
async fn stream_events (State(runtime): State<Arc<Runtime>>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let client_id = format!("viewer-{}", uuid_like());
    let queue = runtime.broadcaster.register_viewer(client_id.clone());
    let guard = ViewerGuard { runtime: runtime.clone(), client_id };

    let stream = async_stream::stream! {
        let _guard = guard;
        loop {
            let entity = queue.recv().await;
            match serde_json::to_string(&entity) {
                Ok(json) => yield Ok(Event::default().data(json)),
                Err(_) => continue,
            }
        }
    };

    Sse::new(stream).keep_alive(axum::response::sse::KeepAlive::new().interval(Duration::from_secs(15)))
}

/// not a real UUID generator - just enough entropy to key concurrent anonymous viewers, since
/// SSE connections never carry a client-supplied id (§6, §4.8).
fn uuid_like () -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or(0);
    format!("{nanos:x}")
}

#[derive(Deserialize)]
struct ClientInterestBody {
    client_id: String,
    counties: Vec<i32>,
}

/// `POST /api/client/interest` (§6): registers/refreshes a `ClientInterest`, read by the next
/// interest-loop tick (§4.7).
async fn register_client_interest (State(runtime): State<Arc<Runtime>>, Json(body): Json<ClientInterestBody>) -> Result<StatusCode, OdinTrafikinfoErrorResponse> {
    let interest = ClientInterest {
        client_id: body.client_id,
        counties: body.counties.into_iter().collect(),
        last_active: Utc::now(),
    };
    runtime.store.upsert_client_interest(&interest).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/push/vapid-public-key` (§6)
async fn vapid_public_key (State(runtime): State<Arc<Runtime>>) -> Json<serde_json::Value> {
    Json(json!({ "publicKey": runtime.broadcaster.vapid_public_key() }))
}

#[derive(Deserialize)]
struct PushSubscribeBody {
    endpoint: String,
    p256dh: String,
    auth: String,
    #[serde(default)]
    counties: Vec<i32>,
    #[serde(default = "default_min_severity")]
    min_severity: i32,
    #[serde(default = "default_true")]
    topic_realtid: bool,
    #[serde(default = "default_true")]
    topic_road_condition: bool,
    #[serde(default = "default_true")]
    sound_enabled: bool,
}
fn default_min_severity() -> i32 { 1 }
fn default_true() -> bool { true }

/// `POST /api/push/subscribe` (§6)
async fn push_subscribe (State(runtime): State<Arc<Runtime>>, Json(body): Json<PushSubscribeBody>) -> Result<StatusCode, OdinTrafikinfoErrorResponse> {
    let sub = PushSubscription {
        endpoint: body.endpoint, p256dh: body.p256dh, auth: body.auth,
        counties: body.counties.into_iter().collect(),
        min_severity: body.min_severity,
        topic_realtid: body.topic_realtid,
        topic_road_condition: body.topic_road_condition,
        sound_enabled: body.sound_enabled,
    };
    runtime.store.upsert_push_subscription(&sub).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct PushUnsubscribeBody {
    endpoint: String,
}

/// `POST /api/push/unsubscribe` (§6)
async fn push_unsubscribe (State(runtime): State<Arc<Runtime>>, Json(body): Json<PushUnsubscribeBody>) -> Result<StatusCode, OdinTrafikinfoErrorResponse> {
    runtime.store.delete_push_subscription(&body.endpoint).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/settings` (§6)
async fn get_settings (State(runtime): State<Arc<Runtime>>) -> Result<Json<serde_json::Value>, OdinTrafikinfoErrorResponse> {
    let settings = runtime.store.load_settings().await?;
    Ok(Json(json!(settings.values)))
}

/// `POST /api/settings` (§6, admin)
async fn post_settings (State(runtime): State<Arc<Runtime>>, headers: HeaderMap, Json(body): Json<HashMap<String, String>>) -> Response {
    if let Err(resp) = require_admin(&runtime, &headers) { return resp }
    for (key, value) in body {
        if let Err(e) = runtime.store.set_setting(&key, &value).await {
            return OdinTrafikinfoErrorResponse(e).into_response();
        }
    }
    StatusCode::NO_CONTENT.into_response()
}

#[derive(Deserialize)]
struct ReportBaseUrlBody {
    base_url: String,
}

/// `POST /api/report-base-url` (§6): records the canonical external URL used for icon/snapshot
/// rewriting (§4.6). Not admin-gated - any viewer's browser may report the URL it reached the
/// server through.
async fn report_base_url (State(runtime): State<Arc<Runtime>>, Json(body): Json<ReportBaseUrlBody>) -> Result<StatusCode, OdinTrafikinfoErrorResponse> {
    runtime.store.set_setting("base_url", &body.base_url).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/status` (§6, §7): liveness - stream connected?, last error, setup_required.
async fn status (State(runtime): State<Arc<Runtime>>) -> Json<serde_json::Value> {
    Json(json!(runtime.supervisor.status()))
}

#[derive(Serialize)]
struct Stats {
    open_incidents_by_severity: HashMap<i32, usize>,
    open_road_conditions_by_code: HashMap<i32, usize>,
}

/// `GET /api/stats` (§10.2): a convenience read endpoint carried over from the original source
/// with no counterpart in §6's table; counts of currently-open incidents/conditions by
/// severity/code, not part of the grounded core's tested surface.
async fn stats (State(runtime): State<Arc<Runtime>>) -> Result<Json<Stats>, OdinTrafikinfoErrorResponse> {
    let incidents = runtime.store.list_incidents(None).await?;
    let conditions = runtime.store.list_road_conditions(None).await?;
    let now = Utc::now();

    let mut by_severity = HashMap::new();
    for i in incidents.iter().filter(|i| i.end_time.map(|t| t > now).unwrap_or(true)) {
        *by_severity.entry(i.severity_code).or_insert(0) += 1;
    }
    let mut by_code = HashMap::new();
    for c in conditions.iter().filter(|c| c.end_time.map(|t| t > now).unwrap_or(true)) {
        *by_code.entry(c.condition_code).or_insert(0) += 1;
    }

    Ok(Json(Stats { open_incidents_by_severity: by_severity, open_road_conditions_by_code: by_code }))
}
