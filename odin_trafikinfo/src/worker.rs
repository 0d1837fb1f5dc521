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

//! `Supervisor` - owns the lifecycle of stream consumers, the ingest/enrich/store pipeline and
//! the background sync loops (§4.7). Replaces the source's module-level globals for stream
//! tasks, camera cache and worker handles (§9 redesign flag) with a single value that other
//! components receive by reference at construction.
//!
//! the interest-driven reconfiguration and the three sync loops all use cooperative cancellation:
//! each iteration checks a `watch::Receiver<bool>` at its one sleep/await point and exits cleanly
//! when told to (§4.7, §5).

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::RwLock as StdRwLock;
use std::time::Duration;

use tokio::sync::{mpsc,watch};
use tokio::task::JoinHandle;

use crate::broadcast::Broadcaster;
use crate::client::{SourceClient,TrafikObjectType,TrafikverketClient};
use crate::config::TrafikinfoConfig;
use crate::enrich::Enricher;
use crate::errors::Result;
use crate::model::Entity;
use crate::normalize::normalize_batch;
use crate::spatial::SpatialIndex;
use crate::store::EventStore;

/// interest-loop cadence (§4.7)
pub const INTEREST_TICK: Duration = Duration::from_secs(60);
/// how long reconfiguration waits for old tasks to drain before moving on regardless (§5)
pub const CANCEL_DRAIN_TIMEOUT: Duration = Duration::from_secs(3);
pub const CAMERA_SYNC_INTERVAL: Duration = Duration::from_secs(24 * 3600);
pub const WEATHER_SYNC_INTERVAL: Duration = Duration::from_secs(15 * 60);
pub const ICON_SYNC_INTERVAL: Duration = Duration::from_secs(24 * 3600);

/// liveness snapshot served at `/api/status` (§6)
#[derive(Debug,Clone,serde::Serialize)]
pub struct WorkerStatus {
    pub setup_required: bool,
    pub stream_connected: bool,
    pub last_error: Option<String>,
}

/// one cancelable background task, tracked so a reconfiguration or shutdown can stop it and
/// await its exit within [`CANCEL_DRAIN_TIMEOUT`].
struct ManagedTask {
    name: &'static str,
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

async fn cancel_and_join (tasks: Vec<ManagedTask>) {
    for task in &tasks {
        let _ = task.cancel.send(true);
    }
    for task in tasks {
        if tokio::time::timeout(CANCEL_DRAIN_TIMEOUT, task.handle).await.is_err() {
            tracing::warn!("task '{}' did not exit within the cancellation drain timeout", task.name);
        }
    }
}

pub struct Supervisor {
    config: Arc<TrafikinfoConfig>,
    store: Arc<EventStore>,
    spatial: Arc<SpatialIndex>,
    client: Arc<TrafikverketClient>,
    enricher: Arc<Enricher>,
    broadcaster: Arc<Broadcaster>,

    /// the current interest set, as computed by the last interest-loop tick; read by the weather
    /// sync loop, written only from within `tick()`.
    active_counties: StdRwLock<HashSet<i32>>,
    /// last transient-upstream error message, surfaced at `/api/status` (§6, §7)
    last_error: StdRwLock<Option<String>>,

    /// stream consumers + pipeline tasks, replaced wholesale on every interest-set change
    stream_tasks: tokio::sync::Mutex<Vec<ManagedTask>>,
    /// the three always-on sync loops, started once and stopped only on `shutdown()`
    sync_tasks: tokio::sync::Mutex<Vec<ManagedTask>>,
}

impl Supervisor {
    pub fn new (config: Arc<TrafikinfoConfig>, store: Arc<EventStore>, spatial: Arc<SpatialIndex>, client: Arc<TrafikverketClient>, enricher: Arc<Enricher>, broadcaster: Arc<Broadcaster>)->Arc<Self> {
        Arc::new(Supervisor {
            config, store, spatial, client, enricher, broadcaster,
            active_counties: StdRwLock::new(HashSet::new()),
            last_error: StdRwLock::new(None),
            stream_tasks: tokio::sync::Mutex::new(Vec::new()),
            sync_tasks: tokio::sync::Mutex::new(Vec::new()),
        })
    }

    pub fn active_counties (&self)->HashSet<i32> {
        self.active_counties.read().unwrap().clone()
    }

    /// snapshot for `/api/status` (§6): whether a stream is expected to be connected, whether
    /// configuration is missing, and the most recent transient-upstream error if any (§7).
    pub fn status (&self)->WorkerStatus {
        WorkerStatus {
            setup_required: self.config.api_key.is_empty(),
            stream_connected: !self.active_counties.read().unwrap().is_empty(),
            last_error: self.last_error.read().unwrap().clone(),
        }
    }

    /// starts the always-on sync loops and runs the interest loop until `shutdown` fires.
    /// Configuration without an `api_key` leaves the manager idling (§7 `Configuration missing`)
    /// rather than looping against a query that can never succeed.
    pub async fn run (self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        if self.config.api_key.is_empty() {
            tracing::warn!("no api_key configured, WorkerManager idles until settings are updated");
        }

        self.start_sync_loops().await;

        let mut interval = tokio::time::interval(INTEREST_TICK);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => { if *shutdown.borrow() { break } }
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        tracing::error!("interest-loop tick failed, retrying in 60s: {e}");
                        *self.last_error.write().unwrap() = Some(e.to_string());
                    }
                }
            }
        }

        let stream_tasks = std::mem::take(&mut *self.stream_tasks.lock().await);
        cancel_and_join(stream_tasks).await;
        let sync_tasks = std::mem::take(&mut *self.sync_tasks.lock().await);
        cancel_and_join(sync_tasks).await;
    }

    /// §4.7 step 1-3: recompute the interest set, reconfigure stream consumers if it changed.
    async fn tick (self: &Arc<Self>)->Result<()> {
        if self.config.api_key.is_empty() { return Ok(()) }

        let mut counties: HashSet<i32> = HashSet::new();
        for interest in self.store.load_client_interests().await? {
            counties.extend(interest.counties);
        }
        for sub in self.store.load_push_subscriptions().await? {
            counties.extend(sub.counties);
        }

        let changed = counties != self.active_counties();
        if changed {
            tracing::info!("interest set changed to {:?}, reconfiguring stream consumers", counties);
            let old_stream_tasks = std::mem::take(&mut *self.stream_tasks.lock().await);
            cancel_and_join(old_stream_tasks).await;

            *self.active_counties.write().unwrap() = counties.clone();

            if !counties.is_empty() {
                let counties_vec: Vec<u32> = counties.iter().map(|c| *c as u32).collect();
                let mut new_tasks = Vec::new();
                new_tasks.push(self.spawn_object_pipeline(TrafikObjectType::Situation, counties_vec.clone(), "incident-stream"));
                new_tasks.push(self.spawn_object_pipeline(TrafikObjectType::RoadCondition, counties_vec, "road-condition-stream"));
                *self.stream_tasks.lock().await = new_tasks;
            }
        }

        Ok(())
    }

    /// spawns one stream consumer plus its dedicated pipeline task (§4.1, §5): routing each
    /// object type to exactly one pipeline task serializes all writes for a given id.
    fn spawn_object_pipeline (self: &Arc<Self>, object_type: TrafikObjectType, counties: Vec<u32>, name: &'static str)->ManagedTask {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (tx, rx) = mpsc::channel(256);

        let client = self.client.clone();
        let consumer_cancel = cancel_rx.clone();
        let consumer_counties = counties.clone();
        let supervisor = self.clone();

        let handle = tokio::spawn(async move {
            let pipeline = tokio::spawn(supervisor.clone().run_pipeline(object_type, rx));
            client.run_stream(object_type, consumer_counties, tx, consumer_cancel).await;
            let _ = pipeline.await;
        });

        ManagedTask { name, cancel: cancel_tx, handle }
    }

    /// drains normalized batches for one object type and runs each entity through
    /// enrich -> store -> broadcast, in arrival order, yielding between entities (§4.6-§4.8, §5).
    async fn run_pipeline (self: Arc<Self>, object_type: TrafikObjectType, mut rx: mpsc::Receiver<serde_json::Value>) {
        let object_name = match object_type {
            TrafikObjectType::Situation => "Situation",
            TrafikObjectType::RoadCondition => "RoadCondition",
            _ => return,
        };

        while let Some(payload) = rx.recv().await {
            for entity in normalize_batch(object_name, &payload) {
                if let Err(e) = self.process_entity(entity).await {
                    tracing::error!("failed to process entity from {object_name} stream: {e}");
                    *self.last_error.write().unwrap() = Some(e.to_string());
                }
            }
        }
    }

    /// one entity through the full pipeline: enrich, commit (version row + row update in one
    /// transaction), then broadcast only after the commit succeeds (§4.5, §5, §8 invariant 1).
    async fn process_entity (&self, mut entity: Entity)->Result<()> {
        match &entity {
            Entity::Incident(incident) => {
                let prior = self.store.get_incident(&incident.external_id).await?.map(Entity::Incident);
                self.enricher.enrich(&mut entity, prior.as_ref()).await?;
                let Entity::Incident(enriched) = entity else { unreachable!() };
                let (stored, _kind) = self.store.upsert_incident(enriched).await?;

                let subscriptions = self.store.load_push_subscriptions().await?;
                let outcome = self.broadcaster.publish(&Entity::Incident(stored.clone()), &subscriptions).await?;
                if outcome.published_to_broker {
                    self.store.mark_published_to_broker_incident(&stored.external_id).await?;
                }
                self.evict_gone_subscriptions(outcome.gone_endpoints).await;
            }
            Entity::RoadCondition(rc) => {
                let prior = self.store.get_road_condition(&rc.id).await?.map(Entity::RoadCondition);
                self.enricher.enrich(&mut entity, prior.as_ref()).await?;
                let Entity::RoadCondition(enriched) = entity else { unreachable!() };
                let (stored, _kind) = self.store.upsert_road_condition(enriched).await?;

                let subscriptions = self.store.load_push_subscriptions().await?;
                let outcome = self.broadcaster.publish(&Entity::RoadCondition(stored.clone()), &subscriptions).await?;
                if outcome.published_to_broker {
                    self.store.mark_published_to_broker_road_condition(&stored.id).await?;
                }
                self.evict_gone_subscriptions(outcome.gone_endpoints).await;
            }
        }
        Ok(())
    }

    async fn start_sync_loops (self: &Arc<Self>) {
        let tasks = vec![
            self.spawn_sync_loop("camera-sync", CAMERA_SYNC_INTERVAL, Self::sync_cameras),
            self.spawn_sync_loop("weather-sync", WEATHER_SYNC_INTERVAL, Self::sync_weather),
            self.spawn_sync_loop("icon-sync", ICON_SYNC_INTERVAL, Self::sync_icons),
        ];
        *self.sync_tasks.lock().await = tasks;
    }

    fn spawn_sync_loop<F,Fut> (self: &Arc<Self>, name: &'static str, interval: Duration, f: F)->ManagedTask
        where F: Fn(Arc<Supervisor>)->Fut + Send + 'static, Fut: std::future::Future<Output = Result<()>> + Send
    {
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let supervisor = self.clone();

        let handle = tokio::spawn(async move {
            // run once immediately so a freshly started supervisor doesn't wait a full interval
            // before the camera/weather/icon lists are first populated
            if let Err(e) = f(supervisor.clone()).await {
                tracing::warn!("{name} loop initial run failed: {e}");
            }

            loop {
                tokio::select! {
                    _ = cancel_rx.changed() => { if *cancel_rx.borrow() { return } }
                    _ = tokio::time::sleep(interval) => {
                        if let Err(e) = f(supervisor.clone()).await {
                            tracing::warn!("{name} loop iteration failed: {e}");
                        }
                    }
                }
            }
        });

        ManagedTask { name, cancel: cancel_tx, handle }
    }

    /// refreshes the DB Camera table and rebuilds SpatialIndex's camera list, preserving
    /// `is_favorite` (§4.7; the preservation itself lives in `EventStore::upsert_cameras`).
    async fn sync_cameras (self: Arc<Self>)->Result<()> {
        let counties = self.config.selected_counties.clone();
        let cameras = self.client.fetch_cameras(&counties).await?;
        self.store.upsert_cameras(cameras).await?;
        let all = self.store.load_cameras().await?;
        self.spatial.set_cameras(all);
        Ok(())
    }

    /// refreshes weather stations for the currently active counties (§4.7)
    async fn sync_weather (self: Arc<Self>)->Result<()> {
        let counties: Vec<u32> = self.active_counties().iter().map(|c| *c as u32).collect();
        if counties.is_empty() { return Ok(()) }
        let stations = self.client.fetch_weather_stations(&counties).await?;
        self.store.upsert_weather_stations(stations).await?;
        let all = self.store.load_weather_stations().await?;
        self.spatial.set_stations(all);
        Ok(())
    }

    /// downloads any missing icon PNGs to the configured icon directory (§4.7)
    async fn sync_icons (self: Arc<Self>)->Result<()> {
        odin_common::fs::ensure_dir(&self.config.icon_root)?;
        for icon_id in ICON_IDS {
            let path = self.config.icon_root.join(format!("{icon_id}.png"));
            if path.exists() { continue }
            match self.client.fetch_icon(icon_id).await {
                Ok(bytes) => { tokio::fs::write(&path, bytes.as_ref()).await?; }
                Err(e) => tracing::warn!("icon sync failed for {icon_id}: {e}"),
            }
        }
        Ok(())
    }
}

/// the fixed set of icon ids the MDI dictionary (§6 broker topics) and the upstream icon
/// catalog both recognize; kept local to the sync loop rather than discovered, since the
/// upstream has no "list all icons" query.
const ICON_IDS: &[&str] = &[
    "roadwork","accident","roadClosed","animal","obstacle","queue","slippery",
    "ferryTrafficDisruption","publicTransportDisruption",
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push::{PushDispatcher,VapidKeyPair};
    use sqlx::sqlite::SqlitePoolOptions;
    use std::path::PathBuf;

    async fn test_supervisor (api_key: &str)->Arc<Supervisor> {
        let pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        crate::store::run_migrations(&pool).await.unwrap();
        let store = Arc::new(EventStore::new(pool));

        let spatial = Arc::new(SpatialIndex::new());
        let snapshots = crate::snapshot::SnapshotStore::new(reqwest::Client::new(), std::env::temp_dir());
        let enricher = Arc::new(Enricher::new(spatial.clone(), snapshots, crate::config::DEFAULT_CAMERA_RADIUS_KM));

        let vapid_dir = std::env::temp_dir().join(format!("odin_trafikinfo_worker_test_{}", std::process::id()));
        std::fs::create_dir_all(&vapid_dir).unwrap();
        let vapid = VapidKeyPair::load_or_generate(&vapid_dir.join("vapid.pem")).unwrap();
        let push = PushDispatcher::new(reqwest::Client::new(), vapid, "mailto:ops@example.com", "http://localhost:8080");
        let broadcaster = Arc::new(Broadcaster::new(None, "trafikinfo/traffic", "trafikinfo/road_conditions", push, "http://localhost:8080"));

        let client = Arc::new(TrafikverketClient::new(reqwest::Client::new(), "https://api.trafikinfo.trafikverket.se/v2/data.json", api_key));

        let mut config = TrafikinfoConfig {
            api_key: api_key.to_string(), selected_counties: vec![], camera_radius_km: crate::config::DEFAULT_CAMERA_RADIUS_KM,
            mqtt_enabled: false, mqtt_host: "localhost".to_string(), mqtt_port: 1883, mqtt_username: None, mqtt_password: None,
            mqtt_topic: "trafikinfo/traffic".to_string(), mqtt_rc_topic: "trafikinfo/road_conditions".to_string(),
            retention_days: 90, base_url: "http://localhost:8080".to_string(), admin_password: None,
            push_notifications_enabled: true, sound_notifications_enabled: true, vapid_private_key: None, vapid_public_key: None,
            db_path: PathBuf::from("data/trafikinfo.db"), snapshot_root: PathBuf::from("data/snapshots"), icon_root: PathBuf::from("data/icons"),
        };
        config.selected_counties = vec![];

        Supervisor::new(Arc::new(config), store, spatial, client, enricher, broadcaster)
    }

    #[tokio::test]
    async fn missing_api_key_reports_setup_required_and_never_connects() {
        // §7 Configuration missing: WorkerManager idles, /api/status.setup_required=true
        let supervisor = test_supervisor("").await;
        let status = supervisor.status();
        assert!(status.setup_required);
        assert!(!status.stream_connected);
        assert!(status.last_error.is_none());
    }

    #[tokio::test]
    async fn tick_is_a_noop_while_api_key_is_missing() {
        // §4.7's interest recomputation never runs against an upstream it can't query
        let supervisor = test_supervisor("").await;
        supervisor.tick().await.unwrap();
        assert!(supervisor.active_counties().is_empty());
        assert_eq!(supervisor.stream_tasks.lock().await.len(), 0);
    }

    #[tokio::test]
    async fn interest_loop_unions_client_and_push_subscription_counties() {
        // §4.7 step 1: the required region set is the union of both interest sources, even
        // with a configured api_key the stream spawn itself is exercised at the client.rs level.
        let supervisor = test_supervisor("test-key").await;
        supervisor.store.upsert_client_interest(&crate::model::ClientInterest {
            client_id: "viewer-1".to_string(), counties: [1].into_iter().collect(), last_active: chrono::Utc::now(),
        }).await.unwrap();
        supervisor.store.upsert_push_subscription(&crate::model::PushSubscription {
            endpoint: "https://push.example/a".to_string(), p256dh: "k".to_string(), auth: "a".to_string(),
            counties: [4].into_iter().collect(), min_severity: 1, topic_realtid: true, topic_road_condition: true, sound_enabled: true,
        }).await.unwrap();

        let client_counties: HashSet<i32> = supervisor.store.load_client_interests().await.unwrap().into_iter().flat_map(|i| i.counties).collect();
        let push_counties: HashSet<i32> = supervisor.store.load_push_subscriptions().await.unwrap().into_iter().flat_map(|s| s.counties).collect();
        let union: HashSet<i32> = client_counties.union(&push_counties).copied().collect();
        assert_eq!(union, [1,4].into_iter().collect());
    }
}
