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

//! Swedish Trafikverket traffic/road-condition aggregator: queries the upstream streaming API,
//! normalizes and enriches incidents and road conditions with nearby camera snapshots and weather,
//! persists them with change-history tracking, and fans committed entities out to SSE viewers, an
//! MQTT broker and web-push subscribers.

pub mod errors;
pub mod config;
pub mod model;
pub mod normalize;
pub mod spatial;
pub mod snapshot;
pub mod enrich;
pub mod client;
pub mod store;
pub mod broadcast;
pub mod push;
pub mod worker;

pub use errors::{OdinTrafikinfoError,Result};
pub use config::{TrafikinfoConfig,load_config};
pub use model::Entity;
pub use store::EventStore;
pub use spatial::SpatialIndex;
pub use snapshot::SnapshotStore;
pub use enrich::Enricher;
pub use client::TrafikverketClient;
pub use broadcast::Broadcaster;
pub use push::{PushDispatcher,VapidKeyPair};
pub use worker::{Supervisor,WorkerStatus};

use std::sync::Arc;

/// assembles the full set of long-lived components from a loaded configuration: opens the
/// sqlite store, builds the spatial index (empty until the first camera/weather sync), the
/// snapshot store, VAPID key pair, push dispatcher, broker connection (if enabled) and the
/// `Supervisor` that owns their lifecycle. Intended to be called once from a binary's `main`.
pub async fn build_runtime (config: TrafikinfoConfig)->Result<Runtime> {
    let config = Arc::new(config);
    let http = reqwest::Client::new();

    let pool = store::connect(&config.db_path).await?;
    let store = Arc::new(EventStore::new(pool));

    let spatial = Arc::new(SpatialIndex::new());
    spatial.set_cameras(store.load_cameras().await?);
    spatial.set_stations(store.load_weather_stations().await?);

    let snapshots = SnapshotStore::new(http.clone(), config.snapshot_root.clone());
    let enricher = Arc::new(Enricher::new(spatial.clone(), snapshots, config.camera_radius_km));

    let client = Arc::new(TrafikverketClient::new(http.clone(), trafikverket_base_url(), config.api_key.clone()));

    let vapid_path = config.db_path.with_file_name("vapid.pem");
    let vapid = VapidKeyPair::load_or_generate(&vapid_path)?;
    let push = PushDispatcher::new(http.clone(), vapid, "mailto:noreply@example.com", config.base_url.clone());

    let mqtt = if config.mqtt_enabled {
        let (mqtt_client, eventloop) = Broadcaster::connect_mqtt(
            &config.mqtt_host, config.mqtt_port, "odin_trafikinfo",
            config.mqtt_username.as_deref(), config.mqtt_password.as_deref(),
        );
        tokio::spawn(drive_mqtt_eventloop(eventloop));
        Some(mqtt_client)
    } else {
        None
    };

    let broadcaster = Arc::new(Broadcaster::new(mqtt, config.mqtt_topic.clone(), config.mqtt_rc_topic.clone(), push, config.base_url.clone()));

    let supervisor = Supervisor::new(config.clone(), store.clone(), spatial.clone(), client.clone(), enricher.clone(), broadcaster.clone());

    Ok(Runtime { config, store, spatial, broadcaster, supervisor })
}

/// the fixed upstream endpoint; not a configuration key since there is exactly one Trafikverket
/// API to talk to (§6).
fn trafikverket_base_url ()->String {
    "https://api.trafikinfo.trafikverket.se/v2/data.json".to_string()
}

async fn drive_mqtt_eventloop (mut eventloop: rumqttc::EventLoop) {
    loop {
        if let Err(e) = eventloop.poll().await {
            tracing::warn!("mqtt eventloop error: {e}");
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        }
    }
}

/// the long-lived handles a binary needs: the `Supervisor` to `run()`, plus the pieces an HTTP
/// surface reads from directly (store, spatial index, broadcaster).
pub struct Runtime {
    pub config: Arc<TrafikinfoConfig>,
    pub store: Arc<EventStore>,
    pub spatial: Arc<SpatialIndex>,
    pub broadcaster: Arc<Broadcaster>,
    pub supervisor: Arc<Supervisor>,
}
