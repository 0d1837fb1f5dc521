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

//! fan-out to SSE viewers, the broker topic and push subscriptions (§4.8).

use dashmap::DashMap;
use lazy_static::lazy_static;
use rumqttc::{AsyncClient,MqttOptions,QoS};
use serde::Serialize;
use std::collections::{HashMap,VecDeque};
use std::sync::{Arc,Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use crate::enrich::{rewrite_icon_url,rewrite_snapshot_url};
use crate::errors::Result;
use crate::model::{Entity,PushSubscription};
use crate::push::PushDispatcher;

lazy_static! {
    /// Swedish county ("län") code -> display name, used as the broker message's `region` field
    static ref COUNTY_NAMES: HashMap<i32,&'static str> = HashMap::from([
        (1, "Stockholm"), (3, "Uppsala"), (4, "Södermanland"), (5, "Östergötland"),
        (6, "Jönköping"), (7, "Kronoberg"), (8, "Kalmar"), (9, "Gotland"), (10, "Blekinge"),
        (12, "Skåne"), (13, "Halland"), (14, "Västra Götaland"), (17, "Värmland"),
        (18, "Örebro"), (19, "Västmanland"), (20, "Dalarna"), (21, "Gävleborg"),
        (22, "Västernorrland"), (23, "Jämtland"), (24, "Västerbotten"), (25, "Norrbotten"),
    ]);

    /// icon_id -> MDI (Material Design Icons) identifier, the fixed dictionary referenced by §6
    static ref MDI_ICON_MAP: HashMap<&'static str,&'static str> = HashMap::from([
        ("roadwork", "mdi:road-variant"),
        ("accident", "mdi:car-emergency"),
        ("roadClosed", "mdi:road-variant-close"),
        ("animal", "mdi:paw"),
        ("obstacle", "mdi:alert-octagon"),
        ("queue", "mdi:car-multiple"),
        ("slippery", "mdi:weather-snowy"),
        ("ferryTrafficDisruption", "mdi:ferry"),
        ("publicTransportDisruption", "mdi:bus-alert"),
    ]);
}

fn county_name (county_no: i32)->&'static str {
    COUNTY_NAMES.get(&county_no).copied().unwrap_or("Okänt län")
}

/// MDI icon for an incident's `icon_id`, or for a road condition keyed by its condition code -
/// the upstream carries no `icon_id` for road conditions (§3).
fn mdi_icon (entity: &Entity)->&'static str {
    match entity {
        Entity::Incident(i) => i.icon_id.as_deref().and_then(|id| MDI_ICON_MAP.get(id).copied()).unwrap_or("mdi:alert"),
        Entity::RoadCondition(r) => match r.condition_code {
            1 => "mdi:road",
            2 => "mdi:water",
            3 => "mdi:snowflake",
            4 => "mdi:ski",
            _ => "mdi:alert",
        },
    }
}

/// §6 deep-link path convention, shared with `PushDispatcher::build_payload`'s notification URL
fn deep_link_path (entity: &Entity)->String {
    match entity {
        Entity::Incident(i) => format!("event/{}", i.external_id),
        Entity::RoadCondition(r) => format!("road-condition/{}", r.id),
    }
}

/// the message published to the broker topic (§6): the normalized entity, plus rewritten
/// icon/snapshot URLs, the county display name, a computed countdown to `end_time`, the MDI
/// icon identifier and an external deep link - never the raw upstream camera/icon URLs.
#[derive(Debug,Serialize)]
struct BrokerMessage {
    /// a sanitized clone of the entity with `enrichment.external_camera_url` cleared, so the
    /// raw upstream camera URL never reaches the broker payload (§4.8, §9).
    #[serde(flatten)]
    entity: Entity,
    icon_url: Option<String>,
    snapshot_url: Option<String>,
    region: &'static str,
    timeout: i64,
    mdi_icon: &'static str,
    deep_link: String,
}

fn build_broker_message (entity: &Entity, base_url: &str)->BrokerMessage {
    let timeout = entity.end_time()
        .map(|end| (end - chrono::Utc::now()).num_seconds().max(0))
        .unwrap_or(0);

    let icon_url = entity.icon_id().map(|id| rewrite_icon_url(base_url, id));
    let snapshot_url = entity.enrichment().snapshot_path.as_deref().map(|p| rewrite_snapshot_url(base_url, p));
    let region = county_name(entity.county_no());
    let mdi_icon = mdi_icon(entity);
    let deep_link = format!("{}/{}", base_url.trim_end_matches('/'), deep_link_path(entity));

    let mut sanitized = entity.clone();
    sanitized.enrichment_mut().external_camera_url = None;

    BrokerMessage { entity: sanitized, icon_url, snapshot_url, region, timeout, mdi_icon, deep_link }
}

/// per-viewer SSE queue capacity; beyond this the oldest queued item is dropped (§4.8, §9 open question)
pub const SSE_QUEUE_CAPACITY: usize = 256;

pub type ClientId = String;

/// a bounded, single-producer single-consumer queue with newest-wins drop-oldest back-pressure;
/// `tokio::sync::mpsc` has no such policy, so viewers are backed by this instead (§4.8, §9).
pub struct ViewerQueue {
    items: Mutex<VecDeque<Entity>>,
    notify: Notify,
}

impl ViewerQueue {
    fn new ()->Arc<Self> {
        Arc::new(ViewerQueue { items: Mutex::new(VecDeque::with_capacity(SSE_QUEUE_CAPACITY)), notify: Notify::new() })
    }

    fn push (&self, entity: Entity) {
        let mut items = self.items.lock().unwrap();
        if items.len() >= SSE_QUEUE_CAPACITY {
            items.pop_front();
        }
        items.push_back(entity);
        drop(items);
        self.notify.notify_one();
    }

    /// awaits the next entity; multiple concurrent callers are not supported (single consumer per viewer)
    pub async fn recv (&self)->Entity {
        loop {
            if let Some(entity) = self.items.lock().unwrap().pop_front() {
                return entity;
            }
            self.notify.notified().await;
        }
    }
}

pub struct Broadcaster {
    viewers: DashMap<ClientId,Arc<ViewerQueue>>,
    mqtt: Option<AsyncClient>,
    incident_topic: String,
    road_condition_topic: String,
    push: PushDispatcher,
    /// used to rewrite icon/snapshot URLs and build the deep link in outbound broker messages (§6)
    base_url: String,
}

impl Broadcaster {
    pub fn new (mqtt: Option<AsyncClient>, incident_topic: impl Into<String>, road_condition_topic: impl Into<String>, push: PushDispatcher, base_url: impl Into<String>)->Self {
        Broadcaster {
            viewers: DashMap::new(),
            mqtt,
            incident_topic: incident_topic.into(),
            road_condition_topic: road_condition_topic.into(),
            push,
            base_url: base_url.into(),
        }
    }

    /// connects a rumqttc client/eventloop pair for `mqtt_enabled` configurations; the eventloop
    /// must be polled by the caller (typically spawned as its own task) or the client stalls.
    pub fn connect_mqtt (host: &str, port: u16, client_id: &str, username: Option<&str>, password: Option<&str>)->(AsyncClient,rumqttc::EventLoop) {
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(u),Some(p)) = (username,password) {
            options.set_credentials(u, p);
        }
        AsyncClient::new(options, 64)
    }

    /// register a new SSE viewer; returns its queue handle.
    pub fn register_viewer (&self, client_id: ClientId)->Arc<ViewerQueue> {
        let queue = ViewerQueue::new();
        self.viewers.insert(client_id, queue.clone());
        queue
    }

    pub fn unregister_viewer (&self, client_id: &str) {
        self.viewers.remove(client_id);
    }

    pub fn viewer_count (&self)->usize { self.viewers.len() }

    /// the VAPID public key new push subscribers need to call `PushManager.subscribe` (§6)
    pub fn vapid_public_key (&self)->&str { self.push.public_key_b64() }

    /// fan out one committed entity to all three sinks. SSE delivery never fails the call; a
    /// full queue drops the oldest item for that viewer (newest-wins, §4.8). Subscriptions the
    /// push service reports as gone are collected in `gone_endpoints` for the caller to evict
    /// from the store (§4.9, §7) - `Broadcaster` itself does not own `EventStore`.
    pub async fn publish (&self, entity: &Entity, subscriptions: &[PushSubscription])->Result<PublishOutcome> {
        self.fan_out_sse(entity);
        let published_to_broker = self.publish_to_broker(entity).await;

        let mut push_deliveries = 0usize;
        let mut gone_endpoints = Vec::new();
        for sub in subscriptions {
            if push_eligible(entity, sub) {
                match self.push.deliver(sub, entity).await {
                    Ok(()) => push_deliveries += 1,
                    Err(crate::errors::OdinTrafikinfoError::SubscriptionGone(endpoint)) => gone_endpoints.push(endpoint),
                    Err(_) => {}
                }
            }
        }

        Ok(PublishOutcome { published_to_broker, push_deliveries, gone_endpoints })
    }

    fn fan_out_sse (&self, entity: &Entity) {
        for viewer in self.viewers.iter() {
            viewer.push(entity.clone());
        }
    }

    async fn publish_to_broker (&self, entity: &Entity)->bool {
        let Some(mqtt) = &self.mqtt else { return false };
        let topic = match entity {
            Entity::Incident(_) => &self.incident_topic,
            Entity::RoadCondition(_) => &self.road_condition_topic,
        };
        let message = build_broker_message(entity, &self.base_url);
        let Ok(payload) = serde_json::to_vec(&message) else { return false };
        mqtt.publish(topic, QoS::AtLeastOnce, false, payload).await.is_ok()
    }
}

pub struct PublishOutcome {
    pub published_to_broker: bool,
    pub push_deliveries: usize,
    pub gone_endpoints: Vec<String>,
}

/// §4.8 push-sink predicate: county (if configured), topic flag, and severity floor for incidents.
fn push_eligible (entity: &Entity, sub: &PushSubscription)->bool {
    if !sub.counties.is_empty() && !sub.counties.contains(&entity.county_no()) {
        return false;
    }

    match entity {
        Entity::Incident(incident) => {
            if !sub.topic_realtid { return false }
            incident.severity_code >= sub.min_severity
        }
        Entity::RoadCondition(_) => sub.topic_road_condition,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Incident;
    use chrono::Utc;
    use std::collections::HashSet;

    fn incident (county_no: i32, severity_code: i32)->Entity {
        let now = Utc::now();
        Entity::Incident(Incident {
            external_id: "E1".to_string(), title: "t".to_string(), description: "d".to_string(),
            location: "l".to_string(), icon_id: None, message_type: "roadwork".to_string(), severity_code,
            severity_text: "".to_string(), road_number: None, start_time: None, end_time: None,
            latitude: None, longitude: None, county_no, temporary_limit: "".to_string(),
            traffic_restriction_type: "".to_string(), enrichment: crate::model::Enrichment::default(),
            created_at: now, updated_at: now, published_to_broker: false,
        })
    }

    fn subscription (counties: &[i32], min_severity: i32)->PushSubscription {
        PushSubscription {
            endpoint: "https://push.example/1".to_string(), p256dh: "k".to_string(), auth: "a".to_string(),
            counties: counties.iter().copied().collect(), min_severity, topic_realtid: true,
            topic_road_condition: true, sound_enabled: true,
        }
    }

    #[test]
    fn s5_county_and_severity_filter_exactly_one_delivery() {
        // mirrors S5: counties={4}, min_severity=3, topic_realtid=1
        let sub = subscription(&[4], 3);

        assert!(!push_eligible(&incident(1, 5), &sub)); // wrong county
        assert!(!push_eligible(&incident(4, 2), &sub)); // below severity floor
        assert!(push_eligible(&incident(4, 4), &sub));  // eligible
    }

    #[test]
    fn disabled_topic_flag_blocks_delivery_regardless_of_county_or_severity() {
        let mut sub = subscription(&[4], 1);
        sub.topic_realtid = false;
        assert!(!push_eligible(&incident(4, 5), &sub));
    }

    #[test]
    fn empty_county_set_matches_every_county() {
        let sub = subscription(&[], 1);
        assert!(push_eligible(&incident(99, 1), &sub));
    }

    fn road_condition (county_no: i32, condition_code: i32)->Entity {
        let now = Utc::now();
        Entity::RoadCondition(crate::model::RoadCondition {
            id: "RC1".to_string(), condition_code, condition_text: "".to_string(), measure: "".to_string(),
            warning: "".to_string(), cause: "".to_string(), location_text: "".to_string(), road_number: None,
            start_time: None, end_time: None, latitude: None, longitude: None, county_no, timestamp: None,
            road_temperature: None, friction: None, ice_depth_mm: None, snow_depth_mm: None, water_film_mm: None,
            enrichment: crate::model::Enrichment::default(), created_at: now, updated_at: now, published_to_broker: false,
        })
    }

    #[test]
    fn broker_message_looks_up_county_display_name() {
        let msg = build_broker_message(&incident(12, 3), "http://localhost:8080");
        assert_eq!(msg.region, "Skåne");

        let msg = build_broker_message(&incident(999, 3), "http://localhost:8080");
        assert_eq!(msg.region, "Okänt län");
    }

    #[test]
    fn broker_message_timeout_counts_seconds_to_end_time_and_floors_at_zero() {
        let mut ent = incident(1, 3);
        if let Entity::Incident(i) = &mut ent {
            i.end_time = Some(Utc::now() + chrono::Duration::seconds(120));
        }
        let msg = build_broker_message(&ent, "http://localhost:8080");
        assert!(msg.timeout > 0 && msg.timeout <= 120);

        // no end_time at all
        let msg = build_broker_message(&incident(1, 3), "http://localhost:8080");
        assert_eq!(msg.timeout, 0);

        // end_time already in the past must not go negative
        let mut past = incident(1, 3);
        if let Entity::Incident(i) = &mut past {
            i.end_time = Some(Utc::now() - chrono::Duration::seconds(60));
        }
        let msg = build_broker_message(&past, "http://localhost:8080");
        assert_eq!(msg.timeout, 0);
    }

    #[test]
    fn broker_message_maps_incident_icon_id_to_mdi_dictionary_with_fallback() {
        let mut ent = incident(1, 3);
        if let Entity::Incident(i) = &mut ent {
            i.icon_id = Some("accident".to_string());
        }
        assert_eq!(mdi_icon(&ent), "mdi:car-emergency");

        let mut unknown = incident(1, 3);
        if let Entity::Incident(i) = &mut unknown {
            i.icon_id = Some("something_unmapped".to_string());
        }
        assert_eq!(mdi_icon(&unknown), "mdi:alert");

        assert_eq!(mdi_icon(&incident(1, 3)), "mdi:alert"); // no icon_id at all
    }

    #[test]
    fn broker_message_maps_road_condition_codes_to_mdi_dictionary() {
        assert_eq!(mdi_icon(&road_condition(1, 2)), "mdi:water");
        assert_eq!(mdi_icon(&road_condition(1, 99)), "mdi:alert");
    }

    #[test]
    fn broker_message_deep_link_distinguishes_incidents_from_road_conditions() {
        let msg = build_broker_message(&incident(1, 3), "http://localhost:8080");
        assert_eq!(msg.deep_link, "http://localhost:8080/event/E1");

        let msg = build_broker_message(&road_condition(1, 1), "http://localhost:8080/");
        assert_eq!(msg.deep_link, "http://localhost:8080/road-condition/RC1");
    }

    #[test]
    fn broker_message_rewrites_icon_and_snapshot_urls_instead_of_leaking_upstream_ones() {
        let mut ent = incident(1, 3);
        if let Entity::Incident(i) = &mut ent {
            i.icon_id = Some("roadwork".to_string());
            i.enrichment.snapshot_path = Some("abc.jpg".to_string());
            i.enrichment.external_camera_url = Some("https://secret.trafikverket.se/cam/1".to_string());
        }
        let msg = build_broker_message(&ent, "http://localhost:8080");
        assert_eq!(msg.icon_url.as_deref(), Some("http://localhost:8080/api/icons/roadwork"));
        assert_eq!(msg.snapshot_url.as_deref(), Some("http://localhost:8080/api/snapshots/abc.jpg"));

        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("secret.trafikverket.se"));
    }

    #[test]
    fn broker_message_has_no_icon_or_snapshot_url_when_unenriched() {
        let msg = build_broker_message(&incident(1, 3), "http://localhost:8080");
        assert_eq!(msg.icon_url, None);
        assert_eq!(msg.snapshot_url, None);
    }
}
