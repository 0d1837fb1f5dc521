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

//! domain model for the traffic-information aggregator. `Entity` replaces the dynamically
//! typed event dicts of the source with a tagged variant shared by both object kinds.

use std::collections::HashSet;
use chrono::{DateTime,Utc};
use serde::{Serialize,Deserialize};

/// nearest-camera/weather enrichment, shared by both Incident and RoadCondition
#[derive(Debug,Clone,Default,Serialize,Deserialize,PartialEq)]
pub struct Enrichment {
    pub camera_id: Option<String>,
    pub camera_name: Option<String>,
    pub snapshot_path: Option<String>,
    pub extra_cameras: Vec<ExtraCamera>,
    pub weather: Option<WeatherSnapshot>,
    /// upstream camera image URL, never leaked to broker/push payloads
    pub external_camera_url: Option<String>,
}

#[derive(Debug,Clone,Serialize,Deserialize,PartialEq)]
pub struct ExtraCamera {
    pub id: String,
    pub name: String,
    pub snapshot_path: Option<String>,
}

#[derive(Debug,Clone,Copy,Serialize,Deserialize,PartialEq)]
pub struct WeatherSnapshot {
    pub temp: f64,
    pub wind_speed: f64,
    pub wind_dir: f64,
}

#[derive(Debug,Clone,Serialize,Deserialize,PartialEq)]
pub struct Incident {
    pub external_id: String,
    pub title: String,
    pub description: String,
    pub location: String,
    pub icon_id: Option<String>,
    pub message_type: String,
    pub severity_code: i32,
    pub severity_text: String,
    pub road_number: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub county_no: i32,
    pub temporary_limit: String,
    pub traffic_restriction_type: String,

    #[serde(flatten)]
    pub enrichment: Enrichment,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub published_to_broker: bool,
}

impl Incident {
    /// the subset of fields that participate in the EventStore change-detection rule (§4.5)
    pub fn significant_fields (&self)->SignificantIncidentFields {
        SignificantIncidentFields {
            title: self.title.clone(),
            description: self.description.clone(),
            location: self.location.clone(),
            severity_code: self.severity_code,
            message_type: self.message_type.clone(),
            temporary_limit: self.temporary_limit.clone(),
            traffic_restriction_type: self.traffic_restriction_type.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }
}

#[derive(Debug,Clone,PartialEq)]
pub struct SignificantIncidentFields {
    pub title: String,
    pub description: String,
    pub location: String,
    pub severity_code: i32,
    pub message_type: String,
    pub temporary_limit: String,
    pub traffic_restriction_type: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// immutable pre-change snapshot of an Incident, appended whenever a significant field changes
#[derive(Debug,Clone,Serialize,Deserialize,PartialEq)]
pub struct IncidentVersion {
    pub external_id: String,
    pub version_timestamp: DateTime<Utc>,
    pub title: String,
    pub description: String,
    pub location: String,
    pub severity_code: i32,
    pub message_type: String,
    pub temporary_limit: String,
    pub traffic_restriction_type: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug,Clone,Serialize,Deserialize,PartialEq)]
pub struct RoadCondition {
    /// upstream id - unstable, see dedup rule in §3
    pub id: String,
    pub condition_code: i32,
    pub condition_text: String,
    pub measure: String,
    pub warning: String,
    pub cause: String,
    pub location_text: String,
    pub road_number: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub county_no: i32,
    pub timestamp: Option<DateTime<Utc>>,

    // supplemental road-surface weather measurements (§10.2) - optional, never defaulted to zero
    #[serde(default)]
    pub road_temperature: Option<f64>,
    #[serde(default)]
    pub friction: Option<f64>,
    #[serde(default)]
    pub ice_depth_mm: Option<f64>,
    #[serde(default)]
    pub snow_depth_mm: Option<f64>,
    #[serde(default)]
    pub water_film_mm: Option<f64>,

    #[serde(flatten)]
    pub enrichment: Enrichment,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub published_to_broker: bool,
}

impl RoadCondition {
    /// the dedup key used when an incoming row carries an unknown `id` (§3)
    pub fn dedup_key (&self)->Option<RoadConditionDedupKey> {
        let road_number = self.road_number.clone()?;
        let start_time = self.start_time?;
        Some(RoadConditionDedupKey { road_number, condition_code: self.condition_code, county_no: self.county_no, start_time })
    }

    pub fn significant_fields (&self)->SignificantRoadConditionFields {
        SignificantRoadConditionFields {
            condition_code: self.condition_code,
            condition_text: self.condition_text.clone(),
            measure: self.measure.clone(),
            warning: self.warning.clone(),
            cause: self.cause.clone(),
            location_text: self.location_text.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }
}

#[derive(Debug,Clone,PartialEq,Eq,Hash)]
pub struct RoadConditionDedupKey {
    pub road_number: String,
    pub condition_code: i32,
    pub county_no: i32,
    pub start_time: DateTime<Utc>,
}

#[derive(Debug,Clone,PartialEq)]
pub struct SignificantRoadConditionFields {
    pub condition_code: i32,
    pub condition_text: String,
    pub measure: String,
    pub warning: String,
    pub cause: String,
    pub location_text: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug,Clone,Serialize,Deserialize,PartialEq)]
pub struct RoadConditionVersion {
    pub id: String,
    pub version_timestamp: DateTime<Utc>,
    pub condition_code: i32,
    pub condition_text: String,
    pub measure: String,
    pub warning: String,
    pub cause: String,
    pub location_text: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// tagged variant replacing the source's dynamically-typed event dicts (§9)
#[derive(Debug,Clone,Serialize,Deserialize,PartialEq)]
#[serde(tag = "kind")]
pub enum Entity {
    Incident(Incident),
    RoadCondition(RoadCondition),
}

impl Entity {
    pub fn county_no (&self)->i32 {
        match self {
            Entity::Incident(i) => i.county_no,
            Entity::RoadCondition(r) => r.county_no,
        }
    }

    pub fn enrichment (&self)->&Enrichment {
        match self {
            Entity::Incident(i) => &i.enrichment,
            Entity::RoadCondition(r) => &r.enrichment,
        }
    }

    pub fn enrichment_mut (&mut self)->&mut Enrichment {
        match self {
            Entity::Incident(i) => &mut i.enrichment,
            Entity::RoadCondition(r) => &mut r.enrichment,
        }
    }

    pub fn latitude (&self)->Option<f64> {
        match self {
            Entity::Incident(i) => i.latitude,
            Entity::RoadCondition(r) => r.latitude,
        }
    }

    pub fn longitude (&self)->Option<f64> {
        match self {
            Entity::Incident(i) => i.longitude,
            Entity::RoadCondition(r) => r.longitude,
        }
    }

    pub fn road_number (&self)->Option<&str> {
        match self {
            Entity::Incident(i) => i.road_number.as_deref(),
            Entity::RoadCondition(r) => r.road_number.as_deref(),
        }
    }

    pub fn severity_code (&self)->Option<i32> {
        match self {
            Entity::Incident(i) => Some(i.severity_code),
            Entity::RoadCondition(_) => None,
        }
    }

    pub fn end_time (&self)->Option<DateTime<Utc>> {
        match self {
            Entity::Incident(i) => i.end_time,
            Entity::RoadCondition(r) => r.end_time,
        }
    }

    /// the stable key used for deep links: `external_id` for incidents, `id` for road conditions
    pub fn id (&self)->&str {
        match self {
            Entity::Incident(i) => &i.external_id,
            Entity::RoadCondition(r) => &r.id,
        }
    }

    pub fn icon_id (&self)->Option<&str> {
        match self {
            Entity::Incident(i) => i.icon_id.as_deref(),
            Entity::RoadCondition(_) => None,
        }
    }
}

#[derive(Debug,Clone,Copy,Serialize,Deserialize,PartialEq,Eq)]
#[serde(rename_all = "camelCase")]
pub enum CameraType {
    RoadCamera,
    FlowCamera,
}

#[derive(Debug,Clone,Serialize,Deserialize,PartialEq)]
pub struct Camera {
    pub id: String,
    pub name: String,
    pub camera_type: CameraType,
    pub photo_url: Option<String>,
    pub fullsize_url: Option<String>,
    pub photo_time: Option<DateTime<Utc>>,
    pub latitude: f64,
    pub longitude: f64,
    pub county_no: i32,
    pub is_favorite: bool,
}

#[derive(Debug,Clone,Serialize,Deserialize,PartialEq)]
pub struct WeatherStation {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub county_no: i32,
    pub air_temperature: Option<f64>,
    pub wind_speed: Option<f64>,
    /// compass letters, e.g. "NV", "SO"
    pub wind_direction: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug,Clone,Serialize,Deserialize,PartialEq)]
pub struct PushSubscription {
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    pub counties: HashSet<i32>,
    pub min_severity: i32,
    pub topic_realtid: bool,
    pub topic_road_condition: bool,
    #[serde(default = "default_sound_enabled")]
    pub sound_enabled: bool,
}

fn default_sound_enabled()->bool { true }

#[derive(Debug,Clone,Serialize,Deserialize,PartialEq)]
pub struct ClientInterest {
    pub client_id: String,
    pub counties: HashSet<i32>,
    pub last_active: DateTime<Utc>,
}

/// admin-mutable key/value settings, mirroring the configuration keys of §6/§10.4
#[derive(Debug,Clone,Default,Serialize,Deserialize,PartialEq)]
pub struct Settings {
    pub values: std::collections::HashMap<String,String>,
}

impl Settings {
    pub fn get (&self, key: &str)->Option<&str> { self.values.get(key).map(|s| s.as_str()) }

    pub fn get_f64 (&self, key: &str, default: f64)->f64 {
        self.values.get(key).and_then(|s| s.parse().ok()).unwrap_or(default)
    }
}
