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

//! pure upstream-payload -> domain-entity translation. This is the only module that knows
//! the upstream field names; everything downstream of it only sees [`crate::model::Entity`].

use std::collections::HashMap;
use chrono::{DateTime,Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::model::{Entity,Incident,RoadCondition,Enrichment};

lazy_static! {
    /// icon_id -> Swedish display title, used when no deviation carries a header/message
    static ref ICON_TITLE_MAP: HashMap<&'static str,&'static str> = HashMap::from([
        ("roadwork", "Vägarbete"),
        ("accident", "Trafikolycka"),
        ("roadClosed", "Avstängd väg"),
        ("animal", "Djur på väg"),
        ("obstacle", "Hinder på väg"),
        ("queue", "Kö"),
        ("slippery", "Halt väglag"),
        ("ferryTrafficDisruption", "Färjetrafikstörning"),
        ("publicTransportDisruption", "Kollektivtrafikstörning"),
    ]);

    /// condition_code -> fallback Swedish text when upstream omits ConditionText
    static ref CONDITION_TEXT_MAP: HashMap<i32,&'static str> = HashMap::from([
        (1, "Torr barmark"),
        (2, "Våt barmark"),
        (3, "Snö/is på vägbanan"),
        (4, "Halka"),
    ]);

    /// first coordinate pair of a WKT POINT or LINESTRING: "(lon lat" possibly followed by more pairs
    static ref WKT_COORD_RE: Regex = Regex::new(r"\(\s*(-?\d+(?:\.\d+)?)\s+(-?\d+(?:\.\d+)?)").unwrap();
}

/// one upstream *deviation* within a situation
#[derive(Debug,Clone,Deserialize)]
pub struct RawDeviation {
    #[serde(default)]
    pub header: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, rename = "IconId")]
    pub icon_id: Option<String>,
    #[serde(default, rename = "MessageType")]
    pub message_type: Option<String>,
    #[serde(default, rename = "SeverityCode")]
    pub severity_code: Option<i32>,
    #[serde(default, rename = "SeverityText")]
    pub severity_text: Option<String>,
    #[serde(default, rename = "RoadNumber")]
    pub road_number: Option<String>,
    #[serde(default, rename = "StartTime")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, rename = "EndTime")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, rename = "Geometry")]
    pub geometry: Option<RawGeometry>,
    #[serde(default, rename = "CountyNo")]
    pub county_no: Vec<i32>,
    #[serde(default, rename = "TemporaryLimit")]
    pub temporary_limit: Option<String>,
    #[serde(default, rename = "TrafficRestrictionType")]
    pub traffic_restriction_type: Option<String>,
    #[serde(default, rename = "LocationDescriptor")]
    pub location: Option<String>,
}

#[derive(Debug,Clone,Deserialize)]
pub struct RawGeometry {
    #[serde(rename = "Point")]
    pub point: Option<RawWkt>,
    #[serde(rename = "Line")]
    pub line: Option<RawWkt>,
}

#[derive(Debug,Clone,Deserialize)]
pub struct RawWkt {
    #[serde(rename = "WGS84")]
    pub wgs84: String,
}

/// one upstream *situation*, grouping one or more deviations
#[derive(Debug,Clone,Deserialize)]
pub struct RawSituation {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Deviation", default)]
    pub deviations: Vec<RawDeviation>,
}

#[derive(Debug,Clone,Deserialize)]
pub struct RawRoadCondition {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "ConditionCode")]
    pub condition_code: i32,
    #[serde(default, rename = "ConditionText")]
    pub condition_text: Option<String>,
    #[serde(default, rename = "Measure")]
    pub measure: Option<String>,
    #[serde(default, rename = "Warning")]
    pub warning: Option<String>,
    #[serde(default, rename = "Cause")]
    pub cause: Option<String>,
    #[serde(default, rename = "LocationDescriptor")]
    pub location_text: Option<String>,
    #[serde(default, rename = "RoadNumber")]
    pub road_number: Option<String>,
    #[serde(default, rename = "StartTime")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, rename = "EndTime")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, rename = "Geometry")]
    pub geometry: Option<RawGeometry>,
    #[serde(default, rename = "CountyNo")]
    pub county_no: Vec<i32>,
    #[serde(default, rename = "ModifiedTime")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, rename = "RoadTemperature")]
    pub road_temperature: Option<f64>,
    #[serde(default, rename = "Friction")]
    pub friction: Option<f64>,
    #[serde(default, rename = "IceDepth")]
    pub ice_depth_mm: Option<f64>,
    #[serde(default, rename = "SnowDepth")]
    pub snow_depth_mm: Option<f64>,
    #[serde(default, rename = "WaterFilm")]
    pub water_film_mm: Option<f64>,
}

/// normalize one upstream Situation batch into zero or more Incidents
pub fn normalize_situations (situations: &[RawSituation])->Vec<Entity> {
    situations.iter().filter_map(normalize_situation).map(Entity::Incident).collect()
}

fn normalize_situation (situation: &RawSituation)->Option<Incident> {
    if situation.deviations.is_empty() {
        return None;
    }

    let title = derive_title(situation);
    let description = derive_description(situation);
    let start_time = situation.deviations.iter().filter_map(|d| d.start_time).min();
    let end_time = situation.deviations.iter().filter_map(|d| d.end_time).max();
    let message_type = unique_joined(situation.deviations.iter().filter_map(|d| d.message_type.clone()));
    let traffic_restriction_type = unique_joined(situation.deviations.iter().filter_map(|d| d.traffic_restriction_type.clone()));
    let temporary_limit = unique_joined(situation.deviations.iter().filter_map(|d| d.temporary_limit.clone()));

    let (latitude,longitude) = situation.deviations.iter()
        .find_map(|d| d.geometry.as_ref().and_then(extract_first_coord))
        .map(|(lon,lat)| (Some(lat), Some(lon)))
        .unwrap_or((None,None));

    let county_no = situation.deviations.iter()
        .find_map(|d| d.county_no.first().copied())
        .unwrap_or(0);

    let first = &situation.deviations[0];
    let severity_code = first.severity_code.unwrap_or(3);
    let severity_text = first.severity_text.clone().unwrap_or_default();
    let icon_id = first.icon_id.clone();
    let location = first.location.clone().unwrap_or_default();
    let road_number = situation.deviations.iter().find_map(|d| d.road_number.clone());

    Some(Incident {
        external_id: situation.id.clone(),
        title,
        description,
        location,
        icon_id,
        message_type,
        severity_code,
        severity_text,
        road_number,
        start_time,
        end_time,
        latitude,
        longitude,
        county_no,
        temporary_limit,
        traffic_restriction_type,
        enrichment: Enrichment::default(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
        published_to_broker: false,
    })
}

fn derive_title (situation: &RawSituation)->String {
    for d in &situation.deviations {
        if let Some(h) = &d.header { if !h.is_empty() { return h.clone() } }
        if let Some(m) = &d.message { if !m.is_empty() { return m.clone() } }
    }
    if let Some(icon_id) = situation.deviations.iter().find_map(|d| d.icon_id.as_deref()) {
        if let Some(title) = ICON_TITLE_MAP.get(icon_id) {
            return title.to_string();
        }
    }
    let message_types = unique_joined(situation.deviations.iter().filter_map(|d| d.message_type.clone()));
    if !message_types.is_empty() {
        return message_types;
    }
    "Trafikhändelse".to_string()
}

fn derive_description (situation: &RawSituation)->String {
    let mut seen = Vec::new();
    for d in &situation.deviations {
        if let Some(msg) = &d.message {
            if !msg.is_empty() && !seen.contains(msg) {
                seen.push(msg.clone());
            }
        }
    }
    seen.join(" | ")
}

/// join unique values in first-seen order, mirroring the source's ", "-joined multi-value fields
fn unique_joined (values: impl Iterator<Item = String>)->String {
    let mut seen = Vec::new();
    for v in values {
        if !v.is_empty() && !seen.contains(&v) {
            seen.push(v);
        }
    }
    seen.join(", ")
}

/// extract the first (lon, lat) pair from a WKT POINT or LINESTRING, preferring the point geometry
fn extract_first_coord (geometry: &RawGeometry)->Option<(f64,f64)> {
    let wkt = geometry.point.as_ref().or(geometry.line.as_ref())?;
    extract_first_coord_str(&wkt.wgs84)
}

/// extract the first (lon, lat) pair out of a raw WKT string, used directly by the one-shot
/// camera/weather-station fetches which carry a bare WGS84 string rather than a [`RawGeometry`].
pub(crate) fn extract_first_coord_str (wgs84: &str)->Option<(f64,f64)> {
    let caps = WKT_COORD_RE.captures(wgs84)?;
    let lon: f64 = caps.get(1)?.as_str().parse().ok()?;
    let lat: f64 = caps.get(2)?.as_str().parse().ok()?;
    Some((lon,lat))
}

/// normalize an upstream RoadCondition list - one-to-one mapping with a code->text fallback
pub fn normalize_road_conditions (raw: &[RawRoadCondition])->Vec<Entity> {
    raw.iter().map(normalize_road_condition).map(Entity::RoadCondition).collect()
}

fn normalize_road_condition (raw: &RawRoadCondition)->RoadCondition {
    let condition_text = raw.condition_text.clone()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| CONDITION_TEXT_MAP.get(&raw.condition_code).map(|s| s.to_string()).unwrap_or_default());

    let (latitude,longitude) = raw.geometry.as_ref()
        .and_then(extract_first_coord)
        .map(|(lon,lat)| (Some(lat), Some(lon)))
        .unwrap_or((None,None));

    let county_no = raw.county_no.first().copied().unwrap_or(0);

    RoadCondition {
        id: raw.id.clone(),
        condition_code: raw.condition_code,
        condition_text,
        measure: raw.measure.clone().unwrap_or_default(),
        warning: raw.warning.clone().unwrap_or_default(),
        cause: raw.cause.clone().unwrap_or_default(),
        location_text: raw.location_text.clone().unwrap_or_default(),
        road_number: raw.road_number.clone(),
        start_time: raw.start_time,
        end_time: raw.end_time,
        latitude,
        longitude,
        county_no,
        timestamp: raw.timestamp,
        road_temperature: raw.road_temperature,
        friction: raw.friction,
        ice_depth_mm: raw.ice_depth_mm,
        snow_depth_mm: raw.snow_depth_mm,
        water_film_mm: raw.water_film_mm,
        enrichment: Enrichment::default(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
        published_to_broker: false,
    }
}

/// parses a raw upstream stream envelope (`{"RESPONSE":{"RESULT":[{"<object_name>":[...]}]}}`)
/// for an object type into domain entities. Malformed entries are skipped with a log, the rest
/// of the batch continues (§7 MalformedUpstream).
pub fn normalize_batch (object_name: &str, payload: &Value)->Vec<Entity> {
    let items = match crate::client::extract_result_array(payload, object_name) {
        Ok(items) => items,
        Err(e) => { tracing::warn!("skipping malformed {object_name} batch: {e}"); return Vec::new() }
    };

    match object_name {
        "Situation" => {
            match serde_json::from_value::<Vec<RawSituation>>(Value::Array(items.to_vec())) {
                Ok(situations) => normalize_situations(&situations),
                Err(e) => { tracing::warn!("skipping malformed situation batch: {e}"); Vec::new() }
            }
        }
        "RoadCondition" => {
            match serde_json::from_value::<Vec<RawRoadCondition>>(Value::Array(items.to_vec())) {
                Ok(raw) => normalize_road_conditions(&raw),
                Err(e) => { tracing::warn!("skipping malformed road condition batch: {e}"); Vec::new() }
            }
        }
        other => { tracing::warn!("unrecognized object type in stream payload: {other}"); Vec::new() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dt (h: u32, m: u32)->DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 14, h, m, 0).unwrap()
    }

    #[test]
    fn merges_two_deviations_taking_earliest_start_and_latest_end() {
        let situation = RawSituation {
            id: "SE_STA_12345".to_string(),
            deviations: vec![
                RawDeviation {
                    header: None, message: Some("A".to_string()), icon_id: None, message_type: Some("roadwork".to_string()),
                    severity_code: Some(3), severity_text: None, road_number: Some("E4".to_string()),
                    start_time: Some(dt(10,0)), end_time: Some(dt(12,0)), geometry: None, county_no: vec![1],
                    temporary_limit: None, traffic_restriction_type: None, location: None,
                },
                RawDeviation {
                    header: None, message: Some("B".to_string()), icon_id: None, message_type: Some("roadwork".to_string()),
                    severity_code: Some(3), severity_text: None, road_number: None,
                    start_time: Some(dt(9,30)), end_time: Some(dt(12,45)), geometry: None, county_no: vec![],
                    temporary_limit: None, traffic_restriction_type: None, location: None,
                },
            ],
        };

        let incident = normalize_situation(&situation).unwrap();
        assert_eq!(incident.description, "A | B");
        assert_eq!(incident.start_time, Some(dt(9,30)));
        assert_eq!(incident.end_time, Some(dt(12,45)));
    }

    #[test]
    fn falls_back_to_icon_title_when_no_deviation_text() {
        let situation = RawSituation {
            id: "SE_STA_1".to_string(),
            deviations: vec![RawDeviation {
                header: None, message: None, icon_id: Some("accident".to_string()), message_type: None,
                severity_code: None, severity_text: None, road_number: None,
                start_time: None, end_time: None, geometry: None, county_no: vec![],
                temporary_limit: None, traffic_restriction_type: None, location: None,
            }],
        };
        let incident = normalize_situation(&situation).unwrap();
        assert_eq!(incident.title, "Trafikolycka");
    }

    #[test]
    fn extracts_first_coordinate_from_wkt_point() {
        let geom = RawGeometry { point: Some(RawWkt { wgs84: "POINT (18.07 59.33)".to_string() }), line: None };
        let (lon,lat) = extract_first_coord(&geom).unwrap();
        assert!((lon - 18.07).abs() < 1e-9);
        assert!((lat - 59.33).abs() < 1e-9);
    }

    #[test]
    fn road_condition_falls_back_to_code_table_text() {
        let raw = RawRoadCondition {
            id: "360000".to_string(), condition_code: 2, condition_text: None, measure: None, warning: None,
            cause: None, location_text: None, road_number: Some("E4".to_string()), start_time: Some(dt(6,0)),
            end_time: None, geometry: None, county_no: vec![1], timestamp: None,
            road_temperature: Some(-2.5), friction: Some(0.3), ice_depth_mm: None, snow_depth_mm: None, water_film_mm: None,
        };
        let rc = normalize_road_condition(&raw);
        assert_eq!(rc.condition_text, "Våt barmark");
        assert_eq!(rc.road_temperature, Some(-2.5));
    }
}
