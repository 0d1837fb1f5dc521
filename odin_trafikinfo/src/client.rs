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

//! upstream source client (§4.1): builds the XML query, retrieves the streaming URL, and
//! consumes the newline-delimited `data:` stream with automatic reconnection.
//!
//! `TrafikverketClient` is a configured object constructed before the owning actor has a handle
//! (mirroring the N5 importer's `LiveN5Connector`); the actual stream-consumption task is spawned
//! once `run_stream` is called with a channel to push parsed batches into.

use std::time::Duration;
use async_trait::async_trait;
use quick_xml::events::{BytesEnd,BytesStart,BytesText,Event};
use quick_xml::writer::Writer;
use serde_json::Value;
use futures::StreamExt;
use tokio::io::AsyncBufReadExt;
use tokio::sync::{mpsc,watch};

use crate::errors::{OdinTrafikinfoError,Result};
use crate::model::{Camera,CameraType,WeatherStation};

/// reconnect delay after a stream I/O failure
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// retry delay after a query-construction/authentication failure
pub const QUERY_RETRY_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug,Clone,Copy,PartialEq,Eq)]
pub enum TrafikObjectType {
    Situation,
    RoadCondition,
    Camera,
    WeatherStation,
    Icon,
}

impl TrafikObjectType {
    fn object_name (&self)->&'static str {
        match self {
            TrafikObjectType::Situation => "Situation",
            TrafikObjectType::RoadCondition => "RoadCondition",
            TrafikObjectType::Camera => "Camera",
            TrafikObjectType::WeatherStation => "WeatherMeasurepoint",
            TrafikObjectType::Icon => "Icon",
        }
    }

    /// different object types are queried against different upstream schema revisions
    fn schema_version (&self)->&'static str {
        match self {
            TrafikObjectType::Situation => "1.5",
            TrafikObjectType::RoadCondition => "1.0",
            TrafikObjectType::Camera => "1.0",
            TrafikObjectType::WeatherStation => "2.1",
            TrafikObjectType::Icon => "1.0",
        }
    }
}

/// builds the `<REQUEST><LOGIN/><QUERY><FILTER><OR>...` document for one object type, optionally
/// asking for an SSE stream URL and filtering by county (§6).
pub fn build_query_xml (api_key: &str, object_type: TrafikObjectType, counties: &[u32], want_stream_url: bool)->Result<String> {
    let mut buf = Vec::new();
    let mut writer = Writer::new(&mut buf);

    writer.write_event(Event::Start(BytesStart::new("REQUEST"))).map_err(xml_err)?;

    let mut login = BytesStart::new("LOGIN");
    login.push_attribute(("authenticationkey", api_key));
    writer.write_event(Event::Empty(login)).map_err(xml_err)?;

    let mut query = BytesStart::new("QUERY");
    query.push_attribute(("objecttype", object_type.object_name()));
    query.push_attribute(("schemaversion", object_type.schema_version()));
    if want_stream_url {
        query.push_attribute(("sseurl", "true"));
    }
    writer.write_event(Event::Start(query)).map_err(xml_err)?;

    if !counties.is_empty() {
        writer.write_event(Event::Start(BytesStart::new("FILTER"))).map_err(xml_err)?;
        writer.write_event(Event::Start(BytesStart::new("OR"))).map_err(xml_err)?;
        for county in counties {
            let mut eq = BytesStart::new("EQ");
            eq.push_attribute(("name", "CountyNo"));
            eq.push_attribute(("value", county.to_string().as_str()));
            writer.write_event(Event::Empty(eq)).map_err(xml_err)?;
        }
        writer.write_event(Event::End(BytesEnd::new("OR"))).map_err(xml_err)?;
        writer.write_event(Event::End(BytesEnd::new("FILTER"))).map_err(xml_err)?;
    }

    writer.write_event(Event::End(BytesEnd::new("QUERY"))).map_err(xml_err)?;
    writer.write_event(Event::End(BytesEnd::new("REQUEST"))).map_err(xml_err)?;

    String::from_utf8(buf).map_err(|e| OdinTrafikinfoError::ParseError(format!("non-utf8 query xml: {e}")))
}

fn xml_err (e: quick_xml::Error)->OdinTrafikinfoError {
    OdinTrafikinfoError::ParseError(format!("xml query construction failed: {e}"))
}

/// extracts the SSE stream URL from `RESPONSE.RESULT[0].INFO.SSEURL` (§6)
fn extract_sse_url (response: &Value)->Result<String> {
    response.pointer("/RESPONSE/RESULT/0/INFO/SSEURL")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| OdinTrafikinfoError::UpstreamError("missing RESPONSE.RESULT[0].INFO.SSEURL".to_string()))
}

/// extracts the `RESPONSE.RESULT[0].<object_name>` array from a one-shot (non-streamed) response
pub(crate) fn extract_result_array<'a> (response: &'a Value, object_name: &str)->Result<&'a [Value]> {
    response.pointer(&format!("/RESPONSE/RESULT/0/{object_name}"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .ok_or_else(|| OdinTrafikinfoError::UpstreamError(format!("missing RESPONSE.RESULT[0].{object_name}")))
}

/// strips a leading `data:` framing prefix from one stream line, if present, and parses it as
/// JSON; returns `None` for blank/keepalive lines (§4.1).
pub fn parse_stream_line (line: &str)->Option<Result<Value>> {
    let trimmed = line.trim();
    if trimmed.is_empty() { return None }
    let payload = trimmed.strip_prefix("data:").unwrap_or(trimmed).trim();
    if payload.is_empty() { return None }
    Some(serde_json::from_str(payload).map_err(OdinTrafikinfoError::from))
}

#[async_trait]
pub trait SourceClient: Send + Sync {
    async fn fetch_stream_url (&self, object_type: TrafikObjectType, counties: &[u32])->Result<String>;
    async fn fetch_cameras (&self, counties: &[u32])->Result<Vec<Camera>>;
    async fn fetch_weather_stations (&self, counties: &[u32])->Result<Vec<WeatherStation>>;
    async fn fetch_icon (&self, icon_id: &str)->Result<bytes::Bytes>;
}

pub struct TrafikverketClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl TrafikverketClient {
    pub fn new (http: reqwest::Client, base_url: impl Into<String>, api_key: impl Into<String>)->Self {
        TrafikverketClient { http, base_url: base_url.into(), api_key: api_key.into() }
    }

    async fn post_query (&self, object_type: TrafikObjectType, counties: &[u32], want_stream_url: bool)->Result<Value> {
        let body = build_query_xml(&self.api_key, object_type, counties, want_stream_url)?;
        let response = self.http.post(&self.base_url)
            .header("Content-Type", "text/xml")
            .body(body)
            .send().await?;
        if !response.status().is_success() {
            return Err(OdinTrafikinfoError::UpstreamError(format!("query failed with status {}", response.status())));
        }
        Ok(response.json::<Value>().await?)
    }

    /// runs the reconnecting stream-consumption loop for one object type until `cancel` fires.
    /// Parsed JSON batches are pushed onto `tx`; the loop never returns `Err` - all failures are
    /// contained and retried per §4.1/§7 (TransientUpstream).
    pub async fn run_stream (&self, object_type: TrafikObjectType, counties: Vec<u32>, tx: mpsc::Sender<Value>, mut cancel: watch::Receiver<bool>) {
        loop {
            if *cancel.borrow() { return }

            let url = match self.fetch_stream_url(object_type, &counties).await {
                Ok(url) => url,
                Err(e) => {
                    tracing::warn!("stream url query failed for {:?}: {e}", object_type);
                    if wait_or_cancel(QUERY_RETRY_DELAY, &mut cancel).await { return }
                    continue;
                }
            };

            let response = match self.http.get(&url).send().await {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!("stream connect failed for {:?}: {e}", object_type);
                    if wait_or_cancel(RECONNECT_DELAY, &mut cancel).await { return }
                    continue;
                }
            };

            let stream = response.bytes_stream();
            let reader = tokio_util::io::StreamReader::new(stream.map(|r| r.map_err(std::io::Error::other)));
            let mut lines = tokio::io::BufReader::new(reader).lines();

            tracing::info!("stream connected for {:?}", object_type);
            loop {
                if *cancel.borrow() { return }
                tokio::select! {
                    _ = cancel.changed() => { if *cancel.borrow() { return } }
                    line = lines.next_line() => {
                        match line {
                            Ok(Some(line)) => {
                                if let Some(parsed) = parse_stream_line(&line) {
                                    match parsed {
                                        Ok(value) => { let _ = tx.send(value).await; }
                                        Err(e) => tracing::warn!("malformed stream record for {:?}: {e}", object_type),
                                    }
                                }
                            }
                            Ok(None) => { tracing::warn!("stream closed for {:?}", object_type); break }
                            Err(e) => { tracing::warn!("stream read error for {:?}: {e}", object_type); break }
                        }
                    }
                }
            }

            if wait_or_cancel(RECONNECT_DELAY, &mut cancel).await { return }
        }
    }
}

async fn wait_or_cancel (delay: Duration, cancel: &mut watch::Receiver<bool>)->bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => *cancel.borrow(),
        _ = cancel.changed() => *cancel.borrow(),
    }
}

#[async_trait]
impl SourceClient for TrafikverketClient {
    async fn fetch_stream_url (&self, object_type: TrafikObjectType, counties: &[u32])->Result<String> {
        let response = self.post_query(object_type, counties, true).await?;
        extract_sse_url(&response)
    }

    async fn fetch_cameras (&self, counties: &[u32])->Result<Vec<Camera>> {
        let response = self.post_query(TrafikObjectType::Camera, counties, false).await?;
        let items = extract_result_array(&response, "Camera")?;
        Ok(items.iter().filter_map(parse_camera).collect())
    }

    async fn fetch_weather_stations (&self, counties: &[u32])->Result<Vec<WeatherStation>> {
        let response = self.post_query(TrafikObjectType::WeatherStation, counties, false).await?;
        let items = extract_result_array(&response, "WeatherMeasurepoint")?;
        Ok(items.iter().filter_map(parse_weather_station).collect())
    }

    async fn fetch_icon (&self, icon_id: &str)->Result<bytes::Bytes> {
        let url = format!("{}/api/icon/png/{icon_id}", self.base_url.trim_end_matches('/'));
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(OdinTrafikinfoError::UpstreamError(format!("icon fetch failed with status {}", response.status())));
        }
        Ok(response.bytes().await?)
    }
}

fn parse_camera (v: &Value)->Option<Camera> {
    Some(Camera {
        id: v.get("Id")?.as_str()?.to_string(),
        name: v.get("Name").and_then(Value::as_str).unwrap_or("").to_string(),
        camera_type: if v.get("Type").and_then(Value::as_str) == Some("flowCamera") { CameraType::FlowCamera } else { CameraType::RoadCamera },
        photo_url: v.get("PhotoUrl").and_then(Value::as_str).map(str::to_string),
        fullsize_url: v.get("FullSizePhotoUrl").and_then(Value::as_str).map(str::to_string),
        photo_time: v.get("PhotoTime").and_then(Value::as_str).and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok()).map(|t| t.with_timezone(&chrono::Utc)),
        latitude: v.pointer("/Geometry/WGS84").and_then(Value::as_str).and_then(crate::normalize::extract_first_coord_str).map(|(_,lat)| lat)?,
        longitude: v.pointer("/Geometry/WGS84").and_then(Value::as_str).and_then(crate::normalize::extract_first_coord_str).map(|(lon,_)| lon)?,
        county_no: v.get("CountyNo").and_then(Value::as_array).and_then(|a| a.first()).and_then(Value::as_i64).unwrap_or(0) as i32,
        is_favorite: false,
    })
}

fn parse_weather_station (v: &Value)->Option<WeatherStation> {
    let (lon,lat) = v.pointer("/Geometry/WGS84").and_then(Value::as_str).and_then(crate::normalize::extract_first_coord_str)?;
    Some(WeatherStation {
        id: v.get("Id")?.as_str()?.to_string(),
        latitude: lat,
        longitude: lon,
        county_no: v.get("CountyNo").and_then(Value::as_array).and_then(|a| a.first()).and_then(Value::as_i64).unwrap_or(0) as i32,
        air_temperature: v.pointer("/Observation/Air/Temp").and_then(Value::as_f64),
        wind_speed: v.pointer("/Observation/Wind/Speed").and_then(Value::as_f64),
        wind_direction: v.pointer("/Observation/Wind/DirectionText").and_then(Value::as_str).map(str::to_string),
        last_updated: v.pointer("/Observation/Sample").and_then(Value::as_str).and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok()).map(|t| t.with_timezone(&chrono::Utc)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn query_xml_contains_county_filter_and_auth_key() {
        let xml = build_query_xml("secret", TrafikObjectType::Situation, &[1,4], true).unwrap();
        assert!(xml.contains(r#"authenticationkey="secret""#));
        assert!(xml.contains(r#"objecttype="Situation""#));
        assert!(xml.contains(r#"sseurl="true""#));
        assert!(xml.contains(r#"value="1""#));
        assert!(xml.contains(r#"value="4""#));
    }

    #[test]
    fn query_xml_omits_filter_block_when_no_counties() {
        let xml = build_query_xml("k", TrafikObjectType::Camera, &[], false).unwrap();
        assert!(!xml.contains("<FILTER>"));
    }

    #[test]
    fn extracts_sse_url_from_nested_response() {
        let response = json!({ "RESPONSE": { "RESULT": [ { "INFO": { "SSEURL": "https://stream.example/abc" } } ] } });
        assert_eq!(extract_sse_url(&response).unwrap(), "https://stream.example/abc");
    }

    #[test]
    fn parse_stream_line_strips_data_prefix() {
        let parsed = parse_stream_line(r#"data: {"a":1}"#).unwrap().unwrap();
        assert_eq!(parsed["a"], 1);
    }

    #[test]
    fn parse_stream_line_ignores_blank_keepalive_lines() {
        assert!(parse_stream_line("").is_none());
        assert!(parse_stream_line("   ").is_none());
    }

    #[test]
    fn parse_stream_line_surfaces_malformed_payload_as_error() {
        assert!(parse_stream_line("data: not json").unwrap().is_err());
    }
}
