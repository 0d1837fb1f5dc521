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

//! configuration for the trafikinfo aggregator, loaded from a plain RON file.

use std::{env, fs, path::{Path,PathBuf}};
use serde::{Deserialize,Serialize};
use crate::errors::Result;

pub const DEFAULT_CAMERA_RADIUS_KM: f64 = 8.0;
pub const DEFAULT_WEATHER_RADIUS_KM: f64 = 20.0;
pub const DEFAULT_CONFIG_PATH: &str = "configs/trafikinfo.ron";

#[derive(Deserialize,Serialize,Debug,Clone)]
pub struct TrafikinfoConfig {
    pub api_key: String,

    #[serde(default)]
    pub selected_counties: Vec<u32>,

    #[serde(default = "default_camera_radius_km")]
    pub camera_radius_km: f64,

    #[serde(default)]
    pub mqtt_enabled: bool,
    #[serde(default = "default_mqtt_host")]
    pub mqtt_host: String,
    #[serde(default = "default_mqtt_port")]
    pub mqtt_port: u16,
    #[serde(default)]
    pub mqtt_username: Option<String>,
    #[serde(default)]
    pub mqtt_password: Option<String>,
    #[serde(default = "default_mqtt_topic")]
    pub mqtt_topic: String,
    #[serde(default = "default_mqtt_rc_topic")]
    pub mqtt_rc_topic: String,

    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub admin_password: Option<String>,

    #[serde(default = "default_true")]
    pub push_notifications_enabled: bool,
    #[serde(default = "default_true")]
    pub sound_notifications_enabled: bool,

    #[serde(default)]
    pub vapid_private_key: Option<String>,
    #[serde(default)]
    pub vapid_public_key: Option<String>,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_snapshot_root")]
    pub snapshot_root: PathBuf,
    #[serde(default = "default_icon_root")]
    pub icon_root: PathBuf,
}

fn default_camera_radius_km()->f64 { DEFAULT_CAMERA_RADIUS_KM }
fn default_mqtt_host()->String { "localhost".to_string() }
fn default_mqtt_port()->u16 { 1883 }
fn default_mqtt_topic()->String { "trafikinfo/traffic".to_string() }
fn default_mqtt_rc_topic()->String { "trafikinfo/road_conditions".to_string() }
fn default_retention_days()->u32 { 90 }
fn default_base_url()->String { "http://localhost:8080".to_string() }
fn default_true()->bool { true }
fn default_db_path()->PathBuf { PathBuf::from("data/trafikinfo.db") }
fn default_snapshot_root()->PathBuf { PathBuf::from("data/snapshots") }
fn default_icon_root()->PathBuf { PathBuf::from("data/icons") }

impl TrafikinfoConfig {
    /// admin password is overridable through environment, matching the source's ADMIN_PASSWORD convention
    pub fn effective_admin_password (&self)->Option<String> {
        env::var("ADMIN_PASSWORD").ok().or_else(|| self.admin_password.clone())
    }

    pub fn debug_mode ()->bool {
        env::var("DEBUG_MODE").map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false)
    }
}

/// load a [`TrafikinfoConfig`] from a RON file. The path defaults to [`DEFAULT_CONFIG_PATH`] but can be
/// overridden with the `ODIN_TRAFIKINFO_CONFIG` environment variable.
pub fn load_config (path: Option<&Path>)->Result<TrafikinfoConfig> {
    let path: PathBuf = match path {
        Some(p) => p.to_path_buf(),
        None => env::var("ODIN_TRAFIKINFO_CONFIG").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    };

    let content = fs::read_to_string(&path)?;
    let config: TrafikinfoConfig = ron::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let ron_src = r#"(
            api_key: "abc123",
            selected_counties: [1,4],
        )"#;
        let cfg: TrafikinfoConfig = ron::from_str(ron_src).unwrap();
        assert_eq!(cfg.api_key, "abc123");
        assert_eq!(cfg.camera_radius_km, DEFAULT_CAMERA_RADIUS_KM);
        assert_eq!(cfg.mqtt_topic, "trafikinfo/traffic");
    }
}
