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

//! persistent store of incidents, road conditions and their version history (§4.5).
//!
//! the schema is declared once and evolved through an ordered, idempotent list of migration
//! statements (§9's redesign flag) rather than the source's incremental ALTER TABLE probing.

use chrono::{DateTime,Utc};
use sqlx::{sqlite::SqlitePoolOptions, Row, SqlitePool};
use std::path::Path;

use crate::errors::Result;
use crate::model::{Camera,CameraType,Enrichment,ExtraCamera,Incident,IncidentVersion,RoadCondition,RoadConditionDedupKey,RoadConditionVersion,WeatherSnapshot,WeatherStation};

/// the declared schema, as an ordered list of idempotent statements. New columns are added as
/// new, appended entries - never as in-place `ALTER TABLE` inspection hacks.
const MIGRATIONS: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS incidents (
        external_id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        description TEXT NOT NULL,
        location TEXT NOT NULL,
        icon_id TEXT,
        message_type TEXT NOT NULL,
        severity_code INTEGER NOT NULL,
        severity_text TEXT NOT NULL,
        road_number TEXT,
        start_time TEXT,
        end_time TEXT,
        latitude REAL,
        longitude REAL,
        county_no INTEGER NOT NULL,
        temporary_limit TEXT NOT NULL,
        traffic_restriction_type TEXT NOT NULL,
        camera_id TEXT,
        camera_name TEXT,
        snapshot_path TEXT,
        extra_cameras TEXT NOT NULL DEFAULT '[]',
        weather TEXT,
        external_camera_url TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        published_to_broker INTEGER NOT NULL DEFAULT 0
    )"#,
    r#"CREATE TABLE IF NOT EXISTS incident_versions (
        external_id TEXT NOT NULL,
        version_timestamp TEXT NOT NULL,
        title TEXT NOT NULL,
        description TEXT NOT NULL,
        location TEXT NOT NULL,
        severity_code INTEGER NOT NULL,
        message_type TEXT NOT NULL,
        temporary_limit TEXT NOT NULL,
        traffic_restriction_type TEXT NOT NULL,
        start_time TEXT,
        end_time TEXT,
        PRIMARY KEY (external_id, version_timestamp)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS road_conditions (
        id TEXT PRIMARY KEY,
        condition_code INTEGER NOT NULL,
        condition_text TEXT NOT NULL,
        measure TEXT NOT NULL,
        warning TEXT NOT NULL,
        cause TEXT NOT NULL,
        location_text TEXT NOT NULL,
        road_number TEXT,
        start_time TEXT,
        end_time TEXT,
        latitude REAL,
        longitude REAL,
        county_no INTEGER NOT NULL,
        timestamp TEXT,
        road_temperature REAL,
        friction REAL,
        ice_depth_mm REAL,
        snow_depth_mm REAL,
        water_film_mm REAL,
        camera_id TEXT,
        camera_name TEXT,
        snapshot_path TEXT,
        extra_cameras TEXT NOT NULL DEFAULT '[]',
        weather TEXT,
        external_camera_url TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        published_to_broker INTEGER NOT NULL DEFAULT 0
    )"#,
    r#"CREATE TABLE IF NOT EXISTS road_condition_versions (
        id TEXT NOT NULL,
        version_timestamp TEXT NOT NULL,
        condition_code INTEGER NOT NULL,
        condition_text TEXT NOT NULL,
        measure TEXT NOT NULL,
        warning TEXT NOT NULL,
        cause TEXT NOT NULL,
        location_text TEXT NOT NULL,
        start_time TEXT,
        end_time TEXT,
        PRIMARY KEY (id, version_timestamp)
    )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_road_conditions_dedup
        ON road_conditions (road_number, condition_code, county_no, start_time)"#,
    r#"CREATE TABLE IF NOT EXISTS cameras (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        camera_type TEXT NOT NULL,
        photo_url TEXT,
        fullsize_url TEXT,
        photo_time TEXT,
        latitude REAL NOT NULL,
        longitude REAL NOT NULL,
        county_no INTEGER NOT NULL,
        is_favorite INTEGER NOT NULL DEFAULT 0
    )"#,
    r#"CREATE TABLE IF NOT EXISTS weather_stations (
        id TEXT PRIMARY KEY,
        latitude REAL NOT NULL,
        longitude REAL NOT NULL,
        county_no INTEGER NOT NULL,
        air_temperature REAL,
        wind_speed REAL,
        wind_direction TEXT,
        last_updated TEXT
    )"#,
    r#"CREATE TABLE IF NOT EXISTS push_subscriptions (
        endpoint TEXT PRIMARY KEY,
        p256dh TEXT NOT NULL,
        auth TEXT NOT NULL,
        counties TEXT NOT NULL DEFAULT '[]',
        min_severity INTEGER NOT NULL DEFAULT 1,
        topic_realtid INTEGER NOT NULL DEFAULT 1,
        topic_road_condition INTEGER NOT NULL DEFAULT 1,
        sound_enabled INTEGER NOT NULL DEFAULT 1
    )"#,
    r#"CREATE TABLE IF NOT EXISTS client_interests (
        client_id TEXT PRIMARY KEY,
        counties TEXT NOT NULL DEFAULT '[]',
        last_active TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )"#,
];

pub async fn connect (db_path: &Path)->Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        odin_common::fs::ensure_dir(parent)?;
    }
    let url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new().max_connections(5).connect(&url).await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

pub async fn run_migrations (pool: &SqlitePool)->Result<()> {
    for stmt in MIGRATIONS {
        sqlx::query(stmt).execute(pool).await?;
    }
    Ok(())
}

/// outcome of a single entity write, used to decide whether the Broadcaster/version-history
/// invariants fire (§8 invariant 1 and 7)
#[derive(Debug,Clone,Copy,PartialEq,Eq)]
pub enum ChangeKind {
    Inserted,
    UpdatedSignificant,
    UpdatedMinor,
}

pub struct EventStore {
    pool: SqlitePool,
}

impl EventStore {
    pub fn new (pool: SqlitePool)->Self { EventStore { pool } }

    pub fn pool (&self)->&SqlitePool { &self.pool }

    /// apply the §4.5 change-detection rule to one Incident, inside one transaction
    pub async fn upsert_incident (&self, mut incident: Incident)->Result<(Incident,ChangeKind)> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query("SELECT * FROM incidents WHERE external_id = ?")
            .bind(&incident.external_id)
            .fetch_optional(&mut *tx)
            .await?;

        let kind = match existing {
            None => {
                let now = Utc::now();
                incident.created_at = now;
                incident.updated_at = now;
                insert_incident(&mut tx, &incident).await?;
                ChangeKind::Inserted
            }
            Some(row) => {
                let prior = incident_from_row(&row)?;
                let significant = prior.significant_fields() != incident.significant_fields();

                // enrichment and coordinates are always carried through regardless of significance
                incident.created_at = prior.created_at;
                incident.published_to_broker = prior.published_to_broker;
                if incident.enrichment == Enrichment::default() {
                    incident.enrichment = prior.enrichment.clone();
                }

                if significant {
                    let version = IncidentVersion {
                        external_id: prior.external_id.clone(),
                        version_timestamp: Utc::now(),
                        title: prior.title,
                        description: prior.description,
                        location: prior.location,
                        severity_code: prior.severity_code,
                        message_type: prior.message_type,
                        temporary_limit: prior.temporary_limit,
                        traffic_restriction_type: prior.traffic_restriction_type,
                        start_time: prior.start_time,
                        end_time: prior.end_time,
                    };
                    insert_incident_version(&mut tx, &version).await?;
                    incident.updated_at = Utc::now();
                } else {
                    incident.updated_at = prior.updated_at;
                }

                update_incident(&mut tx, &incident).await?;
                if significant { ChangeKind::UpdatedSignificant } else { ChangeKind::UpdatedMinor }
            }
        };

        tx.commit().await?;
        Ok((incident, kind))
    }

    /// apply the change-detection + dedup-by-match rule to one RoadCondition (§3, §4.5)
    pub async fn upsert_road_condition (&self, mut rc: RoadCondition)->Result<(RoadCondition,ChangeKind)> {
        let mut tx = self.pool.begin().await?;

        let mut existing = sqlx::query("SELECT * FROM road_conditions WHERE id = ?")
            .bind(&rc.id)
            .fetch_optional(&mut *tx)
            .await?;

        if existing.is_none() {
            if let Some(key) = rc.dedup_key() {
                existing = find_dedup_match(&mut tx, &key).await?;
            }
        }

        let kind = match existing {
            None => {
                let now = Utc::now();
                rc.created_at = now;
                rc.updated_at = now;
                insert_road_condition(&mut tx, &rc).await?;
                ChangeKind::Inserted
            }
            Some(row) => {
                let prior = road_condition_from_row(&row)?;
                // dedup match: keep the existing row's stable id, not the incoming (rotated) one
                rc.id = prior.id.clone();

                let significant = prior.significant_fields() != rc.significant_fields();

                rc.created_at = prior.created_at;
                rc.published_to_broker = prior.published_to_broker;
                if rc.enrichment == Enrichment::default() {
                    rc.enrichment = prior.enrichment.clone();
                }

                if significant {
                    let version = RoadConditionVersion {
                        id: prior.id.clone(),
                        version_timestamp: Utc::now(),
                        condition_code: prior.condition_code,
                        condition_text: prior.condition_text,
                        measure: prior.measure,
                        warning: prior.warning,
                        cause: prior.cause,
                        location_text: prior.location_text,
                        start_time: prior.start_time,
                        end_time: prior.end_time,
                    };
                    insert_road_condition_version(&mut tx, &version).await?;
                    rc.updated_at = Utc::now();
                } else {
                    rc.updated_at = prior.updated_at;
                }

                update_road_condition(&mut tx, &rc).await?;
                if significant { ChangeKind::UpdatedSignificant } else { ChangeKind::UpdatedMinor }
            }
        };

        tx.commit().await?;
        Ok((rc, kind))
    }

    pub async fn mark_published_to_broker_incident (&self, external_id: &str)->Result<()> {
        sqlx::query("UPDATE incidents SET published_to_broker = 1 WHERE external_id = ?")
            .bind(external_id).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn mark_published_to_broker_road_condition (&self, id: &str)->Result<()> {
        sqlx::query("UPDATE road_conditions SET published_to_broker = 1 WHERE id = ?")
            .bind(id).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn upsert_cameras (&self, cameras: Vec<Camera>)->Result<()> {
        let mut tx = self.pool.begin().await?;
        for cam in cameras {
            // is_favorite is UI-owned and must survive a sync (§3 Camera lifecycle)
            let existing_favorite: Option<bool> = sqlx::query("SELECT is_favorite FROM cameras WHERE id = ?")
                .bind(&cam.id).fetch_optional(&mut *tx).await?
                .map(|row| row.get::<i64,_>("is_favorite") != 0);

            let is_favorite = existing_favorite.unwrap_or(cam.is_favorite);

            sqlx::query(r#"
                INSERT INTO cameras (id,name,camera_type,photo_url,fullsize_url,photo_time,latitude,longitude,county_no,is_favorite)
                VALUES (?,?,?,?,?,?,?,?,?,?)
                ON CONFLICT(id) DO UPDATE SET
                    name=excluded.name, camera_type=excluded.camera_type, photo_url=excluded.photo_url,
                    fullsize_url=excluded.fullsize_url, photo_time=excluded.photo_time,
                    latitude=excluded.latitude, longitude=excluded.longitude, county_no=excluded.county_no,
                    is_favorite=?
            "#)
                .bind(&cam.id).bind(&cam.name).bind(camera_type_str(cam.camera_type))
                .bind(&cam.photo_url).bind(&cam.fullsize_url).bind(cam.photo_time.map(|t| t.to_rfc3339()))
                .bind(cam.latitude).bind(cam.longitude).bind(cam.county_no).bind(is_favorite)
                .bind(is_favorite)
                .execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn load_cameras (&self)->Result<Vec<Camera>> {
        let rows = sqlx::query("SELECT * FROM cameras").fetch_all(&self.pool).await?;
        rows.iter().map(camera_from_row).collect()
    }

    pub async fn toggle_camera_favorite (&self, id: &str)->Result<bool> {
        let current: i64 = sqlx::query("SELECT is_favorite FROM cameras WHERE id = ?")
            .bind(id).fetch_one(&self.pool).await?.get("is_favorite");
        let new_value = current == 0;
        sqlx::query("UPDATE cameras SET is_favorite = ? WHERE id = ?")
            .bind(new_value).bind(id).execute(&self.pool).await?;
        Ok(new_value)
    }

    pub async fn upsert_weather_stations (&self, stations: Vec<WeatherStation>)->Result<()> {
        let mut tx = self.pool.begin().await?;
        for s in stations {
            sqlx::query(r#"
                INSERT INTO weather_stations (id,latitude,longitude,county_no,air_temperature,wind_speed,wind_direction,last_updated)
                VALUES (?,?,?,?,?,?,?,?)
                ON CONFLICT(id) DO UPDATE SET
                    latitude=excluded.latitude, longitude=excluded.longitude, county_no=excluded.county_no,
                    air_temperature=excluded.air_temperature, wind_speed=excluded.wind_speed,
                    wind_direction=excluded.wind_direction, last_updated=excluded.last_updated
            "#)
                .bind(&s.id).bind(s.latitude).bind(s.longitude).bind(s.county_no)
                .bind(s.air_temperature).bind(s.wind_speed).bind(&s.wind_direction)
                .bind(s.last_updated.map(|t| t.to_rfc3339()))
                .execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn load_weather_stations (&self)->Result<Vec<WeatherStation>> {
        let rows = sqlx::query("SELECT * FROM weather_stations").fetch_all(&self.pool).await?;
        rows.iter().map(weather_station_from_row).collect()
    }

    pub async fn upsert_push_subscription (&self, sub: &crate::model::PushSubscription)->Result<()> {
        let counties: Vec<i32> = sub.counties.iter().copied().collect();
        sqlx::query(r#"
            INSERT INTO push_subscriptions (endpoint,p256dh,auth,counties,min_severity,topic_realtid,topic_road_condition,sound_enabled)
            VALUES (?,?,?,?,?,?,?,?)
            ON CONFLICT(endpoint) DO UPDATE SET
                p256dh=excluded.p256dh, auth=excluded.auth, counties=excluded.counties, min_severity=excluded.min_severity,
                topic_realtid=excluded.topic_realtid, topic_road_condition=excluded.topic_road_condition,
                sound_enabled=excluded.sound_enabled
        "#)
            .bind(&sub.endpoint).bind(&sub.p256dh).bind(&sub.auth)
            .bind(serde_json::to_string(&counties).unwrap())
            .bind(sub.min_severity).bind(sub.topic_realtid).bind(sub.topic_road_condition).bind(sub.sound_enabled)
            .execute(&self.pool).await?;
        Ok(())
    }

    pub async fn delete_push_subscription (&self, endpoint: &str)->Result<()> {
        sqlx::query("DELETE FROM push_subscriptions WHERE endpoint = ?").bind(endpoint).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn load_push_subscriptions (&self)->Result<Vec<crate::model::PushSubscription>> {
        let rows = sqlx::query("SELECT * FROM push_subscriptions").fetch_all(&self.pool).await?;
        rows.iter().map(push_subscription_from_row).collect()
    }

    /// registers or refreshes one live viewer's watched counties (§4.7, `/api/client/interest`)
    pub async fn upsert_client_interest (&self, interest: &crate::model::ClientInterest)->Result<()> {
        let counties: Vec<i32> = interest.counties.iter().copied().collect();
        sqlx::query(r#"
            INSERT INTO client_interests (client_id,counties,last_active)
            VALUES (?,?,?)
            ON CONFLICT(client_id) DO UPDATE SET counties=excluded.counties, last_active=excluded.last_active
        "#)
            .bind(&interest.client_id)
            .bind(serde_json::to_string(&counties).unwrap())
            .bind(interest.last_active.to_rfc3339())
            .execute(&self.pool).await?;
        Ok(())
    }

    pub async fn load_client_interests (&self)->Result<Vec<crate::model::ClientInterest>> {
        let rows = sqlx::query("SELECT * FROM client_interests").fetch_all(&self.pool).await?;
        rows.iter().map(client_interest_from_row).collect()
    }

    /// drops viewers that have not refreshed their interest within `max_age` - stale tabs should
    /// not keep an upstream stream open forever (§4.7)
    pub async fn prune_stale_client_interests (&self, max_age: chrono::Duration)->Result<()> {
        let cutoff = (Utc::now() - max_age).to_rfc3339();
        sqlx::query("DELETE FROM client_interests WHERE last_active < ?").bind(cutoff).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn get_setting (&self, key: &str)->Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = ?").bind(key).fetch_optional(&self.pool).await?;
        Ok(row.map(|r| r.get::<String,_>("value")))
    }

    pub async fn set_setting (&self, key: &str, value: &str)->Result<()> {
        sqlx::query(r#"
            INSERT INTO settings (key,value) VALUES (?,?)
            ON CONFLICT(key) DO UPDATE SET value=excluded.value
        "#).bind(key).bind(value).execute(&self.pool).await?;
        Ok(())
    }

    /// loads the full admin-mutable settings map (§3 Settings, §6 `/api/settings`)
    pub async fn load_settings (&self)->Result<crate::model::Settings> {
        let rows = sqlx::query("SELECT key, value FROM settings").fetch_all(&self.pool).await?;
        let values = rows.iter().map(|r| (r.get::<String,_>("key"), r.get::<String,_>("value"))).collect();
        Ok(crate::model::Settings { values })
    }

    /// single incident lookup, used by the pipeline to fetch the prior version before enrichment
    pub async fn get_incident (&self, external_id: &str)->Result<Option<Incident>> {
        let row = sqlx::query("SELECT * FROM incidents WHERE external_id = ?")
            .bind(external_id).fetch_optional(&self.pool).await?;
        row.as_ref().map(incident_from_row).transpose()
    }

    /// single road condition lookup, used by the pipeline to fetch the prior version before enrichment
    pub async fn get_road_condition (&self, id: &str)->Result<Option<RoadCondition>> {
        let row = sqlx::query("SELECT * FROM road_conditions WHERE id = ?")
            .bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(road_condition_from_row).transpose()
    }

    /// current incidents, optionally filtered to a county subset (§6 `/api/events`)
    pub async fn list_incidents (&self, counties: Option<&[i32]>)->Result<Vec<Incident>> {
        let rows = sqlx::query("SELECT * FROM incidents ORDER BY updated_at DESC").fetch_all(&self.pool).await?;
        rows.iter().map(incident_from_row).collect::<Result<Vec<_>>>()
            .map(|incidents| filter_by_county(incidents, counties, |i| i.county_no))
    }

    pub async fn list_road_conditions (&self, counties: Option<&[i32]>)->Result<Vec<RoadCondition>> {
        let rows = sqlx::query("SELECT * FROM road_conditions ORDER BY updated_at DESC").fetch_all(&self.pool).await?;
        rows.iter().map(road_condition_from_row).collect::<Result<Vec<_>>>()
            .map(|conditions| filter_by_county(conditions, counties, |r| r.county_no))
    }

    /// the version history of one incident, oldest first (§6 `/api/events/{id}/history`)
    pub async fn incident_history (&self, external_id: &str)->Result<Vec<IncidentVersion>> {
        let rows = sqlx::query("SELECT * FROM incident_versions WHERE external_id = ? ORDER BY version_timestamp ASC")
            .bind(external_id).fetch_all(&self.pool).await?;
        rows.iter().map(incident_version_from_row).collect()
    }
}

fn filter_by_county<T> (items: Vec<T>, counties: Option<&[i32]>, county_of: impl Fn(&T)->i32)->Vec<T> {
    match counties {
        Some(cs) if !cs.is_empty() => items.into_iter().filter(|i| cs.contains(&county_of(i))).collect(),
        _ => items,
    }
}

fn client_interest_from_row (row: &sqlx::sqlite::SqliteRow)->Result<crate::model::ClientInterest> {
    let counties_json: String = row.try_get("counties")?;
    let counties: Vec<i32> = serde_json::from_str(&counties_json).unwrap_or_default();
    Ok(crate::model::ClientInterest {
        client_id: row.try_get("client_id")?,
        counties: counties.into_iter().collect(),
        last_active: parse_dt(row.try_get("last_active")?).unwrap_or_else(Utc::now),
    })
}

fn incident_version_from_row (row: &sqlx::sqlite::SqliteRow)->Result<IncidentVersion> {
    Ok(IncidentVersion {
        external_id: row.try_get("external_id")?,
        version_timestamp: parse_dt(row.try_get("version_timestamp")?).unwrap_or_else(Utc::now),
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        location: row.try_get("location")?,
        severity_code: row.try_get("severity_code")?,
        message_type: row.try_get("message_type")?,
        temporary_limit: row.try_get("temporary_limit")?,
        traffic_restriction_type: row.try_get("traffic_restriction_type")?,
        start_time: parse_dt(row.try_get("start_time")?),
        end_time: parse_dt(row.try_get("end_time")?),
    })
}

fn push_subscription_from_row (row: &sqlx::sqlite::SqliteRow)->Result<crate::model::PushSubscription> {
    let counties_json: String = row.try_get("counties")?;
    let counties: Vec<i32> = serde_json::from_str(&counties_json).unwrap_or_default();
    Ok(crate::model::PushSubscription {
        endpoint: row.try_get("endpoint")?,
        p256dh: row.try_get("p256dh")?,
        auth: row.try_get("auth")?,
        counties: counties.into_iter().collect(),
        min_severity: row.try_get("min_severity")?,
        topic_realtid: row.try_get::<i64,_>("topic_realtid")? != 0,
        topic_road_condition: row.try_get::<i64,_>("topic_road_condition")? != 0,
        sound_enabled: row.try_get::<i64,_>("sound_enabled")? != 0,
    })
}

fn camera_type_str (t: CameraType)->&'static str {
    match t { CameraType::RoadCamera => "roadCamera", CameraType::FlowCamera => "flowCamera" }
}

fn camera_type_from_str (s: &str)->CameraType {
    if s == "flowCamera" { CameraType::FlowCamera } else { CameraType::RoadCamera }
}

fn parse_dt (s: Option<String>)->Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|dt| dt.with_timezone(&Utc))
}

fn enrichment_from_row (row: &sqlx::sqlite::SqliteRow)->sqlx::Result<Enrichment> {
    let extra_cameras_json: String = row.try_get("extra_cameras")?;
    let extra_cameras: Vec<ExtraCamera> = serde_json::from_str(&extra_cameras_json).unwrap_or_default();
    let weather_json: Option<String> = row.try_get("weather")?;
    let weather: Option<WeatherSnapshot> = weather_json.and_then(|s| serde_json::from_str(&s).ok());

    Ok(Enrichment {
        camera_id: row.try_get("camera_id")?,
        camera_name: row.try_get("camera_name")?,
        snapshot_path: row.try_get("snapshot_path")?,
        extra_cameras,
        weather,
        external_camera_url: row.try_get("external_camera_url")?,
    })
}

fn incident_from_row (row: &sqlx::sqlite::SqliteRow)->Result<Incident> {
    Ok(Incident {
        external_id: row.try_get("external_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        location: row.try_get("location")?,
        icon_id: row.try_get("icon_id")?,
        message_type: row.try_get("message_type")?,
        severity_code: row.try_get("severity_code")?,
        severity_text: row.try_get("severity_text")?,
        road_number: row.try_get("road_number")?,
        start_time: parse_dt(row.try_get("start_time")?),
        end_time: parse_dt(row.try_get("end_time")?),
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        county_no: row.try_get("county_no")?,
        temporary_limit: row.try_get("temporary_limit")?,
        traffic_restriction_type: row.try_get("traffic_restriction_type")?,
        enrichment: enrichment_from_row(row)?,
        created_at: parse_dt(row.try_get("created_at")?).unwrap_or_else(Utc::now),
        updated_at: parse_dt(row.try_get("updated_at")?).unwrap_or_else(Utc::now),
        published_to_broker: row.try_get::<i64,_>("published_to_broker")? != 0,
    })
}

fn road_condition_from_row (row: &sqlx::sqlite::SqliteRow)->Result<RoadCondition> {
    Ok(RoadCondition {
        id: row.try_get("id")?,
        condition_code: row.try_get("condition_code")?,
        condition_text: row.try_get("condition_text")?,
        measure: row.try_get("measure")?,
        warning: row.try_get("warning")?,
        cause: row.try_get("cause")?,
        location_text: row.try_get("location_text")?,
        road_number: row.try_get("road_number")?,
        start_time: parse_dt(row.try_get("start_time")?),
        end_time: parse_dt(row.try_get("end_time")?),
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        county_no: row.try_get("county_no")?,
        timestamp: parse_dt(row.try_get("timestamp")?),
        road_temperature: row.try_get("road_temperature")?,
        friction: row.try_get("friction")?,
        ice_depth_mm: row.try_get("ice_depth_mm")?,
        snow_depth_mm: row.try_get("snow_depth_mm")?,
        water_film_mm: row.try_get("water_film_mm")?,
        enrichment: enrichment_from_row(row)?,
        created_at: parse_dt(row.try_get("created_at")?).unwrap_or_else(Utc::now),
        updated_at: parse_dt(row.try_get("updated_at")?).unwrap_or_else(Utc::now),
        published_to_broker: row.try_get::<i64,_>("published_to_broker")? != 0,
    })
}

fn camera_from_row (row: &sqlx::sqlite::SqliteRow)->Result<Camera> {
    Ok(Camera {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        camera_type: camera_type_from_str(&row.try_get::<String,_>("camera_type")?),
        photo_url: row.try_get("photo_url")?,
        fullsize_url: row.try_get("fullsize_url")?,
        photo_time: parse_dt(row.try_get("photo_time")?),
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        county_no: row.try_get("county_no")?,
        is_favorite: row.try_get::<i64,_>("is_favorite")? != 0,
    })
}

fn weather_station_from_row (row: &sqlx::sqlite::SqliteRow)->Result<WeatherStation> {
    Ok(WeatherStation {
        id: row.try_get("id")?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        county_no: row.try_get("county_no")?,
        air_temperature: row.try_get("air_temperature")?,
        wind_speed: row.try_get("wind_speed")?,
        wind_direction: row.try_get("wind_direction")?,
        last_updated: parse_dt(row.try_get("last_updated")?),
    })
}

async fn find_dedup_match (tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, key: &RoadConditionDedupKey)->Result<Option<sqlx::sqlite::SqliteRow>> {
    let row = sqlx::query("SELECT * FROM road_conditions WHERE road_number = ? AND condition_code = ? AND county_no = ? AND start_time = ?")
        .bind(&key.road_number).bind(key.condition_code).bind(key.county_no).bind(key.start_time.to_rfc3339())
        .fetch_optional(&mut **tx)
        .await?;
    Ok(row)
}

async fn insert_incident (tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, i: &Incident)->Result<()> {
    sqlx::query(r#"
        INSERT INTO incidents (external_id,title,description,location,icon_id,message_type,severity_code,severity_text,
            road_number,start_time,end_time,latitude,longitude,county_no,temporary_limit,traffic_restriction_type,
            camera_id,camera_name,snapshot_path,extra_cameras,weather,external_camera_url,created_at,updated_at,published_to_broker)
        VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)
    "#)
        .bind(&i.external_id).bind(&i.title).bind(&i.description).bind(&i.location).bind(&i.icon_id)
        .bind(&i.message_type).bind(i.severity_code).bind(&i.severity_text).bind(&i.road_number)
        .bind(i.start_time.map(|t| t.to_rfc3339())).bind(i.end_time.map(|t| t.to_rfc3339()))
        .bind(i.latitude).bind(i.longitude).bind(i.county_no).bind(&i.temporary_limit).bind(&i.traffic_restriction_type)
        .bind(&i.enrichment.camera_id).bind(&i.enrichment.camera_name).bind(&i.enrichment.snapshot_path)
        .bind(serde_json::to_string(&i.enrichment.extra_cameras).unwrap())
        .bind(i.enrichment.weather.map(|w| serde_json::to_string(&w).unwrap()))
        .bind(&i.enrichment.external_camera_url)
        .bind(i.created_at.to_rfc3339()).bind(i.updated_at.to_rfc3339()).bind(i.published_to_broker)
        .execute(&mut **tx).await?;
    Ok(())
}

async fn update_incident (tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, i: &Incident)->Result<()> {
    sqlx::query(r#"
        UPDATE incidents SET title=?, description=?, location=?, icon_id=?, message_type=?, severity_code=?,
            severity_text=?, road_number=?, start_time=?, end_time=?, latitude=?, longitude=?, county_no=?,
            temporary_limit=?, traffic_restriction_type=?, camera_id=?, camera_name=?, snapshot_path=?,
            extra_cameras=?, weather=?, external_camera_url=?, updated_at=?, published_to_broker=?
        WHERE external_id=?
    "#)
        .bind(&i.title).bind(&i.description).bind(&i.location).bind(&i.icon_id).bind(&i.message_type)
        .bind(i.severity_code).bind(&i.severity_text).bind(&i.road_number)
        .bind(i.start_time.map(|t| t.to_rfc3339())).bind(i.end_time.map(|t| t.to_rfc3339()))
        .bind(i.latitude).bind(i.longitude).bind(i.county_no).bind(&i.temporary_limit).bind(&i.traffic_restriction_type)
        .bind(&i.enrichment.camera_id).bind(&i.enrichment.camera_name).bind(&i.enrichment.snapshot_path)
        .bind(serde_json::to_string(&i.enrichment.extra_cameras).unwrap())
        .bind(i.enrichment.weather.map(|w| serde_json::to_string(&w).unwrap()))
        .bind(&i.enrichment.external_camera_url)
        .bind(i.updated_at.to_rfc3339()).bind(i.published_to_broker)
        .bind(&i.external_id)
        .execute(&mut **tx).await?;
    Ok(())
}

async fn insert_incident_version (tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, v: &IncidentVersion)->Result<()> {
    sqlx::query(r#"
        INSERT INTO incident_versions (external_id,version_timestamp,title,description,location,severity_code,
            message_type,temporary_limit,traffic_restriction_type,start_time,end_time)
        VALUES (?,?,?,?,?,?,?,?,?,?,?)
    "#)
        .bind(&v.external_id).bind(v.version_timestamp.to_rfc3339()).bind(&v.title).bind(&v.description)
        .bind(&v.location).bind(v.severity_code).bind(&v.message_type).bind(&v.temporary_limit)
        .bind(&v.traffic_restriction_type)
        .bind(v.start_time.map(|t| t.to_rfc3339())).bind(v.end_time.map(|t| t.to_rfc3339()))
        .execute(&mut **tx).await?;
    Ok(())
}

async fn insert_road_condition (tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, r: &RoadCondition)->Result<()> {
    sqlx::query(r#"
        INSERT INTO road_conditions (id,condition_code,condition_text,measure,warning,cause,location_text,
            road_number,start_time,end_time,latitude,longitude,county_no,timestamp,
            road_temperature,friction,ice_depth_mm,snow_depth_mm,water_film_mm,
            camera_id,camera_name,snapshot_path,extra_cameras,weather,external_camera_url,created_at,updated_at,published_to_broker)
        VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)
    "#)
        .bind(&r.id).bind(r.condition_code).bind(&r.condition_text).bind(&r.measure).bind(&r.warning)
        .bind(&r.cause).bind(&r.location_text).bind(&r.road_number)
        .bind(r.start_time.map(|t| t.to_rfc3339())).bind(r.end_time.map(|t| t.to_rfc3339()))
        .bind(r.latitude).bind(r.longitude).bind(r.county_no).bind(r.timestamp.map(|t| t.to_rfc3339()))
        .bind(r.road_temperature).bind(r.friction).bind(r.ice_depth_mm).bind(r.snow_depth_mm).bind(r.water_film_mm)
        .bind(&r.enrichment.camera_id).bind(&r.enrichment.camera_name).bind(&r.enrichment.snapshot_path)
        .bind(serde_json::to_string(&r.enrichment.extra_cameras).unwrap())
        .bind(r.enrichment.weather.map(|w| serde_json::to_string(&w).unwrap()))
        .bind(&r.enrichment.external_camera_url)
        .bind(r.created_at.to_rfc3339()).bind(r.updated_at.to_rfc3339()).bind(r.published_to_broker)
        .execute(&mut **tx).await?;
    Ok(())
}

async fn update_road_condition (tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, r: &RoadCondition)->Result<()> {
    sqlx::query(r#"
        UPDATE road_conditions SET condition_code=?, condition_text=?, measure=?, warning=?, cause=?, location_text=?,
            road_number=?, start_time=?, end_time=?, latitude=?, longitude=?, county_no=?, timestamp=?,
            road_temperature=?, friction=?, ice_depth_mm=?, snow_depth_mm=?, water_film_mm=?,
            camera_id=?, camera_name=?, snapshot_path=?, extra_cameras=?, weather=?, external_camera_url=?,
            updated_at=?, published_to_broker=?
        WHERE id=?
    "#)
        .bind(r.condition_code).bind(&r.condition_text).bind(&r.measure).bind(&r.warning).bind(&r.cause)
        .bind(&r.location_text).bind(&r.road_number)
        .bind(r.start_time.map(|t| t.to_rfc3339())).bind(r.end_time.map(|t| t.to_rfc3339()))
        .bind(r.latitude).bind(r.longitude).bind(r.county_no).bind(r.timestamp.map(|t| t.to_rfc3339()))
        .bind(r.road_temperature).bind(r.friction).bind(r.ice_depth_mm).bind(r.snow_depth_mm).bind(r.water_film_mm)
        .bind(&r.enrichment.camera_id).bind(&r.enrichment.camera_name).bind(&r.enrichment.snapshot_path)
        .bind(serde_json::to_string(&r.enrichment.extra_cameras).unwrap())
        .bind(r.enrichment.weather.map(|w| serde_json::to_string(&w).unwrap()))
        .bind(&r.enrichment.external_camera_url)
        .bind(r.updated_at.to_rfc3339()).bind(r.published_to_broker)
        .bind(&r.id)
        .execute(&mut **tx).await?;
    Ok(())
}

async fn insert_road_condition_version (tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, v: &RoadConditionVersion)->Result<()> {
    sqlx::query(r#"
        INSERT INTO road_condition_versions (id,version_timestamp,condition_code,condition_text,measure,warning,cause,
            location_text,start_time,end_time)
        VALUES (?,?,?,?,?,?,?,?,?,?)
    "#)
        .bind(&v.id).bind(v.version_timestamp.to_rfc3339()).bind(v.condition_code).bind(&v.condition_text)
        .bind(&v.measure).bind(&v.warning).bind(&v.cause).bind(&v.location_text)
        .bind(v.start_time.map(|t| t.to_rfc3339())).bind(v.end_time.map(|t| t.to_rfc3339()))
        .execute(&mut **tx).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Enrichment;

    async fn memory_store ()->EventStore {
        let pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        EventStore::new(pool)
    }

    fn sample_incident (external_id: &str, title: &str)->Incident {
        let now = Utc::now();
        Incident {
            external_id: external_id.to_string(), title: title.to_string(), description: "d".to_string(),
            location: "l".to_string(), icon_id: None, message_type: "roadwork".to_string(), severity_code: 3,
            severity_text: "".to_string(), road_number: Some("E4".to_string()), start_time: Some(now), end_time: None,
            latitude: Some(59.3), longitude: Some(18.0), county_no: 1, temporary_limit: "".to_string(),
            traffic_restriction_type: "".to_string(), enrichment: Enrichment::default(),
            created_at: now, updated_at: now, published_to_broker: false,
        }
    }

    #[tokio::test]
    async fn inserting_new_incident_creates_no_version_row() {
        let store = memory_store().await;
        let (_, kind) = store.upsert_incident(sample_incident("SE_1", "A")).await.unwrap();
        assert_eq!(kind, ChangeKind::Inserted);

        let count: i64 = sqlx::query("SELECT COUNT(*) as c FROM incident_versions").fetch_one(store.pool()).await.unwrap().get("c");
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn significant_change_appends_exactly_one_version_row() {
        let store = memory_store().await;
        store.upsert_incident(sample_incident("SE_1", "A")).await.unwrap();
        let (_, kind) = store.upsert_incident(sample_incident("SE_1", "B")).await.unwrap();
        assert_eq!(kind, ChangeKind::UpdatedSignificant);

        let count: i64 = sqlx::query("SELECT COUNT(*) as c FROM incident_versions").fetch_one(store.pool()).await.unwrap().get("c");
        assert_eq!(count, 1);

        let (_, kind_again) = store.upsert_incident(sample_incident("SE_1", "B")).await.unwrap();
        assert_eq!(kind_again, ChangeKind::UpdatedMinor);
        let count2: i64 = sqlx::query("SELECT COUNT(*) as c FROM incident_versions").fetch_one(store.pool()).await.unwrap().get("c");
        assert_eq!(count2, 1);
    }

    #[tokio::test]
    async fn road_condition_dedup_updates_existing_row_in_place() {
        let store = memory_store().await;
        let now = Utc::now();
        let existing = RoadCondition {
            id: "360000".to_string(), condition_code: 2, condition_text: "t".to_string(), measure: "".to_string(),
            warning: "".to_string(), cause: "".to_string(), location_text: "".to_string(),
            road_number: Some("E4".to_string()), start_time: Some(now), end_time: None,
            latitude: Some(59.0), longitude: Some(18.0), county_no: 1, timestamp: Some(now),
            road_temperature: None, friction: None, ice_depth_mm: None, snow_depth_mm: None, water_film_mm: None,
            enrichment: Enrichment::default(), created_at: now, updated_at: now, published_to_broker: false,
        };
        store.upsert_road_condition(existing.clone()).await.unwrap();

        let mut incoming = existing.clone();
        incoming.id = "361123".to_string();
        incoming.warning = "updated warning".to_string();

        let (stored, kind) = store.upsert_road_condition(incoming).await.unwrap();
        assert_eq!(stored.id, "360000");
        assert_eq!(kind, ChangeKind::UpdatedSignificant);

        let count: i64 = sqlx::query("SELECT COUNT(*) as c FROM road_conditions").fetch_one(store.pool()).await.unwrap().get("c");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn client_interest_upsert_refreshes_rather_than_duplicates() {
        let store = memory_store().await;
        let interest = crate::model::ClientInterest {
            client_id: "c1".to_string(), counties: [1,4].into_iter().collect(), last_active: Utc::now(),
        };
        store.upsert_client_interest(&interest).await.unwrap();
        store.upsert_client_interest(&interest).await.unwrap();

        let loaded = store.load_client_interests().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].counties, interest.counties);
    }

    #[tokio::test]
    async fn settings_round_trip_through_key_value_store() {
        let store = memory_store().await;
        store.set_setting("camera_radius_km", "8.0").await.unwrap();
        store.set_setting("camera_radius_km", "10.0").await.unwrap();

        assert_eq!(store.get_setting("camera_radius_km").await.unwrap(), Some("10.0".to_string()));
        assert_eq!(store.get_setting("missing_key").await.unwrap(), None);

        let settings = store.load_settings().await.unwrap();
        assert_eq!(settings.get("camera_radius_km"), Some("10.0"));
    }
}
