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

//! attaches nearest-camera snapshots and nearest-weather observation to a normalized entity (§4.6).

use crate::errors::Result;
use crate::model::{Entity,ExtraCamera,WeatherSnapshot};
use crate::snapshot::SnapshotStore;
use crate::spatial::SpatialIndex;

/// weather stations farther than this from the entity are not attached
pub const WEATHER_RADIUS_KM: f64 = 20.0;
/// primary + up to this many extra cameras are requested per entity
pub const MAX_CAMERAS: usize = 5;

pub struct Enricher {
    spatial: std::sync::Arc<SpatialIndex>,
    snapshots: SnapshotStore,
    camera_radius_km: f64,
}

impl Enricher {
    pub fn new (spatial: std::sync::Arc<SpatialIndex>, snapshots: SnapshotStore, camera_radius_km: f64)->Self {
        Enricher { spatial, snapshots, camera_radius_km }
    }

    /// §4.6 `needs_camera_sync` predicate: (a) new, (b) no extra_cameras recorded, (c) any
    /// extra-camera row missing its snapshot, (d) coordinates changed since the prior state.
    pub fn needs_camera_sync (entity: &Entity, prior: Option<&Entity>)->bool {
        let Some(prior) = prior else { return true };

        let enrichment = prior.enrichment();
        if enrichment.extra_cameras.is_empty() { return true }
        if enrichment.extra_cameras.iter().any(|c| c.snapshot_path.is_none()) { return true }

        entity.latitude() != prior.latitude() || entity.longitude() != prior.longitude()
    }

    /// runs the full enrichment pass; returns whether a camera sync was performed.
    pub async fn enrich (&self, entity: &mut Entity, prior: Option<&Entity>)->Result<bool> {
        let did_sync = Self::needs_camera_sync(entity, prior);
        if did_sync {
            self.sync_cameras(entity).await?;
        }
        self.attach_weather(entity);
        Ok(did_sync)
    }

    async fn sync_cameras (&self, entity: &mut Entity)->Result<()> {
        let (Some(lat), Some(lon)) = (entity.latitude(), entity.longitude()) else { return Ok(()) };
        let road = entity.road_number().map(|s| s.to_string());
        let county_no = entity.county_no();

        let candidates = self.spatial.nearby_cameras(lat, lon, road.as_deref(), self.camera_radius_km, MAX_CAMERAS);
        let mut iter = candidates.into_iter();

        let primary = iter.next();
        let mut extra_cameras = Vec::new();

        let entity_id = entity_id_for_snapshots(entity);

        let (primary_camera_id, primary_camera_name, primary_snapshot, primary_external_url) = if let Some(cam) = primary {
            let snapshot = self.snapshots.save(
                cam.photo_url.as_deref().unwrap_or(""),
                cam.fullsize_url.as_deref(),
                &entity_id,
                county_no,
            ).await?;
            let external_url = cam.fullsize_url.clone().or_else(|| cam.photo_url.clone());
            (Some(cam.id), Some(cam.name), snapshot, external_url)
        } else {
            (None, None, None, None)
        };

        for cam in iter {
            let suffix = sanitize_camera_id(&cam.id);
            let sub_entity_id = format!("{entity_id}_{suffix}");
            let snapshot = self.snapshots.save(
                cam.photo_url.as_deref().unwrap_or(""),
                cam.fullsize_url.as_deref(),
                &sub_entity_id,
                county_no,
            ).await?;
            extra_cameras.push(ExtraCamera { id: cam.id, name: cam.name, snapshot_path: snapshot });
        }

        let enrichment = entity.enrichment_mut();
        enrichment.camera_id = primary_camera_id;
        enrichment.camera_name = primary_camera_name;
        enrichment.snapshot_path = primary_snapshot;
        enrichment.extra_cameras = extra_cameras;
        enrichment.external_camera_url = primary_external_url;
        Ok(())
    }

    /// weather enrichment never fails the pass on a miss - absence of a nearby station just
    /// leaves `weather` unset.
    fn attach_weather (&self, entity: &mut Entity) {
        let (Some(lat), Some(lon)) = (entity.latitude(), entity.longitude()) else { return };
        let station = self.spatial.nearest_station(lat, lon, WEATHER_RADIUS_KM);
        entity.enrichment_mut().weather = station.and_then(|s| {
            Some(WeatherSnapshot {
                temp: s.air_temperature?,
                wind_speed: s.wind_speed?,
                wind_dir: compass_to_degrees(s.wind_direction.as_deref()),
            })
        });
    }
}

fn entity_id_for_snapshots (entity: &Entity)->String {
    match entity {
        Entity::Incident(i) => i.external_id.clone(),
        Entity::RoadCondition(r) => r.id.clone(),
    }
}

fn sanitize_camera_id (id: &str)->String {
    id.chars().map(|c| if c.is_ascii_alphanumeric() { c } else { '_' }).collect()
}

fn compass_to_degrees (dir: Option<&str>)->f64 {
    match dir.unwrap_or("") {
        "N" => 0.0, "NO" => 45.0, "O" => 90.0, "SO" => 135.0,
        "S" => 180.0, "SV" => 225.0, "V" => 270.0, "NV" => 315.0,
        _ => 0.0,
    }
}

/// constructs the externally published absolute snapshot URL; the stored path stays relative.
pub fn rewrite_snapshot_url (base_url: &str, snapshot_path: &str)->String {
    format!("{}/api/snapshots/{}", base_url.trim_end_matches('/'), snapshot_path)
}

/// constructs the externally published absolute icon URL for a fixed icon id.
pub fn rewrite_icon_url (base_url: &str, icon_id: &str)->String {
    format!("{}/api/icons/{}", base_url.trim_end_matches('/'), icon_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Camera,CameraType,Enrichment,Incident,WeatherStation};
    use chrono::Utc;

    fn base_incident (lat: f64, lon: f64)->Incident {
        let now = Utc::now();
        Incident {
            external_id: "E1".to_string(), title: "t".to_string(), description: "d".to_string(),
            location: "l".to_string(), icon_id: None, message_type: "roadwork".to_string(), severity_code: 3,
            severity_text: "".to_string(), road_number: Some("E4".to_string()), start_time: None, end_time: None,
            latitude: Some(lat), longitude: Some(lon), county_no: 1, temporary_limit: "".to_string(),
            traffic_restriction_type: "".to_string(), enrichment: Enrichment::default(),
            created_at: now, updated_at: now, published_to_broker: false,
        }
    }

    #[test]
    fn new_entity_always_needs_camera_sync() {
        let e = Entity::Incident(base_incident(59.3, 18.0));
        assert!(Enricher::needs_camera_sync(&e, None));
    }

    #[test]
    fn unchanged_coordinates_with_complete_cameras_skip_sync() {
        // mirrors the real pipeline: a freshly normalized entity always carries default
        // enrichment, so the predicate must consult the prior stored entity's enrichment.
        let mut prior_incident = base_incident(59.3, 18.0);
        prior_incident.enrichment.extra_cameras = vec![ExtraCamera { id: "c1".into(), name: "n".into(), snapshot_path: Some("1/x.jpg".into()) }];
        let prior = Entity::Incident(prior_incident);
        let entity = Entity::Incident(base_incident(59.3, 18.0));
        assert!(!Enricher::needs_camera_sync(&entity, Some(&prior)));
    }

    #[test]
    fn coordinate_change_forces_resync() {
        let prior = Entity::Incident({
            let mut i = base_incident(59.3, 18.0);
            i.enrichment.extra_cameras = vec![ExtraCamera { id: "c1".into(), name: "n".into(), snapshot_path: Some("1/x.jpg".into()) }];
            i
        });
        let moved = Entity::Incident(base_incident(59.9, 18.9));
        assert!(Enricher::needs_camera_sync(&moved, Some(&prior)));
    }

    #[test]
    fn missing_snapshot_on_extra_camera_forces_resync() {
        let mut prior_incident = base_incident(59.3, 18.0);
        prior_incident.enrichment.extra_cameras = vec![ExtraCamera { id: "c1".into(), name: "n".into(), snapshot_path: None }];
        let prior = Entity::Incident(prior_incident);
        let entity = Entity::Incident(base_incident(59.3, 18.0));
        assert!(Enricher::needs_camera_sync(&entity, Some(&prior)));
    }

    #[tokio::test]
    async fn camera_radius_exceeded_leaves_no_primary_camera() {
        // mirrors S3: a 7km camera beyond a 5.0 radius yields no primary camera
        let spatial = std::sync::Arc::new(SpatialIndex::new());
        spatial.set_cameras(vec![Camera {
            id: "far".to_string(), name: "E4 Syd".to_string(), camera_type: CameraType::RoadCamera,
            photo_url: None, fullsize_url: None, photo_time: None, latitude: 59.40, longitude: 18.07,
            county_no: 1, is_favorite: false,
        }]);
        let snapshots = SnapshotStore::new(reqwest::Client::new(), std::env::temp_dir());
        let enricher = Enricher::new(spatial, snapshots, 5.0);

        let mut entity = Entity::Incident(base_incident(59.33, 18.07));
        enricher.sync_cameras(&mut entity).await.unwrap();
        assert!(entity.enrichment().camera_id.is_none());
    }

    #[test]
    fn weather_station_without_readings_is_not_attached() {
        let spatial = std::sync::Arc::new(SpatialIndex::new());
        spatial.set_stations(vec![WeatherStation {
            id: "s1".to_string(), latitude: 59.3, longitude: 18.0, county_no: 1,
            air_temperature: None, wind_speed: None, wind_direction: None, last_updated: None,
        }]);
        let snapshots = SnapshotStore::new(reqwest::Client::new(), std::env::temp_dir());
        let enricher = Enricher::new(spatial, snapshots, 8.0);

        let mut entity = Entity::Incident(base_incident(59.3, 18.0));
        enricher.attach_weather(&mut entity);
        assert!(entity.enrichment().weather.is_none());
    }
}
