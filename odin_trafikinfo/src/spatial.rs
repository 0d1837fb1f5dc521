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

//! in-memory nearest-neighbor index over cameras and weather stations. Lists are swapped
//! atomically (whole-slice replace) after each sync so readers always see a consistent snapshot.

use std::sync::RwLock;
use lazy_static::lazy_static;
use regex::Regex;
use odin_common::geo::{GeoLine,GeoPoint};
use uom::si::length::kilometer;

use crate::model::{Camera,WeatherStation};

lazy_static! {
    static ref ROAD_TOKEN_RE: Regex = Regex::new(r"(?i)\b(E\d+|RV\d+|LV\d+|VÄG\d+|LÄN\d+)\b").unwrap();
}

/// great-circle distance in km between two lat/lon points
pub fn haversine_km (lat1: f64, lon1: f64, lat2: f64, lon2: f64)->f64 {
    let a = GeoPoint::from_lon_lat_degrees(lon1, lat1);
    let b = GeoPoint::from_lon_lat_degrees(lon2, lat2);
    GeoLine::from_geo_points(a,b).haversine_distance().get::<kilometer>()
}

/// extract normalized road tokens (e.g. "E4", "RV73") mentioned in free text
fn road_tokens (text: &str)->Vec<String> {
    ROAD_TOKEN_RE.captures_iter(text).map(|c| c[1].to_uppercase()).collect()
}

pub struct SpatialIndex {
    cameras: RwLock<Vec<Camera>>,
    stations: RwLock<Vec<WeatherStation>>,
}

impl SpatialIndex {
    pub fn new ()->Self {
        SpatialIndex { cameras: RwLock::new(Vec::new()), stations: RwLock::new(Vec::new()) }
    }

    /// atomically replace the camera list, e.g. after the 24h camera metadata sync (§4.7)
    pub fn set_cameras (&self, cameras: Vec<Camera>) {
        *self.cameras.write().unwrap() = cameras;
    }

    pub fn set_stations (&self, stations: Vec<WeatherStation>) {
        *self.stations.write().unwrap() = stations;
    }

    pub fn camera_count (&self)->usize { self.cameras.read().unwrap().len() }
    pub fn station_count (&self)->usize { self.stations.read().unwrap().len() }

    /// §4.3 nearby() for cameras: distance filter, road-affinity heuristic, stable sort by distance
    pub fn nearby_cameras (&self, lat: f64, lon: f64, target_road: Option<&str>, max_km: f64, limit: usize)->Vec<Camera> {
        let cameras = self.cameras.read().unwrap();
        let mut candidates: Vec<(f64,usize)> = cameras.iter().enumerate()
            .filter_map(|(idx,cam)| {
                let d = haversine_km(lat, lon, cam.latitude, cam.longitude);
                if d <= max_km { Some((d,idx)) } else { None }
            })
            .filter(|(_,idx)| road_affinity_ok(&cameras[*idx].name, target_road))
            .collect();

        // stable sort: ties keep original (insertion) order, since Vec::sort_by is stable and we
        // carry the original index as the tiebreaker
        candidates.sort_by(|a,b| a.0.partial_cmp(&b.0).unwrap().then(a.1.cmp(&b.1)));

        candidates.into_iter().take(limit).map(|(_,idx)| cameras[idx].clone()).collect()
    }

    /// nearest weather station within `max_km`, used for the 20km weather enrichment radius (§4.6)
    pub fn nearest_station (&self, lat: f64, lon: f64, max_km: f64)->Option<WeatherStation> {
        let stations = self.stations.read().unwrap();
        stations.iter()
            .map(|s| (haversine_km(lat, lon, s.latitude, s.longitude), s))
            .filter(|(d,_)| *d <= max_km)
            .min_by(|a,b| a.0.partial_cmp(&b.0).unwrap())
            .map(|(_,s)| s.clone())
    }
}

/// road-affinity heuristic (§4.3 step 2): reject a candidate that names road tokens none of which
/// is the target road; candidates naming no tokens at all are always kept.
fn road_affinity_ok (candidate_name: &str, target_road: Option<&str>)->bool {
    let Some(target) = target_road else { return true };
    let tokens = road_tokens(candidate_name);
    if tokens.is_empty() { return true }
    let target = target.to_uppercase();
    tokens.iter().any(|t| *t == target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CameraType;

    fn cam (id: &str, name: &str, lat: f64, lon: f64)->Camera {
        Camera {
            id: id.to_string(), name: name.to_string(), camera_type: CameraType::RoadCamera,
            photo_url: None, fullsize_url: None, photo_time: None, latitude: lat, longitude: lon,
            county_no: 1, is_favorite: false,
        }
    }

    #[test]
    fn rejects_road_token_mismatch_and_radius_exceeded() {
        // roughly mirrors S3: target road E4 at (59.33, 18.07)
        let index = SpatialIndex::new();
        index.set_cameras(vec![
            cam("c1", "Rv73 Trpl X", 59.335, 18.10),   // ~2-4km away, wrong road token
            cam("c2", "E4 Syd", 59.40, 18.07),         // further than 5km radius
        ]);

        let result = index.nearby_cameras(59.33, 18.07, Some("E4"), 5.0, 5);
        assert!(result.is_empty());
    }

    #[test]
    fn keeps_candidates_with_no_road_tokens() {
        let index = SpatialIndex::new();
        index.set_cameras(vec![cam("c1", "Korsningen vid torget", 59.331, 18.071)]);
        let result = index.nearby_cameras(59.33, 18.07, Some("E4"), 5.0, 5);
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn all_returned_cameras_are_within_radius() {
        let index = SpatialIndex::new();
        index.set_cameras(vec![
            cam("near", "E4 Norr", 59.335, 18.075),
            cam("far", "E4 Langt Bort", 60.5, 19.5),
        ]);
        let result = index.nearby_cameras(59.33, 18.07, Some("E4"), 10.0, 5);
        for c in &result {
            assert!(haversine_km(59.33, 18.07, c.latitude, c.longitude) <= 10.0);
        }
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, "near");
    }
}
