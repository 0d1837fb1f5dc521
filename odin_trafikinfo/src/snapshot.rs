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

//! downloads and persists camera snapshots under a county-partitioned directory tree (§4.4).

use std::path::PathBuf;
use reqwest::Client;
use odin_common::fs::ensure_dir;
use crate::errors::{OdinTrafikinfoError,Result};

/// a response body below this size is rejected outright as corrupt
pub const MIN_VALID_BYTES: u64 = 1500;
/// a response body at or above this size is accepted from the fullsize URL without falling back
pub const FULLSIZE_VALID_BYTES: u64 = 5000;

pub struct SnapshotStore {
    client: Client,
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new (client: Client, root: impl Into<PathBuf>)->Self {
        SnapshotStore { client, root: root.into() }
    }

    /// `save(url, preferred_fullsize_url?, entity_id, county_no) -> path | none` (§4.4)
    ///
    /// issues GET to the fullsize URL if given, accepting it outright once it clears
    /// [`FULLSIZE_VALID_BYTES`]; on failure or a body below that, falls back to the base URL
    /// (unless they are the same URL). the final body must clear [`MIN_VALID_BYTES`] or is
    /// rejected as corrupt.
    ///
    /// every upstream-fetch or size failure here is an "enrichment miss", not an error to the
    /// caller (§7): it resolves to `Ok(None)` so the entity still commits with the camera
    /// metadata recorded and `snapshot_path` left null for a later retry. only a local
    /// filesystem failure while writing the accepted body propagates as `Err`.
    pub async fn save (&self, base_url: &str, preferred_fullsize_url: Option<&str>, entity_id: &str, county_no: i32)->Result<Option<String>> {
        let fullsize_url = preferred_fullsize_url.filter(|u| *u != base_url);

        let mut body: Option<bytes::Bytes> = None;

        if let Some(url) = fullsize_url {
            if let Ok(b) = self.fetch(url).await {
                if b.len() as u64 >= FULLSIZE_VALID_BYTES {
                    body = Some(b);
                }
            }
        }

        if body.is_none() {
            match self.fetch(base_url).await {
                Ok(b) => body = Some(b),
                Err(e) => {
                    tracing::warn!("snapshot base url fetch failed for {entity_id}: {e}");
                    return Ok(None);
                }
            }
        }

        let body = body.unwrap();
        let len = body.len() as u64;

        if len < MIN_VALID_BYTES {
            tracing::warn!("rejected corrupt snapshot for {entity_id}: {len} bytes");
            return Ok(None);
        }
        if len < FULLSIZE_VALID_BYTES {
            tracing::warn!("accepted marginal snapshot for {entity_id}: {len} bytes");
        }

        let county_dir = self.root.join(county_no.to_string());
        ensure_dir(&county_dir)?;

        let ts = chrono::Utc::now().timestamp();
        let filename = format!("{entity_id}_{ts}.jpg");
        let path = county_dir.join(&filename);
        tokio::fs::write(&path, &body).await?;

        Ok(Some(format!("{county_no}/{filename}")))
    }

    async fn fetch (&self, url: &str)->Result<bytes::Bytes> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(OdinTrafikinfoError::UpstreamError(format!("status {} for {url}", response.status())));
        }
        Ok(response.bytes().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn county_partitioned_relative_path_shape() {
        // the stored relative path must be "<county>/<entity>_<ts>.jpg" per §4.4
        let path = format!("{}/{}_{}.jpg", 1, "E_abc", 1700000000);
        assert!(path.starts_with("1/"));
        assert!(path.ends_with(".jpg"));
    }
}
