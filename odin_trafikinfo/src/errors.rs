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

use thiserror::Error;

pub type Result<T> = std::result::Result<T,OdinTrafikinfoError>;

#[derive(Error,Debug)]
pub enum OdinTrafikinfoError {

    #[error("parse error {0}")]
    ParseError(String),

    #[error("IO error {0}")]
    IOError( #[from] std::io::Error),

    #[error("http error {0}")]
    HttpError( #[from] reqwest::Error),

    #[error("json error {0}")]
    JsonError( #[from] serde_json::Error),

    #[error("xml error {0}")]
    XmlError( #[from] quick_xml::SeError),

    #[error("ron error {0}")]
    RonError( #[from] ron::error::SpanError),

    #[error("db error {0}")]
    DbError( #[from] sqlx::Error),

    #[error("migration error {0}")]
    MigrateError( #[from] sqlx::migrate::MigrateError),

    #[error("chrono parse error {0}")]
    ChronoParseError( #[from] chrono::ParseError),

    #[error("ODIN actor error {0}")]
    OdinActorError( #[from] odin_actor::OdinActorError),

    #[error("crypto error {0}")]
    CryptoError(String),

    #[error("upstream error {0}")]
    UpstreamError(String),

    #[error("snapshot rejected: {0}")]
    SnapshotError(String),

    #[error("subscription gone: {0}")]
    SubscriptionGone(String),

    #[error("action error {0}")]
    ActionError(String),

    #[error("operation failed {0}")]
    OpFailedError(String)
}

impl From<ring::error::Unspecified> for OdinTrafikinfoError {
    fn from (_: ring::error::Unspecified)->Self { OdinTrafikinfoError::CryptoError("ring operation failed".to_string()) }
}

impl From<ring::error::KeyRejected> for OdinTrafikinfoError {
    fn from (e: ring::error::KeyRejected)->Self { OdinTrafikinfoError::CryptoError(e.to_string()) }
}

pub(crate) fn op_failed (msg: impl ToString)->OdinTrafikinfoError {
    OdinTrafikinfoError::OpFailedError(msg.to_string())
}

macro_rules! parse_error {
    ($fmt:literal $(, $arg:expr )* ) => {
        crate::errors::OdinTrafikinfoError::ParseError( format!( $fmt $(, $arg)* ))
    };
}
pub(crate) use parse_error;
