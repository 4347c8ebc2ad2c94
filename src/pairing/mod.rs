//! Code-based device pairing.
//!
//! Two devices exchange short codes out-of-band. Each publishes an
//! advertisement into the shared `connections` collection and waits for the
//! advertisement whose codes mirror its own. Advertisements are single-use
//! mailboxes: whoever observes one deletes it before looking at it.

pub mod coordinator;
mod request;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::store::Fields;

pub use coordinator::{AttemptState, PairingConfig, PairingCoordinator};
pub use request::{PairingRequest, PairingRequestBody};

/// Collection holding pairing advertisements.
pub const CONNECTIONS_COLLECTION: &str = "connections";

/// Default time an attempt waits for its counterpart.
pub const DEFAULT_PAIRING_TIMEOUT_SECS: u64 = 60;

/// Document a device publishes so its counterpart can find it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingAdvertisement {
    pub local_code: String,
    pub remote_code: String,
    pub device_key: String,
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub device_platform: Option<String>,
    #[serde(default)]
    pub meta: Fields,
    #[serde(default = "Utc::now", with = "rfc3339")]
    pub date: DateTime<Utc>,
}

impl PairingAdvertisement {
    pub fn from_request(request: &PairingRequest, date: DateTime<Utc>) -> Self {
        Self {
            local_code: request.local_code.clone(),
            remote_code: request.remote_code.clone(),
            device_key: request.device_key.clone(),
            device_name: request.device_name.clone(),
            device_platform: request.device_platform.clone(),
            meta: request.meta.clone(),
            date,
        }
    }

    pub fn to_fields(&self) -> Result<Fields, StoreError> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(fields) => Ok(fields),
            _ => Err(StoreError::Serialization(
                "advertisement did not serialize to an object".to_string(),
            )),
        }
    }

    /// The part of this advertisement handed to the counterpart.
    pub fn into_result(self) -> PairingResult {
        PairingResult {
            device_key: self.device_key,
            device_name: self.device_name,
            device_platform: self.device_platform,
            meta: self.meta,
        }
    }
}

/// Connection metadata of the matched counterpart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingResult {
    pub device_key: String,
    pub device_name: Option<String>,
    pub device_platform: Option<String>,
    #[serde(default)]
    pub meta: Fields,
}

mod rfc3339 {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(date: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&date.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|date| date.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
