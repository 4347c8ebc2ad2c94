//! Inbound pairing requests.

use serde::Deserialize;

use crate::error::PairingError;
use crate::store::Fields;

/// JSON body of `POST /pairing`.
///
/// Every field is optional here so that an incomplete body is reported as
/// `invalidParams` by [`PairingRequest::validate`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingRequestBody {
    pub local_code: Option<String>,
    pub remote_code: Option<String>,
    pub device_key: Option<String>,
    pub device_name: Option<String>,
    pub device_platform: Option<String>,
    pub meta: Option<Fields>,
}

impl PairingRequestBody {
    /// Normalize into a request. Older clients send `deviceName` and
    /// `devicePlatform` inside `meta`; a non-empty nested value wins.
    pub fn into_request(self) -> PairingRequest {
        let meta = self.meta.unwrap_or_default();
        let device_name = nested_string(&meta, "deviceName").or(self.device_name);
        let device_platform = nested_string(&meta, "devicePlatform").or(self.device_platform);

        PairingRequest {
            local_code: self.local_code.unwrap_or_default(),
            remote_code: self.remote_code.unwrap_or_default(),
            device_key: self.device_key.unwrap_or_default(),
            device_name: device_name.filter(|n| !n.is_empty()),
            device_platform: device_platform.filter(|p| !p.is_empty()),
            meta,
        }
    }
}

fn nested_string(meta: &Fields, key: &str) -> Option<String> {
    meta.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Input to one pairing attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PairingRequest {
    /// Code this device showed to the peer.
    pub local_code: String,
    /// Code the peer showed to this device.
    pub remote_code: String,
    pub device_key: String,
    pub device_name: Option<String>,
    pub device_platform: Option<String>,
    pub meta: Fields,
}

impl PairingRequest {
    pub fn new(
        local_code: impl Into<String>,
        remote_code: impl Into<String>,
        device_key: impl Into<String>,
    ) -> Self {
        Self {
            local_code: local_code.into(),
            remote_code: remote_code.into(),
            device_key: device_key.into(),
            ..Self::default()
        }
    }

    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = Some(name.into());
        self
    }

    pub fn with_device_platform(mut self, platform: impl Into<String>) -> Self {
        self.device_platform = Some(platform.into());
        self
    }

    pub fn with_meta(mut self, meta: Fields) -> Self {
        self.meta = meta;
        self
    }

    /// Check the three required fields, reporting the first empty one.
    pub fn validate(&self) -> Result<(), PairingError> {
        let required = [
            ("localCode", &self.local_code),
            ("remoteCode", &self.remote_code),
            ("deviceKey", &self.device_key),
        ];
        match required.into_iter().find(|(_, value)| value.is_empty()) {
            Some((field, _)) => Err(PairingError::InvalidParams { field }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: serde_json::Value) -> PairingRequestBody {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_top_level_fields() {
        let request = body(json!({
            "localCode": "111",
            "remoteCode": "222",
            "deviceKey": "key",
            "deviceName": "Phone",
            "devicePlatform": "android",
        }))
        .into_request();

        assert_eq!(request.local_code, "111");
        assert_eq!(request.device_name.as_deref(), Some("Phone"));
        assert_eq!(request.device_platform.as_deref(), Some("android"));
        assert!(request.meta.is_empty());
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_meta_fields_are_hoisted() {
        let request = body(json!({
            "localCode": "111",
            "remoteCode": "222",
            "deviceKey": "key",
            "deviceName": "Old name",
            "meta": {"deviceName": "Mac", "devicePlatform": "macos", "appVersion": "2.1"},
        }))
        .into_request();

        assert_eq!(request.device_name.as_deref(), Some("Mac"));
        assert_eq!(request.device_platform.as_deref(), Some("macos"));
        assert_eq!(request.meta["appVersion"], "2.1");
    }

    #[test]
    fn test_empty_meta_values_do_not_override() {
        let request = body(json!({
            "deviceName": "Phone",
            "meta": {"deviceName": ""},
        }))
        .into_request();
        assert_eq!(request.device_name.as_deref(), Some("Phone"));
    }

    #[test]
    fn test_validate_reports_first_missing_field() {
        let cases = [
            (json!({"remoteCode": "2", "deviceKey": "k"}), "localCode"),
            (json!({"localCode": "1", "deviceKey": "k"}), "remoteCode"),
            (json!({"localCode": "1", "remoteCode": "2"}), "deviceKey"),
            (json!({"localCode": "", "remoteCode": "2", "deviceKey": "k"}), "localCode"),
        ];
        for (value, expected) in cases {
            match body(value).into_request().validate() {
                Err(PairingError::InvalidParams { field }) => assert_eq!(field, expected),
                other => panic!("expected InvalidParams, got {other:?}"),
            }
        }
    }
}
