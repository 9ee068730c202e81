use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/**
    Random per-attempt device identifier, 32 lowercase hex characters.
*/
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Current Unix time in whole seconds, rounded up.
pub fn unix_timestamp() -> i64 {
    let millis = Utc::now().timestamp_millis();
    (millis + 999).div_euclid(1000)
}

/**
    Opaque output of the vendor signing function.

    The vendor returns a URL-encoded query string. Its pairs are kept in
    order and forwarded as-is; nothing here interprets them.
*/
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignaturePayload {
    fields: Vec<(String, String)>,
}

impl SignaturePayload {
    pub fn parse(query: &str) -> Self {
        let query = query.trim().trim_start_matches('?');
        let fields = url::form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        Self { fields }
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    pub fn into_fields(self) -> Vec<(String, String)> {
        self.fields
    }
}

/**
    Caller-supplied knobs for a single resolution.

    Unset quality/circuit fall back to the catalog's preferred pair.
*/
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionOptions {
    pub desired_quality: Option<String>,
    pub desired_circuit: Option<String>,
    /// Skip the signature cache for the first attempt. Also counts as the
    /// one allowed escalation, so an authorization failure is then fatal.
    pub force_fresh_signature: bool,
    pub requested_bitrate_code: Option<i64>,
}

impl ResolutionOptions {
    pub fn new(quality: impl Into<String>, circuit: impl Into<String>) -> Self {
        Self {
            desired_quality: Some(quality.into()),
            desired_circuit: Some(circuit.into()),
            ..Self::default()
        }
    }

    pub fn with_fresh_signature(self, force: bool) -> Self {
        Self {
            force_fresh_signature: force,
            ..self
        }
    }

    pub fn with_bitrate_code(self, rate: Option<i64>) -> Self {
        Self {
            requested_bitrate_code: rate,
            ..self
        }
    }
}

/**
    A successfully resolved, playable stream.
*/
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedStream {
    pub stream_url: String,
    pub quality: String,
    pub circuit: String,
    /// Empty when the quality code is not in the catalog
    pub quality_display: String,
    /// Empty when the circuit code is not in the catalog
    pub circuit_display: String,
}
