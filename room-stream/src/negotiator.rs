use std::sync::Arc;

use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::address::RoomAddress;
use crate::catalog::{self, PREFERRED};
use crate::error::{StreamError, StreamResult};
use crate::http::{HttpClient, HttpResponse};
use crate::signature::SignatureCache;
use crate::types::{DeviceId, ResolutionOptions, ResolvedStream, unix_timestamp};

pub const DEFAULT_PLAY_ENDPOINT: &str = "https://www.douyu.com/lapi/live/getH5Play";

const ENDPOINT: &str = "getH5Play";

/// Body the play endpoint answers with when a signature is rejected.
pub const AUTH_FAILED_BODY: &str = "鉴权失败";

const CODE_SUCCESS: i64 = 0;
const CODE_ROOM_ABSENT: i64 = -3;
const CODE_ROOM_BANNED: i64 = -4;
const CODE_ROOM_OFFLINE: i64 = -5;
const CODE_STALE_TIMESTAMP: i64 = -9;

/// Form fields the engine sets itself, taking precedence over signature fields.
const REQUEST_FIELDS: [&str; 4] = ["cdn", "rate", "iar", "ive"];

#[derive(Debug, Deserialize)]
struct PlayEnvelope {
    error: i64,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct PlayData {
    rtmp_url: String,
    rtmp_live: String,
    rtmp_cdn: String,
    rate: i64,
    #[serde(default)]
    multirates: Vec<Multirate>,
}

#[derive(Debug, Deserialize)]
struct Multirate {
    name: String,
    rate: i64,
}

/**
    Per-call negotiation state.

    Each field only ever moves one way, which bounds a call to one signature
    escalation and one quality switch.
*/
#[derive(Debug, Clone, Copy)]
struct Attempt {
    force_fresh: bool,
    escalated: bool,
    quality_switched: bool,
    rate: Option<i64>,
}

impl Attempt {
    fn first(options: &ResolutionOptions) -> Self {
        Self {
            force_fresh: options.force_fresh_signature,
            escalated: options.force_fresh_signature,
            quality_switched: false,
            rate: options.requested_bitrate_code,
        }
    }

    fn escalate(self) -> Self {
        Self {
            force_fresh: true,
            escalated: true,
            ..self
        }
    }

    fn switch_quality(self, rate: i64) -> Self {
        Self {
            force_fresh: false,
            quality_switched: true,
            rate: Some(rate),
            ..self
        }
    }
}

enum Reconciled {
    Use(String),
    Switch(i64),
}

/**
    Resolves a room address into a playable stream.

    Drives the sign → request → classify loop against the play endpoint,
    using the injected [`SignatureCache`] for signing functions.
*/
pub struct StreamNegotiator<H> {
    http: Arc<H>,
    cache: Arc<SignatureCache<H>>,
    endpoint: String,
}

impl<H: HttpClient> StreamNegotiator<H> {
    pub fn new(http: Arc<H>, cache: Arc<SignatureCache<H>>) -> Self {
        Self::with_endpoint(http, cache, DEFAULT_PLAY_ENDPOINT)
    }

    pub fn with_endpoint(
        http: Arc<H>,
        cache: Arc<SignatureCache<H>>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            http,
            cache,
            endpoint: endpoint.into(),
        }
    }

    pub fn cache(&self) -> &Arc<SignatureCache<H>> {
        &self.cache
    }

    /**
        Resolve with an explicit quality and circuit.

        Returns `Ok(None)` when the room does not exist, is banned, or is not live.
    */
    pub async fn resolve_stream(
        &self,
        address: &RoomAddress,
        quality: &str,
        circuit: &str,
    ) -> StreamResult<Option<ResolvedStream>> {
        self.resolve(address, &ResolutionOptions::new(quality, circuit))
            .await
    }

    /**
        Same as [`resolve`](Self::resolve), but gives up with
        [`StreamError::DeadlineElapsed`] once `deadline` passes.
    */
    pub async fn resolve_with_deadline(
        &self,
        address: &RoomAddress,
        options: &ResolutionOptions,
        deadline: Instant,
    ) -> StreamResult<Option<ResolvedStream>> {
        tokio::time::timeout_at(deadline, self.resolve(address, options))
            .await
            .map_err(|_| StreamError::DeadlineElapsed)?
    }

    /**
        Run the full negotiation for one room.

        - A rejected signature is retried once with a freshly fetched signer.
        - A stale-timestamp envelope drops the cached signer for later calls,
          but the payload at hand is still used.
        - If the desired quality is offered at another bitrate, the request
          is repeated once with that bitrate; otherwise the quality actually
          in effect is reported.
    */
    pub async fn resolve(
        &self,
        address: &RoomAddress,
        options: &ResolutionOptions,
    ) -> StreamResult<Option<ResolvedStream>> {
        let quality = options
            .desired_quality
            .as_deref()
            .unwrap_or(PREFERRED.quality);
        let circuit = options
            .desired_circuit
            .as_deref()
            .unwrap_or(PREFERRED.circuit);

        let mut attempt = Attempt::first(options);

        loop {
            let response = self.request(address, circuit, &attempt).await?;

            if !response.is_ok() {
                if is_auth_failure(&response) && !attempt.escalated {
                    warn!(
                        "[negotiator] Signature rejected for room {}, retrying with a fresh signer",
                        address
                    );
                    attempt = attempt.escalate();
                    continue;
                }
                return Err(StreamError::UnexpectedStatus {
                    endpoint: ENDPOINT,
                    status: response.status,
                    body: response.body,
                });
            }

            let envelope: PlayEnvelope = serde_json::from_str(&response.body)
                .map_err(|e| StreamError::malformed(ENDPOINT, e))?;

            match envelope.error {
                CODE_SUCCESS => {}
                CODE_ROOM_ABSENT | CODE_ROOM_BANNED | CODE_ROOM_OFFLINE => {
                    info!(
                        "[negotiator] No stream for room {} (code {})",
                        address, envelope.error
                    );
                    return Ok(None);
                }
                CODE_STALE_TIMESTAMP => {
                    // TODO: confirm with live traffic whether a -9 payload is ever playable;
                    // the web player treats -9 as fatal after dropping its signer
                    warn!(
                        "[negotiator] Stale timestamp for room {}, dropping cached signer",
                        address
                    );
                    self.cache.invalidate(address);
                }
                code => {
                    error!(
                        "[negotiator] Unexpected error code {} for room {}: {}",
                        code, address, response.body
                    );
                    return Err(StreamError::UnexpectedErrorCode {
                        endpoint: ENDPOINT,
                        code,
                        envelope: response.body,
                    });
                }
            }

            let data = parse_play_data(envelope.data)?;

            match reconcile_quality(&data, quality, !attempt.quality_switched)? {
                Reconciled::Switch(rate) => {
                    debug!(
                        "[negotiator] Room {} serves bitrate {}, switching to {} for '{}'",
                        address, data.rate, rate, quality
                    );
                    attempt = attempt.switch_quality(rate);
                }
                Reconciled::Use(effective) => {
                    let stream = assemble(data, effective);
                    info!(
                        "[negotiator] Resolved room {}: {} ({} / {})",
                        address, stream.stream_url, stream.quality, stream.circuit
                    );
                    return Ok(Some(stream));
                }
            }
        }
    }

    /// Drop the cached signer for `address`.
    pub fn invalidate_signature(&self, address: &RoomAddress) {
        self.cache.invalidate(address);
    }

    async fn request(
        &self,
        address: &RoomAddress,
        circuit: &str,
        attempt: &Attempt,
    ) -> StreamResult<HttpResponse> {
        let form = {
            let signer = self.cache.acquire(address, attempt.force_fresh).await?;
            let signed_for = address.clone();
            let payload = tokio::task::spawn_blocking(move || {
                signer.sign(&signed_for, &DeviceId::generate(), unix_timestamp())
            })
            .await??;

            let mut form = payload.into_fields();
            form.retain(|(key, _)| !REQUEST_FIELDS.contains(&key.as_str()));
            form.extend([
                ("cdn".to_string(), circuit.to_string()),
                ("rate".to_string(), attempt.rate.unwrap_or(0).to_string()),
                ("iar".to_string(), "0".to_string()),
                ("ive".to_string(), "0".to_string()),
            ]);
            form
        };

        let url = format!("{}/{}", self.endpoint, address);
        debug!(
            "[negotiator] Requesting {} (cdn: {}, rate: {})",
            url,
            circuit,
            attempt.rate.unwrap_or(0)
        );

        self.http.post_form(&url, &form).await
    }
}

fn is_auth_failure(response: &HttpResponse) -> bool {
    response.body.trim().trim_matches('"') == AUTH_FAILED_BODY
}

fn parse_play_data(data: Option<serde_json::Value>) -> StreamResult<PlayData> {
    let data = data
        .filter(|d| !d.is_null())
        .ok_or_else(|| StreamError::malformed(ENDPOINT, "envelope has no data"))?;
    serde_json::from_value(data).map_err(|e| StreamError::malformed(ENDPOINT, e))
}

fn reconcile_quality(
    data: &PlayData,
    desired: &str,
    may_switch: bool,
) -> StreamResult<Reconciled> {
    if let Some(target) = data.multirates.iter().find(|r| r.name == desired) {
        if target.rate == data.rate {
            return Ok(Reconciled::Use(target.name.clone()));
        }
        if may_switch {
            return Ok(Reconciled::Switch(target.rate));
        }
        warn!(
            "[negotiator] Server kept bitrate {} after switching to '{}'",
            data.rate, desired
        );
    }

    data.multirates
        .iter()
        .find(|r| r.rate == data.rate)
        .map(|r| Reconciled::Use(r.name.clone()))
        .ok_or_else(|| StreamError::QualityUnresolvable {
            rate: data.rate,
            offered: data
                .multirates
                .iter()
                .map(|r| format!("{}={}", r.name, r.rate))
                .collect::<Vec<_>>()
                .join(", "),
        })
}

fn assemble(data: PlayData, quality: String) -> ResolvedStream {
    let quality_display = catalog::quality_display(&quality)
        .unwrap_or_default()
        .to_string();
    let circuit_display = catalog::circuit_display(&data.rtmp_cdn)
        .unwrap_or_default()
        .to_string();

    ResolvedStream {
        stream_url: format!("{}/{}", data.rtmp_url, data.rtmp_live),
        quality,
        circuit: data.rtmp_cdn,
        quality_display,
        circuit_display,
    }
}
