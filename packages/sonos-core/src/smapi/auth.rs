//! DeviceLink / AppLink account linking.
//!
//! Linking is two calls: `begin` returns a registration URL for the user,
//! `complete` exchanges the link code for a token pair once the user has
//! approved it. Until then the service faults with `NOT_LINKED_RETRY`,
//! which [`poll_until_linked`] treats as "try again".

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::client::SmapiClient;
use super::types::{parse_link_code, LinkCode, TokenPair};
use super::{SmapiError, SmapiResult};
use crate::protocol_constants::{SMAPI_MAX_POLL_INTERVAL, SMAPI_MIN_POLL_INTERVAL};
use crate::sonos::music_services::AuthPolicy;
use crate::sonos::utils::extract_xml_text;
use crate::utils::now_millis;

/// Client details sent with `getAppLink`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppLinkParams {
    pub hardware: String,
    pub os_version: String,
    pub sonos_app_name: String,
    pub callback_path: String,
}

impl Default for AppLinkParams {
    fn default() -> Self {
        Self {
            hardware: std::env::consts::ARCH.to_string(),
            os_version: std::env::consts::OS.to_string(),
            sonos_app_name: env!("CARGO_PKG_NAME").to_string(),
            callback_path: String::new(),
        }
    }
}

/// Poll interval for a wait budget: a fifth of it, within [10ms, 2s].
#[must_use]
pub fn poll_interval(wait: Duration) -> Duration {
    (wait / 5).clamp(SMAPI_MIN_POLL_INTERVAL, SMAPI_MAX_POLL_INTERVAL)
}

/// Repeats `attempt` while it reports a pending link.
///
/// Stops on success, on any other error, when `wait` has elapsed (returning
/// the last pending error) or when `cancel` fires.
pub async fn poll_until_linked<T, F, Fut>(
    wait: Duration,
    cancel: &CancellationToken,
    mut attempt: F,
) -> SmapiResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SmapiResult<T>>,
{
    let deadline = Instant::now() + wait;
    let interval = poll_interval(wait);
    let mut attempts = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(SmapiError::Cancelled);
        }
        attempts += 1;
        let err = match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_pending() => e,
            Err(e) => return Err(e),
        };

        let now = Instant::now();
        if now >= deadline {
            log::debug!("[SMAPI] Link still pending after {} attempts", attempts);
            return Err(err);
        }
        let pause = interval.min(deadline - now);
        log::trace!("[SMAPI] Link pending, retrying in {:?}", pause);
        tokio::select! {
            _ = cancel.cancelled() => return Err(SmapiError::Cancelled),
            _ = tokio::time::sleep(pause) => {}
        }
    }
}

impl SmapiClient {
    /// Starts linking and returns what the user must open.
    pub async fn begin_auth(&self, app_link: &AppLinkParams) -> SmapiResult<LinkCode> {
        let household_id = self.identity().household_id.clone();
        let body = match self.service().auth {
            AuthPolicy::DeviceLink => {
                self.post("getDeviceLinkCode", &[("householdId", household_id)], None)
                    .await?
            }
            AuthPolicy::AppLink => {
                self.post(
                    "getAppLink",
                    &[
                        ("householdId", household_id),
                        ("hardware", app_link.hardware.clone()),
                        ("osVersion", app_link.os_version.clone()),
                        ("sonosAppName", app_link.sonos_app_name.clone()),
                        ("callbackPath", app_link.callback_path.clone()),
                    ],
                    None,
                )
                .await?
            }
            policy => {
                return Err(SmapiError::UnsupportedAuth {
                    service: self.service().name.clone(),
                    policy: policy.to_string(),
                })
            }
        };

        let link = parse_link_code(&body)?;
        log::info!(
            "[SMAPI] Link started for {}: open {}",
            self.service().name,
            link.reg_url
        );
        Ok(link)
    }

    /// Tries once to exchange `link` for credentials and persists them.
    ///
    /// While the user has not approved the link this fails with a pending
    /// fault (see [`SmapiError::is_pending`]).
    pub async fn complete_auth(&self, link: &LinkCode) -> SmapiResult<TokenPair> {
        let identity = self.identity();
        let mut args = vec![
            ("householdId", identity.household_id.clone()),
            ("linkCode", link.link_code.clone()),
        ];
        if let Some(device) = &link.link_device_id {
            args.push(("linkDeviceId", device.clone()));
        }

        let body = self.post("getDeviceAuthToken", &args, None).await?;
        let auth_token = extract_xml_text(&body, "authToken").unwrap_or_default();
        let private_key = extract_xml_text(&body, "privateKey").unwrap_or_default();

        let pair = TokenPair {
            auth_token: auth_token.trim().to_string(),
            private_key: private_key.trim().to_string(),
            household_id: identity.household_id.clone(),
            device_id: link
                .link_device_id
                .clone()
                .unwrap_or_else(|| identity.device_id.clone()),
            link_code: link.link_code.clone(),
            updated_at: now_millis(),
        };
        if !pair.is_valid() {
            return Err(SmapiError::Parse(
                "getDeviceAuthToken returned no token pair".into(),
            ));
        }

        self.tokens()
            .save(&self.service().id, &identity.household_id, &pair)?;
        log::info!("[SMAPI] Linked {} for {}", self.service().name, identity.household_id);
        Ok(pair)
    }

    /// Completes linking, polling while the user approves.
    ///
    /// Without a wait budget this is a single attempt.
    pub async fn complete_auth_wait(
        &self,
        link: &LinkCode,
        wait: Option<Duration>,
        cancel: &CancellationToken,
    ) -> SmapiResult<TokenPair> {
        match wait {
            Some(wait) => poll_until_linked(wait, cancel, || self.complete_auth(link)).await,
            None => self.complete_auth(link).await,
        }
    }
}
