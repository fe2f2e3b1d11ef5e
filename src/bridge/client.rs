use super::types::{BridgeStatus, ReleaseOutcome, ReleaseRequest, ReleaseResponse};
use crate::breaker::{BreakerError, CircuitBreaker};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result, StaywatchError};
use crate::events::{EventBus, StaywatchEvent};
use crate::models::Locker;
use crate::repository::LockerDirectory;
use std::sync::Arc;
use tracing::{info, warn};

const MAX_ERROR_BODY: usize = 200;

/// Client for the on-premises locker controller
pub struct BridgeClient {
    client: reqwest::Client,
    endpoint: Option<String>,
    breaker: Arc<CircuitBreaker>,
    lockers: Arc<dyn LockerDirectory>,
    event_bus: EventBus,
}

impl BridgeClient {
    pub fn new(
        config: &BridgeConfig,
        breaker: Arc<CircuitBreaker>,
        lockers: Arc<dyn LockerDirectory>,
        event_bus: EventBus,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint().map(str::to_string),
            breaker,
            lockers,
            event_bus,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Ask the bridge to open a locker.
    ///
    /// Only an unknown locker is an error; every bridge-side outcome is folded
    /// into the returned [`ReleaseOutcome`].
    pub async fn release_locker(
        &self,
        property_id: &str,
        locker_identifier: &str,
        requester_id: &str,
        reason: Option<&str>,
    ) -> Result<ReleaseOutcome> {
        let locker = self
            .lockers
            .find_locker(property_id, locker_identifier)
            .await?
            .ok_or_else(|| {
                StaywatchError::not_found(format!(
                    "locker {} in property {}",
                    locker_identifier, property_id
                ))
            })?;

        let outcome = match &self.endpoint {
            None => ReleaseOutcome::new(
                &locker,
                false,
                BridgeStatus::NotConfigured,
                "Hardware bridge is not configured",
            ),
            Some(endpoint) => self.send_release(endpoint, &locker, requester_id, reason).await,
        };

        info!(
            locker_id = %outcome.locker_id,
            requested_by = %requester_id,
            released = outcome.released,
            bridge_status = outcome.bridge_status.as_str(),
            "Locker release attempted"
        );

        let _ = self.event_bus.publish(StaywatchEvent::LockerReleaseAttempted {
            locker_id: outcome.locker_id.clone(),
            requested_by: requester_id.to_string(),
            released: outcome.released,
            bridge_status: outcome.bridge_status.as_str().to_string(),
        });

        Ok(outcome)
    }

    async fn send_release(
        &self,
        endpoint: &str,
        locker: &Locker,
        requester_id: &str,
        reason: Option<&str>,
    ) -> ReleaseOutcome {
        let request = ReleaseRequest {
            locker_id: &locker.id,
            locker_number: locker.number,
            property_id: &locker.property_id,
            requested_by: requester_id,
            reason,
        };

        match self
            .breaker
            .call(|| self.post_release(endpoint, &request))
            .await
        {
            Ok(response) => {
                let message = response.message.unwrap_or_else(|| {
                    if response.released {
                        "Locker released".to_string()
                    } else {
                        "Bridge declined the release".to_string()
                    }
                });
                ReleaseOutcome::new(locker, response.released, BridgeStatus::Ok, message)
            }
            Err(BreakerError::Open { .. }) => ReleaseOutcome::new(
                locker,
                false,
                BridgeStatus::Unavailable,
                "Hardware bridge is temporarily unavailable",
            ),
            Err(BreakerError::Inner(e)) => {
                warn!(locker_id = %locker.id, error = %e, "Bridge release failed");
                ReleaseOutcome::new(locker, false, BridgeStatus::Error, e.to_string())
            }
        }
    }

    async fn post_release(
        &self,
        endpoint: &str,
        request: &ReleaseRequest<'_>,
    ) -> std::result::Result<ReleaseResponse, BridgeError> {
        let response = self.client.post(endpoint).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(BridgeError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<ReleaseResponse>().await?)
    }
}
