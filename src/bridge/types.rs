use crate::models::Locker;
use serde::{Deserialize, Serialize};

/// How the bridge call went, independent of whether the locker opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeStatus {
    NotConfigured,
    Ok,
    Unavailable,
    Error,
}

impl BridgeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeStatus::NotConfigured => "not_configured",
            BridgeStatus::Ok => "ok",
            BridgeStatus::Unavailable => "unavailable",
            BridgeStatus::Error => "error",
        }
    }
}

/// Result of a locker release attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseOutcome {
    pub locker_id: String,
    pub locker_number: u32,
    pub released: bool,
    pub bridge_status: BridgeStatus,
    pub message: String,
}

impl ReleaseOutcome {
    pub(crate) fn new(
        locker: &Locker,
        released: bool,
        bridge_status: BridgeStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            locker_id: locker.id.clone(),
            locker_number: locker.number,
            released,
            bridge_status,
            message: message.into(),
        }
    }
}

/// Body posted to the bridge
#[derive(Debug, Serialize)]
pub(crate) struct ReleaseRequest<'a> {
    pub locker_id: &'a str,
    pub locker_number: u32,
    pub property_id: &'a str,
    pub requested_by: &'a str,
    pub reason: Option<&'a str>,
}

/// Body returned by the bridge
#[derive(Debug, Deserialize)]
pub(crate) struct ReleaseResponse {
    pub released: bool,
    #[serde(default)]
    pub message: Option<String>,
}
