use serde::{Deserialize, Serialize};

use crate::ids::PrincipalId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalRole {
    Patient,
    Provider,
    Platform,
}

impl PrincipalRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Patient => "patient",
            Self::Provider => "provider",
            Self::Platform => "platform",
        }
    }
}

impl std::str::FromStr for PrincipalRole {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "patient" => Ok(Self::Patient),
            "provider" => Ok(Self::Provider),
            "platform" => Ok(Self::Platform),
            other => Err(format!("unknown principal role: {other}")),
        }
    }
}

/// One wallet exists per (principal, role) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WalletKey {
    pub principal_id: PrincipalId,
    pub role: PrincipalRole,
}

impl WalletKey {
    #[must_use]
    pub fn new(principal_id: PrincipalId, role: PrincipalRole) -> Self {
        Self { principal_id, role }
    }

    #[must_use]
    pub fn patient(principal_id: impl Into<PrincipalId>) -> Self {
        Self::new(principal_id.into(), PrincipalRole::Patient)
    }

    #[must_use]
    pub fn provider(principal_id: impl Into<PrincipalId>) -> Self {
        Self::new(principal_id.into(), PrincipalRole::Provider)
    }

    #[must_use]
    pub fn platform(principal_id: PrincipalId) -> Self {
        Self::new(principal_id, PrincipalRole::Platform)
    }
}
