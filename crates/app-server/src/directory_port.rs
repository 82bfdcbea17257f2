use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use booking_domain::{Money, PatientId, PatientSnapshot, ProviderId, ProviderSnapshot};

/// Patient and provider master data lives outside this service; checkout only
/// needs enough to snapshot into a reservation at lock time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientProfile {
    pub patient_id: PatientId,
    pub name: String,
    pub contact: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    pub provider_id: ProviderId,
    pub name: String,
    pub speciality: String,
    pub fee: Money,
}

impl PatientProfile {
    #[must_use]
    pub fn snapshot(&self) -> PatientSnapshot {
        PatientSnapshot {
            name: self.name.clone(),
            contact: self.contact.clone(),
        }
    }
}

impl ProviderProfile {
    #[must_use]
    pub fn snapshot(&self) -> ProviderSnapshot {
        ProviderSnapshot {
            name: self.name.clone(),
            speciality: self.speciality.clone(),
            fee: self.fee,
        }
    }
}

#[async_trait]
pub trait DirectoryPort: Send + Sync {
    async fn patient_profile(&self, patient_id: PatientId) -> Result<PatientProfile, String>;
    async fn provider_profile(&self, provider_id: ProviderId) -> Result<ProviderProfile, String>;
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryDirectory {
    patients: Arc<Mutex<HashMap<PatientId, PatientProfile>>>,
    providers: Arc<Mutex<HashMap<ProviderId, ProviderProfile>>>,
}

impl InMemoryDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_patient(&self, profile: PatientProfile) -> Result<(), String> {
        self.patients
            .lock()
            .map_err(|_| "directory lock poisoned".to_string())?
            .insert(profile.patient_id, profile);
        Ok(())
    }

    pub fn upsert_provider(&self, profile: ProviderProfile) -> Result<(), String> {
        self.providers
            .lock()
            .map_err(|_| "directory lock poisoned".to_string())?
            .insert(profile.provider_id, profile);
        Ok(())
    }
}

#[async_trait]
impl DirectoryPort for InMemoryDirectory {
    async fn patient_profile(&self, patient_id: PatientId) -> Result<PatientProfile, String> {
        self.patients
            .lock()
            .map_err(|_| "directory lock poisoned".to_string())?
            .get(&patient_id)
            .cloned()
            .ok_or_else(|| format!("patient {patient_id} not found"))
    }

    async fn provider_profile(&self, provider_id: ProviderId) -> Result<ProviderProfile, String> {
        self.providers
            .lock()
            .map_err(|_| "directory lock poisoned".to_string())?
            .get(&provider_id)
            .cloned()
            .ok_or_else(|| format!("provider {provider_id} not found"))
    }
}
