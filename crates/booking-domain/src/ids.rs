use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_type {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_type!(PatientId);
id_type!(ProviderId);
id_type!(PrincipalId);
id_type!(ReservationId);
id_type!(TransactionId);
id_type!(RequestId);
id_type!(TraceId);

impl From<PatientId> for PrincipalId {
    fn from(id: PatientId) -> Self {
        Self(id.0)
    }
}

impl From<ProviderId> for PrincipalId {
    fn from(id: ProviderId) -> Self {
        Self(id.0)
    }
}
