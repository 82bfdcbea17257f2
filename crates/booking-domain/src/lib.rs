pub mod ids;
pub mod ledger;
pub mod money;
pub mod principal;
pub mod reservation;

pub use ids::{
    PatientId, PrincipalId, ProviderId, RequestId, ReservationId, TraceId, TransactionId,
};
pub use ledger::{LedgerTransaction, RevenueShareBreakdown, TransactionDirection};
pub use money::{Money, MoneyError};
pub use principal::{PrincipalRole, WalletKey};
pub use reservation::{
    CancelActor, PatientSnapshot, PaymentMethod, ProviderSnapshot, ReservationRecord,
    ReservationState, SlotKey,
};
