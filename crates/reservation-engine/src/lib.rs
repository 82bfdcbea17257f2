//! Slot locking and the reservation lifecycle.
//!
//! A slot key (provider, date, start time) admits at most one active
//! reservation. Lock acquisition is a single atomic check-then-act inside the
//! repository; expiry is evaluated lazily at the next contention point, there
//! is no background sweeper.

pub mod engine;
pub mod postgres;
pub mod store;

pub use engine::{ReservationConfig, ReservationEngine, ReservationError, SlotLock};
pub use postgres::PostgresReservationRepository;
pub use store::{
    InMemoryReservationRepository, ReservationRepository, ReservationStoreError, SlotLockOutcome,
    SlotLockRequest,
};
