//! Database record models matching table schemas.
//!
//! Request structs (`*DBRequest`) carry what a repository needs to write a row; response
//! structs (`*DBResponse`) are what repositories hand back. API models convert from the
//! responses so the storage and wire representations can evolve separately.
//!
//! - [`users`]: accounts, balances and roles
//! - [`credits`]: ledger history and administrative grants
//! - [`reservations`]: per-job credit holds and their lifecycle
//! - [`artifacts`]: generated outputs
//! - [`quotas`]: anonymous device quotas
//! - [`payments`]: payment gateway orders

pub mod artifacts;
pub mod credits;
pub mod payments;
pub mod quotas;
pub mod reservations;
pub mod users;
