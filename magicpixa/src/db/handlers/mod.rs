//! Repository implementations, one per table group.
//!
//! Each repository borrows a `PgConnection` (or a transaction deref'd to one) and opens its own
//! nested transaction where an operation touches more than one row.

pub mod artifacts;
pub mod credits;
pub mod payments;
pub mod quotas;
pub mod reservations;
pub mod users;

pub use artifacts::Artifacts;
pub use credits::Credits;
pub use payments::PaymentOrders;
pub use quotas::Quotas;
pub use reservations::Reservations;
pub use users::Users;
