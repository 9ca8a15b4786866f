//! Common type definitions and permission system types.
//!
//! This module defines:
//! - Type aliases for entity IDs (UserId, ArtifactId, etc.)
//! - Permission and authorization types
//! - Resource and operation enums for access control
//!
//! # ID Types
//!
//! All entity IDs are UUIDs wrapped in type aliases:
//!
//! - [`UserId`]: User account identifier
//! - [`ArtifactId`]: Generated artifact identifier
//! - [`ReservationId`]: Credit reservation (one per paid job)
//! - [`DeviceId`]: Anonymous device identifier carried by a signed device token
//! - [`PaymentOrderId`]: Locally recorded payment order
//!
//! # Permission System
//!
//! - [`Resource`]: What entity type is being accessed
//! - [`Operation`]: What action is being performed
//! - [`Permission`]: Authorization requirement combining resource and operation
//!
//! *-All operations are unrestricted, *-Own operations are limited to the caller's own data.

use std::fmt;
use uuid::Uuid;

pub type UserId = Uuid;
pub type ArtifactId = Uuid;
pub type ReservationId = Uuid;
pub type DeviceId = Uuid;
pub type PaymentOrderId = Uuid;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateAll,
    CreateOwn,
    ReadAll,
    ReadOwn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Users,
    Credits,
    Artifacts,
    Payments,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Permission {
    /// Simple permission: (Resource, Operation)
    Allow(Resource, Operation),
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::CreateAll | Operation::CreateOwn => write!(f, "Create"),
            Operation::ReadAll | Operation::ReadOwn => write!(f, "Read"),
        }
    }
}
