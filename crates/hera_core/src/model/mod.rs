//! Generic business data model shared by every vertical.
//!
//! # Responsibility
//! - Define the six base relations (organization, entity, dynamic field,
//!   relationship, transaction header, transaction line).
//! - Keep one storage shape for unrelated verticals; no per-domain types.
//!
//! # Invariants
//! - Every record except `Organization` carries an `organization_id`.
//! - Records are retired via status transitions once referenced, not deleted.

pub mod dynamic;
pub mod entity;
pub mod organization;
pub mod relationship;
pub mod status;
pub mod transaction;
