//! Tenant lifecycle events consumed by projections.
//!
//! Instances and organisations are managed elsewhere; only their removal
//! matters here.

use serde::{Deserialize, Serialize};
use warden_macros::DomainEvent;

pub const INSTANCE_AGGREGATE: &str = "instance";
pub const ORG_AGGREGATE: &str = "org";

/// The whole instance is torn down. The instance id is the aggregate's
/// instance scope.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, DomainEvent)]
#[event(kind = "instance.removed")]
pub struct InstanceRemoved {}

/// An organisation was removed. The organisation id is the aggregate id.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, DomainEvent)]
#[event(kind = "org.removed")]
pub struct OrgRemoved {
    #[serde(default)]
    pub name: String,
}
