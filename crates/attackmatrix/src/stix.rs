//! STIX 2.x bundle decoding
//!
//! Typed view of the raw ATT&CK bundle: an ordered list of heterogeneous
//! records. Only the object types the engine consumes are modelled; anything
//! else decodes to [`StixObject::Other`] and is ignored.

use crate::{EntityKind, EntityName, FilterPolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Description used when a record carries none.
pub const NO_DESCRIPTION: &str = "Not available.";

/// Bundle decode/read failures. A malformed bundle never yields a partial
/// graph; the error is surfaced before transformation starts.
#[derive(Debug, Error)]
pub enum BundleError {
    #[error("malformed bundle: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("cannot read bundle: {0}")]
    Io(#[from] std::io::Error),
}

/// A decoded STIX bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackBundle {
    #[serde(rename = "type")]
    pub bundle_type: String,
    pub id: String,
    pub objects: Vec<StixObject>,
}

impl AttackBundle {
    /// Decode a bundle from raw JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, BundleError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Decode a bundle from a file on disk.
    pub fn from_file(path: &Path) -> Result<Self, BundleError> {
        let bytes = std::fs::read(path)?;
        Self::from_slice(&bytes)
    }
}

/// One bundle record, discriminated by its STIX `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StixObject {
    #[serde(rename = "x-mitre-tactic")]
    Tactic(DomainObject),
    #[serde(rename = "attack-pattern")]
    AttackPattern(AttackPattern),
    #[serde(rename = "intrusion-set")]
    IntrusionSet(DomainObject),
    #[serde(rename = "malware")]
    Malware(DomainObject),
    #[serde(rename = "course-of-action")]
    CourseOfAction(DomainObject),
    #[serde(rename = "tool")]
    Tool(DomainObject),
    #[serde(rename = "relationship")]
    Relationship(Relationship),
    #[serde(other)]
    Other,
}

/// Fields shared by the STIX domain objects the engine consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainObject {
    /// Internal bundle id (`intrusion-set--uuid`), not the ATT&CK id.
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub aliases: Option<Vec<String>>,
    #[serde(default)]
    pub x_mitre_aliases: Option<Vec<String>>,
    #[serde(default)]
    pub external_references: Vec<ExternalReference>,
    #[serde(default)]
    pub kill_chain_phases: Vec<KillChainPhase>,
    #[serde(default)]
    pub revoked: bool,
    #[serde(default)]
    pub x_mitre_deprecated: bool,
}

/// An `attack-pattern` record; a technique or, when flagged, a subtechnique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackPattern {
    #[serde(flatten)]
    pub common: DomainObject,
    #[serde(default)]
    pub x_mitre_is_subtechnique: bool,
}

/// A `relationship` record linking two internal bundle ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    pub relationship_type: String,
    pub source_ref: String,
    pub target_ref: String,
    #[serde(default)]
    pub revoked: bool,
    #[serde(default)]
    pub x_mitre_deprecated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalReference {
    pub source_name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillChainPhase {
    pub kill_chain_name: String,
    pub phase_name: String,
}

impl DomainObject {
    /// Resolve the matrix-scoped ATT&CK id: the `external_id` of the first
    /// reference whose source names the ATT&CK namespace. Records without one
    /// are dropped by the transformer.
    pub fn attack_id(&self) -> Option<&str> {
        self.external_references
            .iter()
            .find(|r| r.external_id.is_some() && is_attack_source(&r.source_name))
            .and_then(|r| r.external_id.as_deref())
    }

    /// Description, falling back to [`NO_DESCRIPTION`].
    pub fn description_or_default(&self) -> String {
        self.description
            .clone()
            .unwrap_or_else(|| NO_DESCRIPTION.to_string())
    }

    /// Actor naming: the alias list when present, the scalar name otherwise.
    pub fn alias_name(&self) -> Option<EntityName> {
        match &self.aliases {
            Some(aliases) => Some(EntityName::Many(aliases.clone())),
            None => self.name.clone().map(EntityName::One),
        }
    }

    /// Malware/tool naming: `x_mitre_aliases` when present, the scalar name
    /// otherwise.
    pub fn mitre_alias_name(&self) -> Option<EntityName> {
        match &self.x_mitre_aliases {
            Some(aliases) => Some(EntityName::Many(aliases.clone())),
            None => self.name.clone().map(EntityName::One),
        }
    }
}

impl StixObject {
    /// Shared domain fields, when this record has them.
    pub fn domain(&self) -> Option<&DomainObject> {
        match self {
            StixObject::Tactic(o)
            | StixObject::IntrusionSet(o)
            | StixObject::Malware(o)
            | StixObject::CourseOfAction(o)
            | StixObject::Tool(o) => Some(o),
            StixObject::AttackPattern(ap) => Some(&ap.common),
            StixObject::Relationship(_) | StixObject::Other => None,
        }
    }

    /// Graph kind this record maps to. `attack-pattern` records split on the
    /// subtechnique flag; the linker may still override to Subtechnique based
    /// on a `.` in the resolved ATT&CK id.
    pub fn kind(&self) -> Option<EntityKind> {
        match self {
            StixObject::Tactic(_) => Some(EntityKind::Tactic),
            StixObject::AttackPattern(ap) => Some(if ap.x_mitre_is_subtechnique {
                EntityKind::Subtechnique
            } else {
                EntityKind::Technique
            }),
            StixObject::IntrusionSet(_) => Some(EntityKind::Actor),
            StixObject::Malware(_) => Some(EntityKind::Malware),
            StixObject::CourseOfAction(_) => Some(EntityKind::Mitigation),
            StixObject::Tool(_) => Some(EntityKind::Tool),
            StixObject::Relationship(_) | StixObject::Other => None,
        }
    }

    /// Whether the filter policy admits this record.
    ///
    /// Revoked malware and tool records are dropped unconditionally, even
    /// with `include_revoked` set; that asymmetry is part of the contract.
    pub fn eligible(&self, policy: &FilterPolicy) -> bool {
        let (revoked, deprecated) = match self {
            StixObject::Malware(o) | StixObject::Tool(o) => {
                return !o.revoked && (!o.x_mitre_deprecated || policy.include_deprecated);
            }
            StixObject::Tactic(o) | StixObject::IntrusionSet(o) | StixObject::CourseOfAction(o) => {
                (o.revoked, o.x_mitre_deprecated)
            }
            StixObject::AttackPattern(ap) => (ap.common.revoked, ap.common.x_mitre_deprecated),
            StixObject::Relationship(r) => (r.revoked, r.x_mitre_deprecated),
            StixObject::Other => return false,
        };
        (!revoked || policy.include_revoked) && (!deprecated || policy.include_deprecated)
    }
}

/// Does this reference/kill-chain source name identify the ATT&CK namespace?
/// Matches `mitre-attack`, `mitre-ics-attack`, `mitre-mobile-attack`, ...
pub fn is_attack_source(source_name: &str) -> bool {
    source_name.to_lowercase().contains("attack")
}

// =============================================================================
// Tests
// =============================================================================
