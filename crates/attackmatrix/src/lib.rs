//! MITRE ATT&CK® Matrix Engine
//!
//! Ingests STIX 2.x threat-intelligence bundles and builds one normalized,
//! cross-referenced graph per ATT&CK matrix, then answers structural queries
//! over those graphs.
//!
//! # Architecture
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      ATT&CK MATRIX ENGINE                     │
//! ├──────────────────────────────────────────────────────────────┤
//! │  STIX bundle ──▶ Transformer ──▶ entity index (per matrix)    │
//! │                                      │                        │
//! │                              Relationship Linker              │
//! │                                      │                        │
//! │                               complete Graph ──▶ Cache        │
//! │                                                    │          │
//! │            explore / search / actoroverlap / ttpoverlap       │
//! │                          Query Engine ◀────────────┘          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Graphs are rebuilt wholesale from a fresh bundle and are immutable once
//! assembled; queries never mutate them.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub mod cache;
pub mod catalog;
pub mod fetch;
pub mod link;
pub mod query;
pub mod stix;
pub mod transform;

// =============================================================================
// Entity Model
// =============================================================================

/// Closed set of ATT&CK entity kinds.
///
/// Serialized with the plural labels used in the cache files and the API
/// ("Tactics", "Actors", ...); inside the engine the enum is the only
/// currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    #[serde(rename = "Tactics")]
    Tactic,
    #[serde(rename = "Techniques")]
    Technique,
    #[serde(rename = "Subtechniques")]
    Subtechnique,
    #[serde(rename = "Actors")]
    Actor,
    #[serde(rename = "Malwares")]
    Malware,
    #[serde(rename = "Mitigations")]
    Mitigation,
    #[serde(rename = "Tools")]
    Tool,
}

impl EntityKind {
    /// Every kind, in graph order.
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Tactic,
        EntityKind::Technique,
        EntityKind::Subtechnique,
        EntityKind::Actor,
        EntityKind::Malware,
        EntityKind::Mitigation,
        EntityKind::Tool,
    ];

    /// Plural label used at the serialization/API boundary.
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Tactic => "Tactics",
            EntityKind::Technique => "Techniques",
            EntityKind::Subtechnique => "Subtechniques",
            EntityKind::Actor => "Actors",
            EntityKind::Malware => "Malwares",
            EntityKind::Mitigation => "Mitigations",
            EntityKind::Tool => "Tools",
        }
    }

    /// Upper-cased singular, used in the deprecated/revoked placeholder.
    pub fn placeholder_label(&self) -> &'static str {
        match self {
            EntityKind::Tactic => "TACTIC",
            EntityKind::Technique => "TECHNIQUE",
            EntityKind::Subtechnique => "SUBTECHNIQUE",
            EntityKind::Actor => "ACTOR",
            EntityKind::Malware => "MALWARE",
            EntityKind::Mitigation => "MITIGATION",
            EntityKind::Tool => "TOOL",
        }
    }

    /// The kinds an entity of this kind may hold relation sets for.
    ///
    /// A relationship endpoint that would land on a kind outside this set is
    /// skipped by the linker.
    pub fn relates_to(&self) -> &'static [EntityKind] {
        match self {
            EntityKind::Tactic => &[EntityKind::Technique],
            EntityKind::Technique | EntityKind::Subtechnique => &[
                EntityKind::Actor,
                EntityKind::Malware,
                EntityKind::Mitigation,
                EntityKind::Subtechnique,
                EntityKind::Tool,
            ],
            EntityKind::Actor => &[
                EntityKind::Malware,
                EntityKind::Subtechnique,
                EntityKind::Technique,
                EntityKind::Tool,
            ],
            EntityKind::Malware | EntityKind::Tool => &[
                EntityKind::Actor,
                EntityKind::Subtechnique,
                EntityKind::Technique,
            ],
            EntityKind::Mitigation => &[EntityKind::Subtechnique, EntityKind::Technique],
        }
    }
}

/// Entity display name.
///
/// Scalar for tactics, techniques, subtechniques and mitigations; a list of
/// aliases for actors, malware and tools. The asymmetry is part of the data
/// contract and survives serialization round trips.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityName {
    One(String),
    Many(Vec<String>),
}

impl EntityName {
    /// View the name as a slice of items, regardless of shape.
    pub fn items(&self) -> &[String] {
        match self {
            EntityName::One(name) => std::slice::from_ref(name),
            EntityName::Many(names) => names.as_slice(),
        }
    }

    /// Case-insensitive substring match against any item.
    pub fn contains_term(&self, needle_lower: &str) -> bool {
        self.items()
            .iter()
            .any(|item| item.to_lowercase().contains(needle_lower))
    }
}

impl From<&str> for EntityName {
    fn from(name: &str) -> Self {
        EntityName::One(name.to_string())
    }
}

impl From<String> for EntityName {
    fn from(name: String) -> Self {
        EntityName::One(name)
    }
}

impl From<Vec<String>> for EntityName {
    fn from(names: Vec<String>) -> Self {
        EntityName::Many(names)
    }
}

/// One graph node: name, description and per-kind relation sets.
///
/// The entity's ATT&CK id is the key under which it is stored in the graph.
/// Relation sets exist only for the kinds the entity kind declares, and hold
/// ATT&CK ids of related entities (deduplicated, order-irrelevant).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: EntityName,
    pub description: String,
    /// Parent technique id, set on subtechniques only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtechnique_of: Option<String>,
    #[serde(flatten)]
    pub relations: BTreeMap<EntityKind, BTreeSet<String>>,
}

impl Entity {
    /// Create an entity with empty relation sets for every kind `kind`
    /// declares.
    pub fn new(kind: EntityKind, name: EntityName, description: String) -> Self {
        let relations = kind
            .relates_to()
            .iter()
            .map(|related| (*related, BTreeSet::new()))
            .collect();
        Self {
            name,
            description,
            subtechnique_of: None,
            relations,
        }
    }

    /// Relation set for `kind`, if declared.
    pub fn relation(&self, kind: EntityKind) -> Option<&BTreeSet<String>> {
        self.relations.get(&kind)
    }

    /// Mutable relation set for `kind`; `None` means the kind is not
    /// declared for this entity and the caller must skip the link.
    pub fn relation_mut(&mut self, kind: EntityKind) -> Option<&mut BTreeSet<String>> {
        self.relations.get_mut(&kind)
    }
}

// =============================================================================
// Graph
// =============================================================================

/// One fully assembled ATT&CK matrix: explicit per-kind entity maps keyed by
/// ATT&CK id. Immutable once the linker has run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    /// Matrix name, e.g. "Enterprise".
    pub name: String,
    #[serde(rename = "Tactics")]
    pub tactics: BTreeMap<String, Entity>,
    #[serde(rename = "Techniques")]
    pub techniques: BTreeMap<String, Entity>,
    #[serde(rename = "Subtechniques")]
    pub subtechniques: BTreeMap<String, Entity>,
    #[serde(rename = "Actors")]
    pub actors: BTreeMap<String, Entity>,
    #[serde(rename = "Malwares")]
    pub malwares: BTreeMap<String, Entity>,
    #[serde(rename = "Mitigations")]
    pub mitigations: BTreeMap<String, Entity>,
    #[serde(rename = "Tools")]
    pub tools: BTreeMap<String, Entity>,
}

impl Graph {
    /// Create an empty graph for `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tactics: BTreeMap::new(),
            techniques: BTreeMap::new(),
            subtechniques: BTreeMap::new(),
            actors: BTreeMap::new(),
            malwares: BTreeMap::new(),
            mitigations: BTreeMap::new(),
            tools: BTreeMap::new(),
        }
    }

    /// Entity map for one kind.
    pub fn kind(&self, kind: EntityKind) -> &BTreeMap<String, Entity> {
        match kind {
            EntityKind::Tactic => &self.tactics,
            EntityKind::Technique => &self.techniques,
            EntityKind::Subtechnique => &self.subtechniques,
            EntityKind::Actor => &self.actors,
            EntityKind::Malware => &self.malwares,
            EntityKind::Mitigation => &self.mitigations,
            EntityKind::Tool => &self.tools,
        }
    }

    /// Mutable entity map for one kind (construction only).
    pub fn kind_mut(&mut self, kind: EntityKind) -> &mut BTreeMap<String, Entity> {
        match kind {
            EntityKind::Tactic => &mut self.tactics,
            EntityKind::Technique => &mut self.techniques,
            EntityKind::Subtechnique => &mut self.subtechniques,
            EntityKind::Actor => &mut self.actors,
            EntityKind::Malware => &mut self.malwares,
            EntityKind::Mitigation => &mut self.mitigations,
            EntityKind::Tool => &mut self.tools,
        }
    }

    /// Look up an entity by kind and ATT&CK id.
    pub fn entity(&self, kind: EntityKind, id: &str) -> Option<&Entity> {
        self.kind(kind).get(id)
    }

    /// Total entity count across all kinds.
    pub fn len(&self) -> usize {
        EntityKind::ALL.iter().map(|kind| self.kind(*kind).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// All loaded matrices, keyed by matrix name. The query engine's working
/// snapshot.
pub type GraphSet = BTreeMap<String, Graph>;

// =============================================================================
// Filter Policy
// =============================================================================

/// Construction-time inclusion policy for revoked/deprecated records.
///
/// Filtering happens only while a graph is built; excluded objects are never
/// stored, so a relation may later point at an id that is no longer present.
/// Note the intentional asymmetry: malware and tool records that are revoked
/// are always dropped, regardless of `include_revoked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterPolicy {
    pub include_revoked: bool,
    pub include_deprecated: bool,
}

impl Default for FilterPolicy {
    fn default() -> Self {
        Self {
            include_revoked: true,
            include_deprecated: true,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
