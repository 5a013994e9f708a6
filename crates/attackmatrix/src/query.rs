//! Query engine
//!
//! Structural queries over one or more assembled graphs: raw subtree
//! exploration, multi-term substring search, pairwise actor comparison and
//! multi-id TTP matching. The graph set is an immutable snapshot; queries
//! never mutate it and never fail — an unknown matrix, path or id yields an
//! empty or absent result.

use crate::{Entity, EntityKind, EntityName, Graph, GraphSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Kinds unfolded in `search` results. Tool relations are intentionally not
/// unfolded there.
pub const SEARCH_UNFOLD_KINDS: [EntityKind; 5] = [
    EntityKind::Actor,
    EntityKind::Malware,
    EntityKind::Mitigation,
    EntityKind::Subtechnique,
    EntityKind::Technique,
];

/// Kinds counting as TTPs for `ttp_overlap`.
pub const TTP_KINDS: [EntityKind; 4] = [
    EntityKind::Malware,
    EntityKind::Subtechnique,
    EntityKind::Technique,
    EntityKind::Tool,
];

/// Kinds compared by `actor_overlap`.
pub const OVERLAP_KINDS: [EntityKind; 5] = [
    EntityKind::Malware,
    EntityKind::Mitigation,
    EntityKind::Subtechnique,
    EntityKind::Technique,
    EntityKind::Tool,
];

/// `{name, description}` summary of a related entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySummary {
    pub name: EntityName,
    pub description: String,
}

impl EntitySummary {
    fn of(entity: &Entity) -> Self {
        Self {
            name: entity.name.clone(),
            description: entity.description.clone(),
        }
    }

    /// Placeholder for a relation id that no longer resolves (dropped by the
    /// construction-time filter).
    fn placeholder(id: &str, kind: EntityKind) -> Self {
        Self {
            name: EntityName::One(id.to_string()),
            description: format!("*** DEPRECATED OR REVOKED {} ***", kind.placeholder_label()),
        }
    }
}

/// An entity with its immediate relation ids replaced by summaries,
/// denormalized for output. Only non-empty relation kinds appear.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnfoldedEntity {
    pub name: EntityName,
    pub description: String,
    #[serde(flatten)]
    pub relations: BTreeMap<EntityKind, BTreeMap<String, EntitySummary>>,
}

/// Unfold `entity`'s relation ids for the given kinds against `graph`.
pub fn unfold(graph: &Graph, entity: &Entity, kinds: &[EntityKind]) -> UnfoldedEntity {
    let mut relations = BTreeMap::new();
    for kind in kinds {
        let Some(ids) = entity.relation(*kind) else {
            continue;
        };
        if ids.is_empty() {
            continue;
        }
        let unfolded: BTreeMap<String, EntitySummary> = ids
            .iter()
            .map(|id| {
                let summary = match graph.entity(*kind, id) {
                    Some(related) => EntitySummary::of(related),
                    None => EntitySummary::placeholder(id, *kind),
                };
                (id.clone(), summary)
            })
            .collect();
        relations.insert(*kind, unfolded);
    }
    UnfoldedEntity {
        name: entity.name.clone(),
        description: entity.description.clone(),
        relations,
    }
}

// =============================================================================
// explore
// =============================================================================

/// Return the raw subtree at a slash-delimited path
/// (`matrix/kind/id/...`), or `None` when the path does not resolve.
/// An empty path yields the whole snapshot.
pub fn explore(graphs: &GraphSet, path: &str) -> Option<Value> {
    let root = serde_json::to_value(graphs).ok()?;
    let mut node = &root;
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        node = match node {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(node.clone())
}

// =============================================================================
// search
// =============================================================================

/// Which matrices a search runs against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatrixFilter {
    All,
    Named(Vec<String>),
}

impl MatrixFilter {
    /// Build a filter from raw request parameters; an empty list or the
    /// literal `ALL` selects every loaded matrix.
    pub fn from_params(names: Vec<String>) -> Self {
        if names.is_empty() || names.iter().any(|n| n == "ALL") {
            MatrixFilter::All
        } else {
            MatrixFilter::Named(names)
        }
    }

    fn selects(&self, name: &str) -> bool {
        match self {
            MatrixFilter::All => true,
            MatrixFilter::Named(names) => names.iter().any(|n| n == name),
        }
    }
}

/// Search results grouped matrix → kind → id; empty groups are omitted.
pub type SearchResults = BTreeMap<String, BTreeMap<EntityKind, BTreeMap<String, UnfoldedEntity>>>;

/// Case-insensitive OR-search of all terms over entity names and
/// descriptions in the selected matrices. Matched entities are emitted once,
/// unfolded.
pub fn search(graphs: &GraphSet, terms: &[String], filter: &MatrixFilter) -> SearchResults {
    let mut results = SearchResults::new();
    if terms.is_empty() {
        return results;
    }
    let terms: Vec<String> = terms.iter().map(|t| t.to_lowercase()).collect();

    for (matrix_name, graph) in graphs {
        if !filter.selects(matrix_name) {
            continue;
        }
        let mut per_kind: BTreeMap<EntityKind, BTreeMap<String, UnfoldedEntity>> = BTreeMap::new();
        for kind in EntityKind::ALL {
            for (id, entity) in graph.kind(kind) {
                let description = entity.description.to_lowercase();
                let hit = terms
                    .iter()
                    .any(|term| entity.name.contains_term(term) || description.contains(term));
                if hit {
                    per_kind
                        .entry(kind)
                        .or_default()
                        .insert(id.clone(), unfold(graph, entity, &SEARCH_UNFOLD_KINDS));
                }
            }
        }
        if !per_kind.is_empty() {
            results.insert(matrix_name.clone(), per_kind);
        }
    }
    results
}

// =============================================================================
// actor_overlap
// =============================================================================

/// Merged identity of one actor across every matrix it appears in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorProfile {
    /// Deduplicated alias list, merged across matrices.
    pub name: Vec<String>,
    /// Concatenated unique descriptions.
    pub description: String,
}

/// The matrices either actor was found in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixList {
    pub name: BTreeSet<String>,
    pub description: String,
}

/// Result of comparing two actors: their merged profiles, the matrices they
/// were found in, and every overlapping TTP kind unfolded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActorOverlap {
    #[serde(rename = "Actors")]
    pub actors: BTreeMap<String, ActorProfile>,
    #[serde(rename = "Matrices")]
    pub matrices: MatrixList,
    #[serde(flatten)]
    pub overlap: BTreeMap<EntityKind, BTreeMap<String, EntitySummary>>,
}

struct ActorUnion {
    profile: ActorProfile,
    matrices: BTreeSet<String>,
    ttps: BTreeMap<EntityKind, BTreeSet<String>>,
}

fn collect_actor(graphs: &GraphSet, id: &str) -> ActorUnion {
    let mut names: Vec<String> = Vec::new();
    let mut description = String::new();
    let mut matrices = BTreeSet::new();
    let mut ttps: BTreeMap<EntityKind, BTreeSet<String>> = BTreeMap::new();

    for (matrix_name, graph) in graphs {
        let Some(actor) = graph.actors.get(id) else {
            continue;
        };
        matrices.insert(matrix_name.clone());
        for kind in OVERLAP_KINDS {
            if let Some(ids) = actor.relation(kind) {
                ttps.entry(kind).or_default().extend(ids.iter().cloned());
            }
        }
        for name in actor.name.items() {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        let trimmed = actor.description.trim();
        if !trimmed.is_empty() && !description.contains(trimmed) {
            description.push_str(trimmed);
            description.push(' ');
        }
    }

    ActorUnion {
        profile: ActorProfile {
            name: names,
            description: description.trim().to_string(),
        },
        matrices,
        ttps,
    }
}

/// Look a related id up in whichever matrix holds it, falling back to the
/// deprecated/revoked placeholder.
fn summary_across(graphs: &GraphSet, kind: EntityKind, id: &str) -> EntitySummary {
    graphs
        .values()
        .find_map(|graph| graph.entity(kind, id).map(EntitySummary::of))
        .unwrap_or_else(|| EntitySummary::placeholder(id, kind))
}

/// Compare two actors across all loaded matrices: per-kind membership
/// intersection of their unioned relation sets. `None` when no kind
/// overlaps.
pub fn actor_overlap(graphs: &GraphSet, id1: &str, id2: &str) -> Option<ActorOverlap> {
    let actor1 = collect_actor(graphs, id1);
    let actor2 = collect_actor(graphs, id2);

    let mut overlap: BTreeMap<EntityKind, BTreeMap<String, EntitySummary>> = BTreeMap::new();
    for kind in OVERLAP_KINDS {
        let (Some(set1), Some(set2)) = (actor1.ttps.get(&kind), actor2.ttps.get(&kind)) else {
            continue;
        };
        let shared: Vec<&String> = set1.intersection(set2).collect();
        if shared.is_empty() {
            continue;
        }
        let unfolded = shared
            .into_iter()
            .map(|id| (id.clone(), summary_across(graphs, kind, id)))
            .collect();
        overlap.insert(kind, unfolded);
    }
    if overlap.is_empty() {
        return None;
    }

    let mut actors = BTreeMap::new();
    actors.insert(id1.to_string(), actor1.profile);
    actors.insert(id2.to_string(), actor2.profile);

    Some(ActorOverlap {
        actors,
        matrices: MatrixList {
            name: actor1.matrices.union(&actor2.matrices).cloned().collect(),
            description: "List of ATT&CK® matrices in which the actors have been found"
                .to_string(),
        },
        overlap,
    })
}

// =============================================================================
// ttp_overlap
// =============================================================================

/// Matching actors for one matrix.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatrixActors {
    #[serde(rename = "Actors")]
    pub actors: BTreeMap<String, UnfoldedEntity>,
}

/// Per matrix, every actor whose unioned TTP ids contain all of `ttp_ids`
/// and are non-empty. An empty `ttp_ids` list therefore matches every actor
/// with at least one TTP; that rule is part of the contract. Matrices with
/// no matching actors are omitted.
pub fn ttp_overlap(graphs: &GraphSet, ttp_ids: &[String]) -> BTreeMap<String, MatrixActors> {
    let mut results = BTreeMap::new();
    for (matrix_name, graph) in graphs {
        let mut actors = BTreeMap::new();
        for (id, actor) in &graph.actors {
            let mut union: BTreeSet<&str> = BTreeSet::new();
            for kind in TTP_KINDS {
                if let Some(ids) = actor.relation(kind) {
                    union.extend(ids.iter().map(String::as_str));
                }
            }
            if union.is_empty() {
                continue;
            }
            if ttp_ids.iter().all(|ttp| union.contains(ttp.as_str())) {
                actors.insert(id.clone(), unfold(graph, actor, &TTP_KINDS));
            }
        }
        if !actors.is_empty() {
            results.insert(matrix_name.clone(), MatrixActors { actors });
        }
    }
    results
}

// =============================================================================
// Tests
// =============================================================================
