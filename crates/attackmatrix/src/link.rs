//! Relationship linker
//!
//! Resolves `mitigates`/`uses` relationship records into bidirectional edges
//! inside a freshly transformed graph. Endpoints are resolved through a
//! [`RefIndex`] built in one pass over the bundle, so linking is O(n) in the
//! bundle size instead of rescanning all objects per relationship.
//!
//! Unresolvable links are never fatal: each one is recorded in the
//! [`LinkReport`] so callers can observe what was dropped.

use crate::stix::{AttackBundle, StixObject};
use crate::{EntityKind, FilterPolicy, Graph};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};

/// Relationship types the linker resolves.
const LINKED_RELATIONSHIPS: [&str; 2] = ["mitigates", "uses"];

/// One-pass index from internal bundle id to the resolved entity kind and
/// matrix-scoped ATT&CK id.
pub struct RefIndex {
    map: HashMap<String, (EntityKind, String)>,
}

impl RefIndex {
    /// Scan the bundle once and index every eligible record with a
    /// resolvable ATT&CK id.
    pub fn build(bundle: &AttackBundle, policy: &FilterPolicy) -> Self {
        let mut map = HashMap::new();
        for object in &bundle.objects {
            if !object.eligible(policy) {
                continue;
            }
            let (Some(record), Some(kind)) = (object.domain(), object.kind()) else {
                continue;
            };
            let Some(attack_id) = record.attack_id() else {
                continue;
            };
            // A dot in the ATT&CK id marks a subtechnique, overriding the
            // raw record type.
            let kind = if attack_id.contains('.') {
                EntityKind::Subtechnique
            } else {
                kind
            };
            map.insert(record.id.to_lowercase(), (kind, attack_id.to_string()));
        }
        Self { map }
    }

    /// Resolve an internal bundle id (case-insensitive).
    pub fn resolve(&self, internal_id: &str) -> Option<(EntityKind, &str)> {
        self.map
            .get(&internal_id.to_lowercase())
            .map(|(kind, attack_id)| (*kind, attack_id.as_str()))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Why a relationship (or one direction of it) was not linked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    /// Source or target internal id resolves to no eligible record.
    UnresolvedEndpoint,
    /// Source and target resolve to the same ATT&CK id.
    SelfReference,
    /// The resolved entity is not present in the graph (filtered out).
    NotInGraph { kind: EntityKind, id: String },
    /// The entity cannot hold a relation set of the other endpoint's kind.
    UndeclaredKind {
        kind: EntityKind,
        id: String,
        related: EntityKind,
    },
}

/// A relationship the linker skipped, identified by its raw endpoint refs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedLink {
    pub source_ref: String,
    pub target_ref: String,
    pub reason: SkipReason,
}

/// Outcome of one linking run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LinkReport {
    /// `mitigates`/`uses` relationships examined.
    pub relationships: usize,
    /// Relationships linked in both directions.
    pub linked: usize,
    /// Every skipped relationship or direction, with its reason.
    pub skipped: Vec<SkippedLink>,
}

impl LinkReport {
    fn skip(&mut self, source_ref: &str, target_ref: &str, reason: SkipReason) {
        debug!(source = source_ref, target = target_ref, ?reason, "relation skipped");
        self.skipped.push(SkippedLink {
            source_ref: source_ref.to_string(),
            target_ref: target_ref.to_string(),
            reason,
        });
    }
}

/// Resolve all `mitigates`/`uses` relationships in `bundle` into
/// bidirectional edges inside `graph`.
///
/// Insertions are set-based, so repeated relationships never duplicate ids.
pub fn link(bundle: &AttackBundle, graph: &mut Graph, policy: &FilterPolicy) -> LinkReport {
    let index = RefIndex::build(bundle, policy);
    let mut report = LinkReport::default();

    for object in &bundle.objects {
        if !object.eligible(policy) {
            continue;
        }
        let StixObject::Relationship(rel) = object else {
            continue;
        };
        if !LINKED_RELATIONSHIPS.contains(&rel.relationship_type.as_str()) {
            continue;
        }
        report.relationships += 1;

        let (Some((source_kind, source_id)), Some((target_kind, target_id))) =
            (index.resolve(&rel.source_ref), index.resolve(&rel.target_ref))
        else {
            report.skip(&rel.source_ref, &rel.target_ref, SkipReason::UnresolvedEndpoint);
            continue;
        };
        if source_id == target_id {
            report.skip(&rel.source_ref, &rel.target_ref, SkipReason::SelfReference);
            continue;
        }

        let forward = attach(graph, source_kind, source_id, target_kind, target_id);
        let backward = attach(graph, target_kind, target_id, source_kind, source_id);
        match (forward, backward) {
            (Ok(()), Ok(())) => report.linked += 1,
            (forward, backward) => {
                for reason in [forward.err(), backward.err()].into_iter().flatten() {
                    report.skip(&rel.source_ref, &rel.target_ref, reason);
                }
            }
        }
    }

    info!(
        matrix = %graph.name,
        relationships = report.relationships,
        linked = report.linked,
        skipped = report.skipped.len(),
        "relationships linked"
    );
    report
}

/// Append `other_id` into the relation set of (`kind`, `id`) for
/// `other_kind`.
fn attach(
    graph: &mut Graph,
    kind: EntityKind,
    id: &str,
    other_kind: EntityKind,
    other_id: &str,
) -> Result<(), SkipReason> {
    let Some(entity) = graph.kind_mut(kind).get_mut(id) else {
        return Err(SkipReason::NotInGraph {
            kind,
            id: id.to_string(),
        });
    };
    let Some(set) = entity.relation_mut(other_kind) else {
        return Err(SkipReason::UndeclaredKind {
            kind,
            id: id.to_string(),
            related: other_kind,
        });
    };
    set.insert(other_id.to_string());
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::transform;

    fn decode(objects: serde_json::Value) -> AttackBundle {
        serde_json::from_value(serde_json::json!({
            "type": "bundle",
            "id": "bundle--link-test",
            "objects": objects,
        }))
        .unwrap()
    }

    fn fixture() -> AttackBundle {
        decode(serde_json::json!([
            {"type": "attack-pattern", "id": "attack-pattern--t1059",
             "name": "Command and Scripting Interpreter",
             "external_references": [{"source_name": "mitre-attack", "external_id": "T1059"}]},
            {"type": "attack-pattern", "id": "attack-pattern--t1059001", "name": "PowerShell",
             "x_mitre_is_subtechnique": true,
             "external_references": [{"source_name": "mitre-attack", "external_id": "T1059.001"}]},
            {"type": "intrusion-set", "id": "intrusion-set--g0005", "name": "APT12",
             "external_references": [{"source_name": "mitre-attack", "external_id": "G0005"}]},
            {"type": "malware", "id": "malware--s0040", "name": "HTRAN",
             "x_mitre_aliases": ["HTRAN"],
             "external_references": [{"source_name": "mitre-attack", "external_id": "S0040"}]},
            {"type": "course-of-action", "id": "course-of-action--m1042",
             "name": "Disable or Remove Feature or Program",
             "external_references": [{"source_name": "mitre-attack", "external_id": "M1042"}]},
            // Deprecated technique, filtered out under an excluding policy.
            {"type": "attack-pattern", "id": "attack-pattern--old", "name": "Old Technique",
             "x_mitre_deprecated": true,
             "external_references": [{"source_name": "mitre-attack", "external_id": "T9000"}]},
            {"type": "relationship", "id": "relationship--1", "relationship_type": "uses",
             "source_ref": "intrusion-set--g0005", "target_ref": "attack-pattern--t1059"},
            {"type": "relationship", "id": "relationship--2", "relationship_type": "uses",
             "source_ref": "intrusion-set--g0005", "target_ref": "attack-pattern--t1059001"},
            {"type": "relationship", "id": "relationship--3", "relationship_type": "mitigates",
             "source_ref": "course-of-action--m1042", "target_ref": "attack-pattern--t1059"},
            {"type": "relationship", "id": "relationship--4", "relationship_type": "uses",
             "source_ref": "intrusion-set--g0005", "target_ref": "malware--s0040"},
            // Duplicate of relationship--1; set semantics must deduplicate.
            {"type": "relationship", "id": "relationship--5", "relationship_type": "uses",
             "source_ref": "intrusion-set--g0005", "target_ref": "attack-pattern--t1059"},
            // Ignored relationship type.
            {"type": "relationship", "id": "relationship--6",
             "relationship_type": "subtechnique-of",
             "source_ref": "attack-pattern--t1059001", "target_ref": "attack-pattern--t1059"},
            {"type": "relationship", "id": "relationship--7", "relationship_type": "uses",
             "source_ref": "intrusion-set--g0005", "target_ref": "attack-pattern--old"},
        ]))
    }

    #[test]
    fn test_bidirectional_symmetry() {
        let policy = FilterPolicy::default();
        let bundle = fixture();
        let mut graph = transform(&bundle, "Enterprise", &policy);
        link(&bundle, &mut graph, &policy);

        let actor = graph.entity(EntityKind::Actor, "G0005").unwrap();
        let technique = graph.entity(EntityKind::Technique, "T1059").unwrap();
        assert!(actor.relation(EntityKind::Technique).unwrap().contains("T1059"));
        assert!(technique.relation(EntityKind::Actor).unwrap().contains("G0005"));

        let mitigation = graph.entity(EntityKind::Mitigation, "M1042").unwrap();
        assert!(mitigation.relation(EntityKind::Technique).unwrap().contains("T1059"));
        assert!(technique.relation(EntityKind::Mitigation).unwrap().contains("M1042"));

        let malware = graph.entity(EntityKind::Malware, "S0040").unwrap();
        assert!(actor.relation(EntityKind::Malware).unwrap().contains("S0040"));
        assert!(malware.relation(EntityKind::Actor).unwrap().contains("G0005"));
    }

    #[test]
    fn test_dotted_id_overrides_kind_to_subtechnique() {
        let policy = FilterPolicy::default();
        let bundle = fixture();
        let mut graph = transform(&bundle, "Enterprise", &policy);
        link(&bundle, &mut graph, &policy);

        let actor = graph.entity(EntityKind::Actor, "G0005").unwrap();
        assert!(actor
            .relation(EntityKind::Subtechnique)
            .unwrap()
            .contains("T1059.001"));
        let sub = graph.entity(EntityKind::Subtechnique, "T1059.001").unwrap();
        assert!(sub.relation(EntityKind::Actor).unwrap().contains("G0005"));
    }

    #[test]
    fn test_duplicate_relationships_are_deduplicated() {
        let policy = FilterPolicy::default();
        let bundle = fixture();
        let mut graph = transform(&bundle, "Enterprise", &policy);
        let report = link(&bundle, &mut graph, &policy);

        let actor = graph.entity(EntityKind::Actor, "G0005").unwrap();
        let techniques = actor.relation(EntityKind::Technique).unwrap();
        assert_eq!(techniques.iter().filter(|id| *id == "T1059").count(), 1);
        // All six mitigates/uses relationships were examined.
        assert_eq!(report.relationships, 6);
    }

    #[test]
    fn test_filtered_endpoint_is_skipped_and_reported() {
        let policy = FilterPolicy {
            include_revoked: true,
            include_deprecated: false,
        };
        let bundle = fixture();
        let mut graph = transform(&bundle, "Enterprise", &policy);
        let report = link(&bundle, &mut graph, &policy);

        assert!(graph.techniques.get("T9000").is_none());
        assert!(report.skipped.iter().any(|s| {
            s.target_ref == "attack-pattern--old" && s.reason == SkipReason::UnresolvedEndpoint
        }));
        let actor = graph.entity(EntityKind::Actor, "G0005").unwrap();
        assert!(!actor.relation(EntityKind::Technique).unwrap().contains("T9000"));
    }

    #[test]
    fn test_self_reference_is_skipped() {
        let policy = FilterPolicy::default();
        let bundle = decode(serde_json::json!([
            {"type": "intrusion-set", "id": "intrusion-set--self", "name": "Selfie",
             "external_references": [{"source_name": "mitre-attack", "external_id": "G0001"}]},
            {"type": "relationship", "id": "relationship--self", "relationship_type": "uses",
             "source_ref": "intrusion-set--self", "target_ref": "intrusion-set--self"},
        ]));
        let mut graph = transform(&bundle, "Enterprise", &policy);
        let report = link(&bundle, &mut graph, &policy);
        assert_eq!(report.linked, 0);
        assert_eq!(report.skipped[0].reason, SkipReason::SelfReference);
    }

    #[test]
    fn test_undeclared_kind_is_skipped() {
        let policy = FilterPolicy::default();
        // "uses" between an actor and a mitigation: neither side declares the
        // other's kind, so both directions are skipped.
        let bundle = decode(serde_json::json!([
            {"type": "intrusion-set", "id": "intrusion-set--g1", "name": "Group",
             "external_references": [{"source_name": "mitre-attack", "external_id": "G0002"}]},
            {"type": "course-of-action", "id": "course-of-action--m1", "name": "Mitigation",
             "external_references": [{"source_name": "mitre-attack", "external_id": "M0001"}]},
            {"type": "relationship", "id": "relationship--odd", "relationship_type": "uses",
             "source_ref": "intrusion-set--g1", "target_ref": "course-of-action--m1"},
        ]));
        let mut graph = transform(&bundle, "Enterprise", &policy);
        let report = link(&bundle, &mut graph, &policy);

        assert_eq!(report.linked, 0);
        assert_eq!(report.skipped.len(), 2);
        assert!(report
            .skipped
            .iter()
            .all(|s| matches!(s.reason, SkipReason::UndeclaredKind { .. })));
    }

    #[test]
    fn test_ref_index_resolution_is_case_insensitive() {
        let policy = FilterPolicy::default();
        let bundle = fixture();
        let index = RefIndex::build(&bundle, &policy);
        let (kind, id) = index.resolve("Intrusion-Set--G0005").unwrap();
        assert_eq!(kind, EntityKind::Actor);
        assert_eq!(id, "G0005");
        let (kind, _) = index.resolve("attack-pattern--t1059001").unwrap();
        assert_eq!(kind, EntityKind::Subtechnique);
    }
}
