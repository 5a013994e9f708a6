//! Bundle transformer
//!
//! Turns a decoded bundle into a per-matrix graph of typed entities. Only
//! declared containment is established here (tactic↔technique via the
//! kill-chain naming heuristic, technique↔subtechnique via the id prefix);
//! cross-entity relationships are resolved afterwards by the linker.
//!
//! Construction is sequential and order-sensitive: tactics first, then
//! techniques, subtechniques, and finally the flat kinds.

use crate::stix::{AttackBundle, StixObject};
use crate::{Entity, EntityKind, EntityName, FilterPolicy, Graph};
use tracing::{debug, info, warn};

/// Build the entity graph for one matrix from a decoded bundle.
///
/// Records failing the filter policy, or lacking a resolvable ATT&CK id, are
/// dropped without error. The returned graph has empty cross-entity relation
/// sets except for the containment links.
pub fn transform(bundle: &AttackBundle, matrix: &str, policy: &FilterPolicy) -> Graph {
    let mut graph = Graph::new(matrix);

    collect_tactics(bundle, &mut graph, policy);
    collect_techniques(bundle, &mut graph, policy);
    collect_subtechniques(bundle, &mut graph, policy);
    collect_flat_kind(bundle, &mut graph, policy, EntityKind::Actor);
    collect_flat_kind(bundle, &mut graph, policy, EntityKind::Malware);
    collect_flat_kind(bundle, &mut graph, policy, EntityKind::Mitigation);
    collect_flat_kind(bundle, &mut graph, policy, EntityKind::Tool);

    info!(
        matrix,
        tactics = graph.tactics.len(),
        techniques = graph.techniques.len(),
        subtechniques = graph.subtechniques.len(),
        actors = graph.actors.len(),
        malwares = graph.malwares.len(),
        mitigations = graph.mitigations.len(),
        tools = graph.tools.len(),
        "matrix transformed"
    );
    graph
}

fn collect_tactics(bundle: &AttackBundle, graph: &mut Graph, policy: &FilterPolicy) {
    for object in &bundle.objects {
        if !object.eligible(policy) {
            continue;
        }
        let StixObject::Tactic(tactic) = object else {
            continue;
        };
        let (Some(id), Some(name)) = (tactic.attack_id(), tactic.name.clone()) else {
            debug!(internal_id = %tactic.id, "tactic without ATT&CK id or name dropped");
            continue;
        };
        graph.tactics.insert(
            id.to_string(),
            Entity::new(
                EntityKind::Tactic,
                EntityName::One(name),
                tactic.description_or_default(),
            ),
        );
    }
}

fn collect_techniques(bundle: &AttackBundle, graph: &mut Graph, policy: &FilterPolicy) {
    for object in &bundle.objects {
        if !object.eligible(policy) {
            continue;
        }
        let StixObject::AttackPattern(pattern) = object else {
            continue;
        };
        if pattern.x_mitre_is_subtechnique {
            continue;
        }
        let record = &pattern.common;
        let (Some(id), Some(name)) = (record.attack_id(), record.name.clone()) else {
            debug!(internal_id = %record.id, "technique without ATT&CK id or name dropped");
            continue;
        };
        let id = id.to_string();
        graph.techniques.insert(
            id.clone(),
            Entity::new(
                EntityKind::Technique,
                EntityName::One(name),
                record.description_or_default(),
            ),
        );

        // Tactic containment is a naming heuristic: the tactic's name must
        // appear, case-insensitively, inside the kill-chain phase name.
        for phase in &record.kill_chain_phases {
            if !crate::stix::is_attack_source(&phase.kill_chain_name) {
                continue;
            }
            let phase_name = phase.phase_name.replace('-', " ").to_lowercase();
            let matching: Vec<String> = graph
                .tactics
                .iter()
                .filter(|(_, tactic)| {
                    tactic
                        .name
                        .items()
                        .iter()
                        .any(|name| phase_name.contains(&name.to_lowercase()))
                })
                .map(|(tactic_id, _)| tactic_id.clone())
                .collect();
            for tactic_id in matching {
                if let Some(techniques) = graph
                    .tactics
                    .get_mut(&tactic_id)
                    .and_then(|tactic| tactic.relation_mut(EntityKind::Technique))
                {
                    techniques.insert(id.clone());
                }
            }
        }
    }
}

fn collect_subtechniques(bundle: &AttackBundle, graph: &mut Graph, policy: &FilterPolicy) {
    for object in &bundle.objects {
        if !object.eligible(policy) {
            continue;
        }
        let StixObject::AttackPattern(pattern) = object else {
            continue;
        };
        if !pattern.x_mitre_is_subtechnique {
            continue;
        }
        let record = &pattern.common;
        let (Some(id), Some(name)) = (record.attack_id(), record.name.clone()) else {
            debug!(internal_id = %record.id, "subtechnique without ATT&CK id or name dropped");
            continue;
        };
        let id = id.to_string();
        // Parent technique id is the prefix before the dot.
        let parent_id = id.split('.').next().unwrap_or(&id).to_string();
        let Some(parent) = graph.techniques.get_mut(&parent_id) else {
            warn!(subtechnique = %id, parent = %parent_id, "parent technique not in matrix, skipped");
            continue;
        };
        if let Some(subtechniques) = parent.relation_mut(EntityKind::Subtechnique) {
            subtechniques.insert(id.clone());
        }
        let mut entity = Entity::new(
            EntityKind::Subtechnique,
            EntityName::One(name),
            record.description_or_default(),
        );
        entity.subtechnique_of = Some(parent_id);
        graph.subtechniques.insert(id, entity);
    }
}

fn collect_flat_kind(bundle: &AttackBundle, graph: &mut Graph, policy: &FilterPolicy, kind: EntityKind) {
    for object in &bundle.objects {
        if !object.eligible(policy) || object.kind() != Some(kind) {
            continue;
        }
        let Some(record) = object.domain() else {
            continue;
        };
        let Some(id) = record.attack_id() else {
            debug!(internal_id = %record.id, kind = kind.label(), "record without ATT&CK id dropped");
            continue;
        };
        let name = match kind {
            EntityKind::Actor => record.alias_name(),
            EntityKind::Malware | EntityKind::Tool => record.mitre_alias_name(),
            _ => record.name.clone().map(EntityName::One),
        };
        let Some(name) = name else {
            debug!(internal_id = %record.id, kind = kind.label(), "record without name dropped");
            continue;
        };
        graph.kind_mut(kind).insert(
            id.to_string(),
            Entity::new(kind, name, record.description_or_default()),
        );
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stix::NO_DESCRIPTION;

    fn decode(objects: serde_json::Value) -> AttackBundle {
        serde_json::from_value(serde_json::json!({
            "type": "bundle",
            "id": "bundle--test",
            "objects": objects,
        }))
        .unwrap()
    }

    fn fixture() -> AttackBundle {
        decode(serde_json::json!([
            {"type": "x-mitre-tactic", "id": "x-mitre-tactic--1", "name": "Execution",
             "description": "The adversary is trying to run malicious code.",
             "external_references": [{"source_name": "mitre-attack", "external_id": "TA0002"}]},
            {"type": "attack-pattern", "id": "attack-pattern--1",
             "name": "Command and Scripting Interpreter",
             "description": "Abuse of command interpreters.",
             "kill_chain_phases": [{"kill_chain_name": "mitre-attack", "phase_name": "execution"}],
             "external_references": [{"source_name": "mitre-attack", "external_id": "T1059"}]},
            {"type": "attack-pattern", "id": "attack-pattern--2", "name": "PowerShell",
             "x_mitre_is_subtechnique": true,
             "external_references": [{"source_name": "mitre-attack", "external_id": "T1059.001"}]},
            {"type": "intrusion-set", "id": "intrusion-set--1", "name": "APT12",
             "aliases": ["APT12", "IXESHE"],
             "description": "APT12 is a threat group.",
             "external_references": [{"source_name": "mitre-attack", "external_id": "G0005"}]},
            {"type": "malware", "id": "malware--1", "name": "HTRAN",
             "x_mitre_aliases": ["HTRAN", "HUC Packet Transmit Tool"],
             "external_references": [{"source_name": "mitre-attack", "external_id": "S0040"}]},
            {"type": "course-of-action", "id": "course-of-action--1",
             "name": "Disable or Remove Feature or Program",
             "description": "Remove unused features.",
             "external_references": [{"source_name": "mitre-attack", "external_id": "M1042"}]},
            {"type": "tool", "id": "tool--1", "name": "Net",
             "x_mitre_aliases": ["Net", "net.exe"],
             "description": "A Windows utility.",
             "external_references": [{"source_name": "mitre-attack", "external_id": "S0002"}]},
        ]))
    }

    #[test]
    fn test_builds_all_kinds_with_containment() {
        let graph = transform(&fixture(), "Enterprise", &FilterPolicy::default());

        assert_eq!(graph.name, "Enterprise");
        let tactic = graph.entity(EntityKind::Tactic, "TA0002").unwrap();
        assert!(tactic.relation(EntityKind::Technique).unwrap().contains("T1059"));

        let technique = graph.entity(EntityKind::Technique, "T1059").unwrap();
        assert!(technique
            .relation(EntityKind::Subtechnique)
            .unwrap()
            .contains("T1059.001"));

        let sub = graph.entity(EntityKind::Subtechnique, "T1059.001").unwrap();
        assert_eq!(sub.subtechnique_of.as_deref(), Some("T1059"));
        assert_eq!(sub.description, NO_DESCRIPTION);

        assert!(graph.actors.contains_key("G0005"));
        assert!(graph.malwares.contains_key("S0040"));
        assert!(graph.mitigations.contains_key("M1042"));
        assert!(graph.tools.contains_key("S0002"));
    }

    #[test]
    fn test_actor_name_is_alias_list() {
        let graph = transform(&fixture(), "Enterprise", &FilterPolicy::default());
        let actor = graph.entity(EntityKind::Actor, "G0005").unwrap();
        assert_eq!(
            actor.name,
            EntityName::Many(vec!["APT12".to_string(), "IXESHE".to_string()])
        );
        // Tactic names stay scalar.
        let tactic = graph.entity(EntityKind::Tactic, "TA0002").unwrap();
        assert_eq!(tactic.name, EntityName::One("Execution".to_string()));
    }

    #[test]
    fn test_record_without_attack_reference_is_dropped() {
        let bundle = decode(serde_json::json!([
            {"type": "intrusion-set", "id": "intrusion-set--x", "name": "Nameless",
             "external_references": [{"source_name": "capec", "external_id": "CAPEC-7"}]},
        ]));
        let graph = transform(&bundle, "Enterprise", &FilterPolicy::default());
        assert!(graph.actors.is_empty());
    }

    #[test]
    fn test_deprecated_records_follow_policy() {
        let bundle = decode(serde_json::json!([
            {"type": "intrusion-set", "id": "intrusion-set--d", "name": "Old Group",
             "x_mitre_deprecated": true,
             "external_references": [{"source_name": "mitre-attack", "external_id": "G0099"}]},
        ]));

        let included = transform(&bundle, "Enterprise", &FilterPolicy::default());
        assert!(included.actors.contains_key("G0099"));

        let policy = FilterPolicy {
            include_revoked: true,
            include_deprecated: false,
        };
        let excluded = transform(&bundle, "Enterprise", &policy);
        assert!(excluded.actors.is_empty());
    }

    #[test]
    fn test_revoked_malware_dropped_unconditionally() {
        let bundle = decode(serde_json::json!([
            {"type": "malware", "id": "malware--r", "name": "Old RAT", "revoked": true,
             "x_mitre_aliases": ["Old RAT"],
             "external_references": [{"source_name": "mitre-attack", "external_id": "S0999"}]},
            {"type": "tool", "id": "tool--r", "name": "Old Tool", "revoked": true,
             "x_mitre_aliases": ["Old Tool"],
             "external_references": [{"source_name": "mitre-attack", "external_id": "S0998"}]},
            {"type": "intrusion-set", "id": "intrusion-set--r", "name": "Revoked Group",
             "revoked": true,
             "external_references": [{"source_name": "mitre-attack", "external_id": "G0098"}]},
        ]));
        // include_revoked keeps the actor but never revoked malware/tools.
        let graph = transform(&bundle, "Enterprise", &FilterPolicy::default());
        assert!(graph.malwares.is_empty());
        assert!(graph.tools.is_empty());
        assert!(graph.actors.contains_key("G0098"));
    }

    #[test]
    fn test_subtechnique_without_parent_is_skipped() {
        let bundle = decode(serde_json::json!([
            {"type": "attack-pattern", "id": "attack-pattern--orphan", "name": "Orphan",
             "x_mitre_is_subtechnique": true,
             "external_references": [{"source_name": "mitre-attack", "external_id": "T9999.001"}]},
        ]));
        let graph = transform(&bundle, "Enterprise", &FilterPolicy::default());
        assert!(graph.subtechniques.is_empty());
    }

    #[test]
    fn test_tactic_match_is_case_insensitive_substring() {
        let bundle = decode(serde_json::json!([
            {"type": "x-mitre-tactic", "id": "x-mitre-tactic--pe", "name": "Privilege Escalation",
             "description": "Gain higher-level permissions.",
             "external_references": [{"source_name": "mitre-attack", "external_id": "TA0004"}]},
            {"type": "attack-pattern", "id": "attack-pattern--st", "name": "Scheduled Task/Job",
             "kill_chain_phases": [
                 {"kill_chain_name": "mitre-attack", "phase_name": "privilege-escalation"}],
             "external_references": [{"source_name": "mitre-attack", "external_id": "T1053"}]},
        ]));
        let graph = transform(&bundle, "Enterprise", &FilterPolicy::default());
        let tactic = graph.entity(EntityKind::Tactic, "TA0004").unwrap();
        assert!(tactic.relation(EntityKind::Technique).unwrap().contains("T1053"));
    }
}
