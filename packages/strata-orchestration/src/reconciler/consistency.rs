//! Static consistency checks
//!
//! Advisory only: issues never abort a run.

use std::collections::{HashMap, HashSet};
use std::fmt;

use petgraph::graphmap::DiGraphMap;
use serde::{Deserialize, Serialize};
use strata_storage::{Attribute, AttributeId, DataObject, Layer, ObjectId, Relationship};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub layer: Option<Layer>,
    #[serde(default)]
    pub entity: Option<String>,
    #[serde(default)]
    pub attribute: Option<String>,
    /// Entity names along a relationship cycle, first repeated last
    #[serde(default)]
    pub path: Vec<String>,
}

impl Issue {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            layer: None,
            entity: None,
            attribute: None,
            path: Vec::new(),
        }
    }
}

/// One layer's objects, attributes and relationships
pub struct LayerGraph<'a> {
    pub layer: Layer,
    pub objects: &'a [DataObject],
    pub attributes: &'a HashMap<ObjectId, Vec<Attribute>>,
    pub relationships: &'a [Relationship],
}

/// Every check, for one layer
pub fn check_layer(graph: &LayerGraph<'_>) -> Vec<Issue> {
    let mut issues = nullable_primary_keys(graph);
    issues.extend(unreferenced_foreign_keys(graph));
    issues.extend(relationship_cycles(graph));
    issues
}

/// Primary-key attributes stored as nullable (error)
pub fn nullable_primary_keys(graph: &LayerGraph<'_>) -> Vec<Issue> {
    let mut issues = Vec::new();
    for object in graph.objects {
        for attribute in graph.attributes.get(&object.id).into_iter().flatten() {
            if attribute.is_primary_key && attribute.nullable {
                issues.push(Issue {
                    layer: Some(graph.layer),
                    entity: Some(object.name.clone()),
                    attribute: Some(attribute.name.clone()),
                    ..Issue::new(
                        Severity::Error,
                        format!(
                            "Primary key {}.{} is nullable",
                            object.name, attribute.name
                        ),
                    )
                });
            }
        }
    }
    issues
}

/// Foreign-key attributes no relationship refers to (warning)
///
/// Conceptual relationships are object-level, so only logical and physical
/// layers are checked.
pub fn unreferenced_foreign_keys(graph: &LayerGraph<'_>) -> Vec<Issue> {
    if !graph.layer.requires_attribute_relationships() {
        return Vec::new();
    }

    let referenced: HashSet<AttributeId> = graph
        .relationships
        .iter()
        .filter_map(|r| r.level.attribute_ids())
        .flat_map(|(s, t)| [s, t])
        .collect();

    let mut issues = Vec::new();
    for object in graph.objects {
        for attribute in graph.attributes.get(&object.id).into_iter().flatten() {
            if attribute.is_foreign_key && !referenced.contains(&attribute.id) {
                issues.push(Issue {
                    layer: Some(graph.layer),
                    entity: Some(object.name.clone()),
                    attribute: Some(attribute.name.clone()),
                    ..Issue::new(
                        Severity::Warning,
                        format!(
                            "Foreign key {}.{} is not used by any relationship",
                            object.name, attribute.name
                        ),
                    )
                });
            }
        }
    }
    issues
}

/// Relationship cycles (warning, with the full path)
pub fn relationship_cycles(graph: &LayerGraph<'_>) -> Vec<Issue> {
    let names: HashMap<ObjectId, &str> = graph
        .objects
        .iter()
        .map(|o| (o.id, o.name.as_str()))
        .collect();
    let edges: Vec<(ObjectId, ObjectId)> = graph
        .relationships
        .iter()
        .map(|r| (r.source_object_id, r.target_object_id))
        .collect();

    find_cycles(&edges)
        .into_iter()
        .map(|cycle| {
            let path: Vec<String> = cycle
                .iter()
                .map(|id| {
                    names
                        .get(id)
                        .map(|n| n.to_string())
                        .unwrap_or_else(|| format!("#{}", id))
                })
                .collect();
            Issue {
                layer: Some(graph.layer),
                path: path.clone(),
                ..Issue::new(
                    Severity::Warning,
                    format!("Relationship cycle: {}", path.join(" -> ")),
                )
            }
        })
        .collect()
}

/// Cycles found by depth-first search, each closed by its first node
///
/// Nodes and neighbours are visited in ascending id order; every back edge
/// yields one cycle.
pub fn find_cycles(edges: &[(ObjectId, ObjectId)]) -> Vec<Vec<ObjectId>> {
    let mut graph: DiGraphMap<ObjectId, ()> = DiGraphMap::new();
    for (source, target) in edges {
        graph.add_edge(*source, *target, ());
    }

    let mut nodes: Vec<ObjectId> = graph.nodes().collect();
    nodes.sort_unstable();

    let mut visited = HashSet::new();
    let mut cycles = Vec::new();

    for start in nodes {
        if visited.contains(&start) {
            continue;
        }
        let mut stack: Vec<ObjectId> = Vec::new();
        let mut on_stack = HashSet::new();
        visit(&graph, start, &mut visited, &mut stack, &mut on_stack, &mut cycles);
    }

    cycles
}

fn visit(
    graph: &DiGraphMap<ObjectId, ()>,
    node: ObjectId,
    visited: &mut HashSet<ObjectId>,
    stack: &mut Vec<ObjectId>,
    on_stack: &mut HashSet<ObjectId>,
    cycles: &mut Vec<Vec<ObjectId>>,
) {
    visited.insert(node);
    stack.push(node);
    on_stack.insert(node);

    let mut neighbours: Vec<ObjectId> = graph.neighbors(node).collect();
    neighbours.sort_unstable();

    for next in neighbours {
        if on_stack.contains(&next) {
            if let Some(pos) = stack.iter().position(|n| *n == next) {
                let mut cycle = stack[pos..].to_vec();
                cycle.push(next);
                cycles.push(cycle);
            }
        } else if !visited.contains(&next) {
            visit(graph, next, visited, stack, on_stack, cycles);
        }
    }

    stack.pop();
    on_stack.remove(&node);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use strata_storage::{Cardinality, RelationshipLevel};

    fn object(id: ObjectId, name: &str) -> DataObject {
        let now = Utc::now();
        DataObject {
            id,
            model_id: 1,
            name: name.to_string(),
            description: None,
            object_type: None,
            domain_id: None,
            data_area_id: None,
            target_system_id: None,
            position: None,
            is_visible: true,
            provenance: None,
            metadata: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        }
    }

    fn attribute(id: AttributeId, object_id: ObjectId, name: &str) -> Attribute {
        Attribute {
            id,
            object_id,
            name: name.to_string(),
            description: None,
            data_type: Some("Number".to_string()),
            conceptual_type: None,
            logical_type: None,
            physical_type: None,
            length: None,
            precision: None,
            scale: None,
            nullable: false,
            is_primary_key: false,
            is_foreign_key: false,
            order_index: 0,
            origin_attribute_id: None,
            created_at: Utc::now(),
        }
    }

    fn relationship(source: ObjectId, target: ObjectId, level: RelationshipLevel) -> Relationship {
        let now = Utc::now();
        Relationship {
            id: source * 100 + target,
            model_id: 1,
            layer: Layer::Logical,
            source_object_id: source,
            target_object_id: target,
            level,
            relationship_type: Cardinality::OneToMany,
            source_handle: None,
            target_handle: None,
            name: None,
            description: None,
            canonical_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_triangle_has_exactly_one_cycle() {
        // A=1, B=2, C=3
        let cycles = find_cycles(&[(1, 2), (2, 3), (3, 1)]);
        assert_eq!(cycles, vec![vec![1, 2, 3, 1]]);
    }

    #[test]
    fn test_acyclic_graph_has_no_cycles() {
        assert!(find_cycles(&[(1, 2), (2, 3), (1, 3)]).is_empty());
        assert!(find_cycles(&[]).is_empty());
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        assert_eq!(find_cycles(&[(4, 4)]), vec![vec![4, 4]]);
    }

    #[test]
    fn test_cycle_issue_names_path() {
        let objects = vec![object(1, "A"), object(2, "B"), object(3, "C")];
        let relationships = vec![
            relationship(1, 2, RelationshipLevel::Object),
            relationship(2, 3, RelationshipLevel::Object),
            relationship(3, 1, RelationshipLevel::Object),
        ];
        let attributes = HashMap::new();
        let graph = LayerGraph {
            layer: Layer::Conceptual,
            objects: &objects,
            attributes: &attributes,
            relationships: &relationships,
        };

        let issues = relationship_cycles(&graph);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Warning);
        assert_eq!(issues[0].path, vec!["A", "B", "C", "A"]);
        assert_eq!(issues[0].message, "Relationship cycle: A -> B -> C -> A");
    }

    #[test]
    fn test_nullable_primary_key_is_error() {
        let objects = vec![object(1, "Customer")];
        let mut id = attribute(10, 1, "id");
        id.is_primary_key = true;
        id.nullable = true;
        let attributes = HashMap::from([(1, vec![id, attribute(11, 1, "email")])]);
        let graph = LayerGraph {
            layer: Layer::Logical,
            objects: &objects,
            attributes: &attributes,
            relationships: &[],
        };

        let issues = check_layer(&graph);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Error);
        assert_eq!(issues[0].attribute.as_deref(), Some("id"));
    }

    #[test]
    fn test_unreferenced_foreign_key_is_warning() {
        let objects = vec![object(1, "Order"), object(2, "Customer")];
        let mut used = attribute(20, 1, "customer_id");
        used.is_foreign_key = true;
        let mut unused = attribute(21, 1, "region_id");
        unused.is_foreign_key = true;
        let attributes = HashMap::from([(1, vec![used, unused]), (2, vec![attribute(30, 2, "id")])]);
        let relationships = vec![relationship(1, 2, RelationshipLevel::resolve(Some(20), Some(30)))];

        let graph = LayerGraph {
            layer: Layer::Physical,
            objects: &objects,
            attributes: &attributes,
            relationships: &relationships,
        };
        let issues = unreferenced_foreign_keys(&graph);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].attribute.as_deref(), Some("region_id"));

        let conceptual = LayerGraph {
            layer: Layer::Conceptual,
            ..graph
        };
        assert!(unreferenced_foreign_keys(&conceptual).is_empty());
    }
}
