//! In-memory adjacency form of a persisted workflow graph.
//!
//! Derived once at run start; insertion order of the underlying rows is
//! irrelevant from here on. Nodes are steps or block groups; edges connect
//! nodes within the same scope (top level, or the body of one group).
//! Edges into a group target its reserved `group-input` port; the group's
//! body is a nested scope executed by the group driver.

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::model::{BlockGroup, Edge, Step, WorkflowGraphData};

/// A node in the executable graph: a step or a group container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeId {
    Step(Uuid),
    Group(Uuid),
}

/// A validated edge with resolved endpoints.
#[derive(Debug, Clone)]
pub struct GraphEdge {
    pub id: Uuid,
    pub source: NodeId,
    pub target: NodeId,
    /// `None` routes from the source's default output port
    pub source_port: Option<String>,
    pub target_port: String,
    pub condition: Option<String>,
}

/// Adjacency-list view of one workflow, scoped by group membership.
#[derive(Debug)]
pub struct WorkflowGraph {
    steps: HashMap<Uuid, Step>,
    groups: HashMap<Uuid, BlockGroup>,
    edges: Vec<GraphEdge>,
    /// scope (None = top level) → member nodes
    members: HashMap<Option<Uuid>, Vec<NodeId>>,
    incoming: HashMap<NodeId, Vec<usize>>,
    outgoing: HashMap<NodeId, Vec<usize>>,
}

impl WorkflowGraph {
    /// Validate the persisted rows and derive the adjacency form.
    pub fn build(data: &WorkflowGraphData) -> Result<Self, EngineError> {
        let steps: HashMap<Uuid, Step> =
            data.steps.iter().map(|s| (s.id, s.clone())).collect();
        let groups: HashMap<Uuid, BlockGroup> =
            data.groups.iter().map(|g| (g.id, g.clone())).collect();

        // Group nesting must be acyclic and reference known groups.
        for group in groups.values() {
            let mut seen = HashSet::new();
            let mut current = group.parent_group_id;
            seen.insert(group.id);
            while let Some(parent_id) = current {
                if !seen.insert(parent_id) {
                    return Err(EngineError::validation(format!(
                        "group '{}' participates in a parent cycle",
                        group.name
                    )));
                }
                let parent = groups.get(&parent_id).ok_or_else(|| {
                    EngineError::validation(format!(
                        "group '{}' references unknown parent group {parent_id}",
                        group.name
                    ))
                })?;
                current = parent.parent_group_id;
            }
        }

        for step in steps.values() {
            if let Some(group_id) = step.block_group_id {
                if !groups.contains_key(&group_id) {
                    return Err(EngineError::validation(format!(
                        "step '{}' references unknown group {group_id}",
                        step.name
                    )));
                }
            }
        }

        let mut members: HashMap<Option<Uuid>, Vec<NodeId>> = HashMap::new();
        for step in steps.values() {
            members
                .entry(step.block_group_id)
                .or_default()
                .push(NodeId::Step(step.id));
        }
        for group in groups.values() {
            members
                .entry(group.parent_group_id)
                .or_default()
                .push(NodeId::Group(group.id));
        }

        let mut edges = Vec::with_capacity(data.edges.len());
        let mut incoming: HashMap<NodeId, Vec<usize>> = HashMap::new();
        let mut outgoing: HashMap<NodeId, Vec<usize>> = HashMap::new();

        for edge in &data.edges {
            let graph_edge = Self::resolve_edge(edge, &steps, &groups)?;

            let source_scope = Self::scope_of_node(graph_edge.source, &steps, &groups);
            let target_scope = Self::scope_of_node(graph_edge.target, &steps, &groups);
            if source_scope != target_scope {
                return Err(EngineError::validation(format!(
                    "edge {} crosses a group boundary; route through the group's ports instead",
                    edge.id
                )));
            }

            let index = edges.len();
            incoming.entry(graph_edge.target).or_default().push(index);
            outgoing.entry(graph_edge.source).or_default().push(index);
            edges.push(graph_edge);
        }

        Ok(Self {
            steps,
            groups,
            edges,
            members,
            incoming,
            outgoing,
        })
    }

    fn resolve_edge(
        edge: &Edge,
        steps: &HashMap<Uuid, Step>,
        groups: &HashMap<Uuid, BlockGroup>,
    ) -> Result<GraphEdge, EngineError> {
        if !edge.endpoints_valid() {
            return Err(EngineError::validation(format!(
                "edge {} must reference exactly one source and one target",
                edge.id
            )));
        }

        let source = match (edge.source_step_id, edge.source_group_id) {
            (Some(step_id), None) => {
                if !steps.contains_key(&step_id) {
                    return Err(EngineError::validation(format!(
                        "edge {} references unknown source step {step_id}",
                        edge.id
                    )));
                }
                NodeId::Step(step_id)
            }
            (None, Some(group_id)) => {
                if !groups.contains_key(&group_id) {
                    return Err(EngineError::validation(format!(
                        "edge {} references unknown source group {group_id}",
                        edge.id
                    )));
                }
                NodeId::Group(group_id)
            }
            _ => unreachable!("endpoints_valid guarantees XOR"),
        };

        let target = match (edge.target_step_id, edge.target_group_id) {
            (Some(step_id), None) => {
                if !steps.contains_key(&step_id) {
                    return Err(EngineError::validation(format!(
                        "edge {} references unknown target step {step_id}",
                        edge.id
                    )));
                }
                NodeId::Step(step_id)
            }
            (None, Some(group_id)) => {
                if !groups.contains_key(&group_id) {
                    return Err(EngineError::validation(format!(
                        "edge {} references unknown target group {group_id}",
                        edge.id
                    )));
                }
                NodeId::Group(group_id)
            }
            _ => unreachable!("endpoints_valid guarantees XOR"),
        };

        Ok(GraphEdge {
            id: edge.id,
            source,
            target,
            source_port: (!edge.source_port.is_empty()).then(|| edge.source_port.clone()),
            target_port: edge.target_port.clone(),
            condition: edge.condition.clone(),
        })
    }

    fn scope_of_node(
        node: NodeId,
        steps: &HashMap<Uuid, Step>,
        groups: &HashMap<Uuid, BlockGroup>,
    ) -> Option<Uuid> {
        match node {
            NodeId::Step(id) => steps.get(&id).and_then(|s| s.block_group_id),
            NodeId::Group(id) => groups.get(&id).and_then(|g| g.parent_group_id),
        }
    }

    pub fn step(&self, id: Uuid) -> Option<&Step> {
        self.steps.get(&id)
    }

    pub fn group(&self, id: Uuid) -> Option<&BlockGroup> {
        self.groups.get(&id)
    }

    pub fn node_name(&self, node: NodeId) -> &str {
        match node {
            NodeId::Step(id) => self.steps.get(&id).map(|s| s.name.as_str()).unwrap_or(""),
            NodeId::Group(id) => self.groups.get(&id).map(|g| g.name.as_str()).unwrap_or(""),
        }
    }

    /// Nodes directly inside a scope. Body-zone filtering for try_catch is
    /// the group driver's concern.
    pub fn members_of(&self, scope: Option<Uuid>) -> &[NodeId] {
        self.members.get(&scope).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn incoming_count(&self, node: NodeId) -> usize {
        self.incoming.get(&node).map(Vec::len).unwrap_or(0)
    }

    pub fn outgoing_edges(&self, node: NodeId) -> impl Iterator<Item = &GraphEdge> {
        self.outgoing
            .get(&node)
            .into_iter()
            .flatten()
            .map(|&index| &self.edges[index])
    }

    pub fn has_outgoing_on_port(&self, node: NodeId, port: &str) -> bool {
        self.outgoing_edges(node)
            .any(|edge| edge.source_port.as_deref() == Some(port))
    }

    /// Entry nodes of a scope. At the top level only designated trigger
    /// steps qualify; inside a group every zero-in-degree member is an
    /// entry fed by the group input.
    pub fn entries(&self, scope: Option<Uuid>, config: &EngineConfig) -> Vec<NodeId> {
        self.members_of(scope)
            .iter()
            .copied()
            .filter(|&node| self.incoming_count(node) == 0)
            .filter(|&node| {
                if scope.is_some() {
                    return true;
                }
                match node {
                    NodeId::Step(id) => self
                        .steps
                        .get(&id)
                        .map(|s| s.trigger_type.is_some() || config.is_trigger_type(&s.step_type))
                        .unwrap_or(false),
                    // A top-level group with no incoming edges is driven by
                    // the run input directly.
                    NodeId::Group(_) => true,
                }
            })
            .collect()
    }

    /// Trigger payload shaping hook; today the run input passes through.
    pub fn entry_input(&self, input: &Value) -> Value {
        input.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GroupType, Workflow};

    fn data() -> WorkflowGraphData {
        let workflow = Workflow::new(None, "wf");
        WorkflowGraphData {
            steps: vec![],
            edges: vec![],
            groups: vec![],
            workflow,
        }
    }

    #[test]
    fn rejects_edges_crossing_group_boundaries() {
        let mut d = data();
        let wf = d.workflow.id;
        let group = BlockGroup::new(wf, "g", GroupType::Parallel);
        let outside = Step::new(wf, "outside", "start");
        let inside = Step::new(wf, "inside", "mock").in_group(group.id);
        d.edges
            .push(Edge::between_steps(wf, outside.id, inside.id));
        d.steps = vec![outside, inside];
        d.groups = vec![group];

        let err = WorkflowGraph::build(&d).unwrap_err();
        assert!(err.to_string().contains("group boundary"));
    }

    #[test]
    fn rejects_group_parent_cycles() {
        let mut d = data();
        let wf = d.workflow.id;
        let mut a = BlockGroup::new(wf, "a", GroupType::Parallel);
        let mut b = BlockGroup::new(wf, "b", GroupType::Parallel);
        a.parent_group_id = Some(b.id);
        b.parent_group_id = Some(a.id);
        d.groups = vec![a, b];

        let err = WorkflowGraph::build(&d).unwrap_err();
        assert!(err.to_string().contains("parent cycle"));
    }

    #[test]
    fn rejects_dangling_edge_endpoints() {
        let mut d = data();
        let wf = d.workflow.id;
        let a = Step::new(wf, "a", "start");
        d.edges
            .push(Edge::between_steps(wf, a.id, Uuid::new_v4()));
        d.steps = vec![a];

        let err = WorkflowGraph::build(&d).unwrap_err();
        assert!(err.to_string().contains("unknown target step"));
    }

    #[test]
    fn top_level_entries_require_trigger_type() {
        let mut d = data();
        let wf = d.workflow.id;
        let start = Step::new(wf, "go", "start");
        let orphan = Step::new(wf, "orphan", "mock");
        d.steps = vec![start.clone(), orphan];

        let graph = WorkflowGraph::build(&d).unwrap();
        let entries = graph.entries(None, &EngineConfig::default());
        assert_eq!(entries, vec![NodeId::Step(start.id)]);
    }

    #[test]
    fn group_scope_members_all_enter() {
        let mut d = data();
        let wf = d.workflow.id;
        let group = BlockGroup::new(wf, "g", GroupType::Parallel);
        let x = Step::new(wf, "x", "mock").in_group(group.id);
        let y = Step::new(wf, "y", "mock").in_group(group.id);
        d.steps = vec![x.clone(), y.clone()];
        d.groups = vec![group.clone()];

        let graph = WorkflowGraph::build(&d).unwrap();
        let mut entries = graph.entries(Some(group.id), &EngineConfig::default());
        entries.sort_by_key(|n| graph.node_name(*n).to_string());
        assert_eq!(entries, vec![NodeId::Step(x.id), NodeId::Step(y.id)]);
    }
}
