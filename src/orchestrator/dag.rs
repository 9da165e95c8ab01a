//! Execution graph construction and level assignment
//!
//! Sub-tasks become nodes; sequential patterns chain `step_i → step_{i+1}`
//! while peer patterns leave nodes unconnected. Kahn's algorithm assigns
//! topological levels so peers within a level can run concurrently; any
//! cycle is rejected before execution starts.

use super::intent::SubIntent;
use super::patterns::Pattern;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use thiserror::Error;

/// Graph construction and ordering errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// The dependency edges contain a cycle
    #[error("execution graph contains a cycle")]
    Cyclic,

    /// An edge references a node that does not exist
    #[error("edge references unknown node: {node}")]
    UnknownNode {
        /// The missing node id
        node: String,
    },
}

/// One executable node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskNode {
    /// Stable node id (`step_N`)
    pub id: String,
    /// Task description
    pub description: String,
    /// Required capability tags (string form)
    pub capabilities: Vec<String>,
    /// Position in the decomposition
    pub index: usize,
}

/// The execution DAG
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskGraph {
    /// Nodes in decomposition order
    pub nodes: Vec<TaskNode>,
    /// Directed dependency edges `(from, to)`
    pub edges: Vec<(String, String)>,
}

impl TaskGraph {
    /// Builds the graph for a decomposition under a pattern
    ///
    /// Sequential patterns model pipeline dependencies; every other pattern
    /// treats sub-tasks as peers with no edges.
    #[must_use]
    pub fn build(sub_tasks: &[SubIntent], pattern: &Pattern) -> Self {
        let nodes: Vec<TaskNode> = sub_tasks
            .iter()
            .enumerate()
            .map(|(index, task)| TaskNode {
                id: format!("step_{index}"),
                description: task.description.clone(),
                capabilities: task.capabilities.iter().map(ToString::to_string).collect(),
                index,
            })
            .collect();

        let edges = if matches!(pattern, Pattern::Sequential) {
            nodes
                .windows(2)
                .map(|pair| (pair[0].id.clone(), pair[1].id.clone()))
                .collect()
        } else {
            Vec::new()
        };

        Self { nodes, edges }
    }

    /// Kahn's algorithm: topological levels whose members may run in
    /// parallel
    ///
    /// # Errors
    ///
    /// Returns an error on cycles or edges to unknown nodes
    pub fn levels(&self) -> Result<Vec<Vec<String>>, GraphError> {
        let mut in_degree: HashMap<&str, usize> =
            self.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();

        for (from, to) in &self.edges {
            if !in_degree.contains_key(from.as_str()) {
                return Err(GraphError::UnknownNode { node: from.clone() });
            }
            let degree = in_degree
                .get_mut(to.as_str())
                .ok_or_else(|| GraphError::UnknownNode { node: to.clone() })?;
            *degree += 1;
            adjacency.entry(from.as_str()).or_default().push(to.as_str());
        }

        let mut queue: VecDeque<&str> = self
            .nodes
            .iter()
            .filter(|n| in_degree[n.id.as_str()] == 0)
            .map(|n| n.id.as_str())
            .collect();

        let mut levels = Vec::new();
        let mut visited = 0;
        while !queue.is_empty() {
            let mut level = Vec::with_capacity(queue.len());
            for _ in 0..queue.len() {
                let node = queue.pop_front().unwrap_or_default();
                level.push(node.to_string());
                visited += 1;
                for &next in adjacency.get(node).into_iter().flatten() {
                    let degree = in_degree.entry(next).or_insert(1);
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        queue.push_back(next);
                    }
                }
            }
            levels.push(level);
        }

        if visited != self.nodes.len() {
            return Err(GraphError::Cyclic);
        }
        Ok(levels)
    }

    /// Looks up a node by id
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&TaskNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Serialized form for plan persistence
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "nodes": self.nodes.iter().map(|n| json!({
                "id": n.id,
                "description": n.description,
                "capabilities": n.capabilities,
                "index": n.index,
            })).collect::<Vec<_>>(),
            "edges": self.edges.iter().map(|(from, to)| json!({
                "source": from,
                "target": to,
            })).collect::<Vec<_>>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::CapabilityName;

    fn sub(description: &str) -> SubIntent {
        SubIntent {
            description: description.to_string(),
            capabilities: vec![CapabilityName::try_new("general".to_string()).unwrap()],
        }
    }

    #[test]
    fn sequential_pattern_chains_nodes() {
        let graph = TaskGraph::build(&[sub("a"), sub("b"), sub("c")], &Pattern::Sequential);
        assert_eq!(graph.edges.len(), 2);
        let levels = graph.levels().unwrap();
        assert_eq!(
            levels,
            vec![
                vec!["step_0".to_string()],
                vec!["step_1".to_string()],
                vec!["step_2".to_string()],
            ]
        );
    }

    #[test]
    fn peer_patterns_share_one_level() {
        let graph = TaskGraph::build(&[sub("a"), sub("b"), sub("c")], &Pattern::Parallel);
        assert!(graph.edges.is_empty());
        let levels = graph.levels().unwrap();
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].len(), 3);
    }

    #[test]
    fn cycles_are_rejected() {
        let mut graph = TaskGraph::build(&[sub("a"), sub("b")], &Pattern::Sequential);
        graph.edges.push(("step_1".to_string(), "step_0".to_string()));
        assert_eq!(graph.levels().unwrap_err(), GraphError::Cyclic);
    }

    #[test]
    fn edges_to_unknown_nodes_are_rejected() {
        let mut graph = TaskGraph::build(&[sub("a")], &Pattern::Sequential);
        graph.edges.push(("step_0".to_string(), "ghost".to_string()));
        assert!(matches!(
            graph.levels().unwrap_err(),
            GraphError::UnknownNode { .. }
        ));
    }

    #[test]
    fn diamond_dependency_levels() {
        let mut graph = TaskGraph::build(
            &[sub("root"), sub("left"), sub("right"), sub("join")],
            &Pattern::Parallel,
        );
        graph.edges = vec![
            ("step_0".to_string(), "step_1".to_string()),
            ("step_0".to_string(), "step_2".to_string()),
            ("step_1".to_string(), "step_3".to_string()),
            ("step_2".to_string(), "step_3".to_string()),
        ];
        let levels = graph.levels().unwrap();
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[1].len(), 2);
        assert_eq!(levels[2], vec!["step_3".to_string()]);
    }
}
