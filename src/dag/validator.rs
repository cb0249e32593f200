//! Graph validation: cycle detection and execution levels.
//!
//! Cycles are found with a depth-first traversal so the error can carry the
//! exact path. Levels are then computed with Kahn's algorithm, one level per
//! round of zero-in-degree removal.

use crate::dag::builder::{ComponentIndex, DependencyGraph};
use crate::errors::CycleError;
use serde::Serialize;
use std::collections::HashMap;

/// Ordered execution levels for a validated graph.
///
/// Level `k` holds the components whose dependencies all sit in levels
/// before `k`. Components within a level keep declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionPlan {
    levels: Vec<Vec<String>>,
    #[serde(skip)]
    level_index: HashMap<String, usize>,
}

impl ExecutionPlan {
    fn new(levels: Vec<Vec<String>>) -> Self {
        let level_index = levels
            .iter()
            .enumerate()
            .flat_map(|(level, ids)| ids.iter().map(move |id| (id.clone(), level)))
            .collect();
        Self {
            levels,
            level_index,
        }
    }

    pub fn levels(&self) -> &[Vec<String>] {
        &self.levels
    }

    pub fn level(&self, index: usize) -> Option<&[String]> {
        self.levels.get(index).map(|l| l.as_slice())
    }

    /// Number of levels.
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Parallel group of a component: the index of the level it runs in.
    pub fn level_of(&self, id: &str) -> Option<usize> {
        self.level_index.get(id).copied()
    }

    pub fn component_count(&self) -> usize {
        self.level_index.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &[String])> {
        self.levels
            .iter()
            .enumerate()
            .map(|(i, level)| (i, level.as_slice()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Visited,
}

/// Validates graphs and produces execution plans.
pub struct GraphValidator;

impl GraphValidator {
    /// Check the graph for cycles and compute its execution levels.
    pub fn validate(graph: &DependencyGraph) -> Result<ExecutionPlan, CycleError> {
        if let Some(path) = Self::find_cycle(graph) {
            return Err(CycleError { path });
        }
        Self::compute_levels(graph)
    }

    /// Depth-first search over dependency edges in declaration order.
    ///
    /// Returns the cycle path, starting and ending at the repeated node.
    fn find_cycle(graph: &DependencyGraph) -> Option<Vec<String>> {
        let id = |index: ComponentIndex| {
            graph
                .get(index)
                .map(|c| c.id.clone())
                .unwrap_or_default()
        };
        let mut marks = vec![Mark::Unvisited; graph.len()];

        for start in 0..graph.len() {
            if marks[start] != Mark::Unvisited {
                continue;
            }

            // Each frame is (node, position of the next dependency to explore)
            let mut stack: Vec<(ComponentIndex, usize)> = vec![(start, 0)];
            marks[start] = Mark::Visiting;

            while let Some(frame) = stack.last_mut() {
                let (node, position) = *frame;
                let deps = graph.dependencies(node);

                if position >= deps.len() {
                    marks[node] = Mark::Visited;
                    stack.pop();
                    continue;
                }

                frame.1 += 1;
                let dep = deps[position];
                match marks[dep] {
                    Mark::Visiting => {
                        let cycle_start = stack.iter().position(|&(n, _)| n == dep).unwrap_or(0);
                        let mut path: Vec<String> =
                            stack[cycle_start..].iter().map(|&(n, _)| id(n)).collect();
                        path.push(id(dep));
                        return Some(path);
                    }
                    Mark::Unvisited => {
                        marks[dep] = Mark::Visiting;
                        stack.push((dep, 0));
                    }
                    Mark::Visited => {}
                }
            }
        }

        None
    }

    /// Kahn's algorithm, removing one whole zero-in-degree frontier per round.
    fn compute_levels(graph: &DependencyGraph) -> Result<ExecutionPlan, CycleError> {
        let mut in_degree: Vec<usize> = (0..graph.len())
            .map(|i| graph.dependencies(i).len())
            .collect();

        let mut frontier: Vec<ComponentIndex> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, deg)| *deg == 0)
            .map(|(i, _)| i)
            .collect();

        let mut levels = Vec::new();
        let mut processed = 0;

        while !frontier.is_empty() {
            let mut next = Vec::new();
            for &node in &frontier {
                for &dependent in graph.dependents(node) {
                    in_degree[dependent] -= 1;
                    if in_degree[dependent] == 0 {
                        next.push(dependent);
                    }
                }
            }
            // Indices are declaration positions, so sorting restores declaration order
            next.sort_unstable();

            processed += frontier.len();
            levels.push(
                frontier
                    .iter()
                    .filter_map(|&i| graph.get(i).map(|c| c.id.clone()))
                    .collect(),
            );
            frontier = next;
        }

        if processed != graph.len() {
            let remaining: Vec<String> = in_degree
                .iter()
                .enumerate()
                .filter(|&(_, deg)| *deg > 0)
                .filter_map(|(i, _)| graph.get(i).map(|c| c.id.clone()))
                .collect();
            return Err(CycleError { path: remaining });
        }

        Ok(ExecutionPlan::new(levels))
    }
}
