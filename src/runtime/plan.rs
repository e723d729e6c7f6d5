/// Petgraph-based execution planning
///
/// Builds the dependency graph of a workflow, orders it so every source runs
/// before its targets, and assigns each module its execution position. A
/// `condition` opens a branch block that the next `condition_end` closes;
/// modules inside the block are positioned under the condition's sequence
/// number and tagged with their branch.

use crate::error::EngineError;
use crate::workflow::types::{Module, ModuleType, Workflow};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::{collections::HashMap, fmt};

/// Branch membership of a module inside a condition block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchRef {
    /// Sequence number of the opening condition
    pub parent: u32,
    /// Branch tag the module belongs to
    pub tag: String,
}

/// Execution position of a planned module
///
/// Modules inside a block share their condition's sequence number and carry
/// a branch reference; every other module owns its sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub sequence: u32,
    pub branch: Option<BranchRef>,
}

impl Position {
    fn sequenced(sequence: u32) -> Self {
        Self {
            sequence,
            branch: None,
        }
    }

    fn in_branch(parent: u32, tag: String) -> Self {
        Self {
            sequence: parent,
            branch: Some(BranchRef { parent, tag }),
        }
    }

    pub fn branch_tag(&self) -> Option<&str> {
        self.branch.as_ref().map(|branch| branch.tag.as_str())
    }

    /// Display label, `"3"` or `"3.if_true"`, also used as a repeat target
    pub fn label(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.branch {
            Some(branch) => write!(f, "{}.{}", branch.parent, branch.tag),
            None => write!(f, "{}", self.sequence),
        }
    }
}

/// A module with its assigned position
#[derive(Debug, Clone)]
pub struct PlannedStep<'a> {
    pub module: &'a Module,
    pub position: Position,
}

/// Linear, branch-annotated execution sequence of one workflow
#[derive(Debug, Clone)]
pub struct ExecutionPlan<'a> {
    steps: Vec<PlannedStep<'a>>,
}

impl<'a> ExecutionPlan<'a> {
    /// Order the workflow and assign positions
    ///
    /// Fails before anything runs when the graph has a cycle, a connection
    /// names an unknown module, or condition blocks are nested.
    pub fn build(workflow: &'a Workflow) -> Result<Self, EngineError> {
        let graph = DependencyGraph::build(workflow)?;
        let order = graph.topological_order()?;
        let steps = assign_positions(order)?;

        tracing::debug!(
            "📋 Execution plan for '{}': {:?}",
            workflow.id,
            steps
                .iter()
                .map(|step| format!("{}={}", step.position, step.module.id))
                .collect::<Vec<_>>()
        );

        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[PlannedStep<'a>] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// First step whose position label equals `label`
    pub fn find_by_label(&self, label: &str) -> Option<&PlannedStep<'a>> {
        let label = normalize_label(label);
        self.steps.iter().find(|step| step.position.label() == label)
    }
}

/// Integral numbers written as floats (`"2.0"`) name the same step as `"2"`
fn normalize_label(label: &str) -> String {
    let label = label.trim();
    match label.parse::<f64>() {
        Ok(number) if number >= 0.0 && number.fract() == 0.0 && number < u32::MAX as f64 => {
            (number as u32).to_string()
        }
        _ => label.to_string(),
    }
}

/// Module order without positions
pub fn execution_order(workflow: &Workflow) -> Result<Vec<&Module>, EngineError> {
    DependencyGraph::build(workflow)?.topological_order()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Internal representation of a workflow as a petgraph graph (edge source -> target)
struct DependencyGraph<'a> {
    graph: DiGraph<&'a Module, ()>,
}

impl<'a> DependencyGraph<'a> {
    fn build(workflow: &'a Workflow) -> Result<Self, EngineError> {
        let mut graph = DiGraph::with_capacity(workflow.modules.len(), workflow.connections.len());
        let mut module_id_to_index: HashMap<&str, NodeIndex> = HashMap::new();

        for module in &workflow.modules {
            let index = graph.add_node(module);
            module_id_to_index.insert(module.id.as_str(), index);
        }

        let lookup = |module_id: &str, side: &'static str| {
            module_id_to_index
                .get(module_id)
                .copied()
                .ok_or_else(|| EngineError::UnknownModuleReference {
                    module_id: module_id.to_string(),
                    side,
                })
        };

        for connection in &workflow.connections {
            let source = lookup(&connection.source, "source")?;
            let target = lookup(&connection.target, "target")?;
            graph.update_edge(source, target, ());
        }

        Ok(Self { graph })
    }

    /// Sources of `node` in declaration order, reversed for popping
    fn pending_sources(&self, node: NodeIndex) -> Vec<NodeIndex> {
        let mut sources: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(node, Direction::Incoming)
            .collect();
        sources.sort_unstable_by(|a, b| b.cmp(a));
        sources
    }

    /// Depth-first walk from each module to its sources, in declaration order
    ///
    /// A source still in progress when reached again closes a cycle.
    fn topological_order(&self) -> Result<Vec<&'a Module>, EngineError> {
        let mut marks = vec![Mark::Unvisited; self.graph.node_count()];
        let mut order = Vec::with_capacity(self.graph.node_count());

        for start in self.graph.node_indices() {
            if marks[start.index()] != Mark::Unvisited {
                continue;
            }

            marks[start.index()] = Mark::InProgress;
            let mut stack = vec![(start, self.pending_sources(start))];

            while let Some(frame) = stack.last_mut() {
                let node = frame.0;
                match frame.1.pop() {
                    Some(source) => match marks[source.index()] {
                        Mark::InProgress => {
                            return Err(EngineError::CyclicDependency {
                                module_id: self.graph[source].id.clone(),
                            });
                        }
                        Mark::Unvisited => {
                            marks[source.index()] = Mark::InProgress;
                            let pending = self.pending_sources(source);
                            stack.push((source, pending));
                        }
                        Mark::Done => {}
                    },
                    None => {
                        marks[node.index()] = Mark::Done;
                        order.push(self.graph[node]);
                        stack.pop();
                    }
                }
            }
        }

        Ok(order)
    }
}

/// Branch tag of a module inside a block: explicit `branch` config, else its name
fn branch_tag(module: &Module) -> String {
    match module.config.get("branch").and_then(|value| value.as_str()) {
        Some(tag) if !tag.trim().is_empty() => tag.trim().to_string(),
        _ => module.name.clone(),
    }
}

fn assign_positions(order: Vec<&Module>) -> Result<Vec<PlannedStep<'_>>, EngineError> {
    let mut steps = Vec::with_capacity(order.len());
    let mut next_sequence = 1u32;
    let mut open_block: Option<u32> = None;

    for module in order {
        let position = match module.module_type {
            ModuleType::Condition => {
                if open_block.is_some() {
                    return Err(EngineError::NestedConditionBlock {
                        module_id: module.id.clone(),
                    });
                }
                open_block = Some(next_sequence);
                next_sequence += 1;
                Position::sequenced(next_sequence - 1)
            }
            ModuleType::ConditionEnd => {
                open_block = None;
                next_sequence += 1;
                Position::sequenced(next_sequence - 1)
            }
            _ => match open_block {
                Some(parent) => Position::in_branch(parent, branch_tag(module)),
                None => {
                    next_sequence += 1;
                    Position::sequenced(next_sequence - 1)
                }
            },
        };
        steps.push(PlannedStep { module, position });
    }

    Ok(steps)
}
