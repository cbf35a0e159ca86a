//! Dependency graph over the registered tasks
//!
//! Edges point from a dependency to the task that waits on it. The graph is
//! validated once at build time: unknown dependencies and cycles are fatal
//! before any task runs.

use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::context::{Context, Registry};
use crate::erased::AnyTask;
use crate::error::{Error, Result};
use crate::lifecycle::Lifecycle;

/// Validated, acyclic task dependency graph
#[derive(Debug, Clone)]
pub struct TaskGraph {
    graph: DiGraph<String, ()>,
    index: HashMap<String, NodeIndex>,
}

impl TaskGraph {
    /// Build the graph from each task's declared dependencies
    pub fn build<C>(registry: &Registry<C>) -> Result<Self> {
        Self::build_with(registry, |_, _| false)
    }

    /// Build the graph a run walks
    ///
    /// When a task and its dependency both resolve to `Absent`, the edge is
    /// reversed: the dependent is deleted before the resource it refers to.
    pub fn for_run<C>(ctx: &Context<C>) -> Result<Self> {
        let absent = |name: &str| {
            ctx.registry()
                .get(name)
                .is_some_and(|t| ctx.lifecycle_for(name, t.lifecycle()) == Lifecycle::Absent)
        };
        Self::build_with(ctx.registry(), |task, dependency| {
            absent(task) && absent(dependency)
        })
    }

    fn build_with<C>(
        registry: &Registry<C>,
        reversed: impl Fn(&str, &str) -> bool,
    ) -> Result<Self> {
        let mut graph = DiGraph::with_capacity(registry.len(), registry.len());
        let mut index = HashMap::with_capacity(registry.len());
        for name in registry.names() {
            index.insert(name.to_string(), graph.add_node(name.to_string()));
        }

        for (name, task) in registry.iter() {
            let node = index[name];
            for dependency in task.dependencies(registry) {
                let Some(&dep) = index.get(&dependency) else {
                    return Err(Error::UnknownDependency {
                        task: name.to_string(),
                        dependency,
                    });
                };
                if reversed(name, &dependency) {
                    log::debug!("{name}: deleted before {dependency}");
                    graph.update_edge(node, dep, ());
                } else {
                    graph.update_edge(dep, node, ());
                }
            }
        }

        let built = Self { graph, index };
        built.check_cycles()?;
        Ok(built)
    }

    fn check_cycles(&self) -> Result<()> {
        let mut cycles: Vec<Vec<NodeIndex>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || self.graph.contains_edge(scc[0], scc[0]))
            .collect();
        if cycles.is_empty() {
            return Ok(());
        }

        // Report the cycle containing the alphabetically first task
        cycles.sort_by_key(|scc| scc.iter().map(|n| self.graph[*n].clone()).min());
        let members: HashSet<NodeIndex> = cycles[0].iter().copied().collect();
        let start = cycles[0]
            .iter()
            .copied()
            .min_by_key(|n| &self.graph[*n])
            .unwrap_or(cycles[0][0]);
        Err(Error::DependencyCycle {
            tasks: self.cycle_path(start, &members),
        })
    }

    /// Walk "depends on" edges from `start` back to itself inside one component
    fn cycle_path(&self, start: NodeIndex, members: &HashSet<NodeIndex>) -> Vec<String> {
        let mut previous: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        let mut queue = VecDeque::from([start]);
        let mut closed = false;

        'search: while let Some(node) = queue.pop_front() {
            for dep in self.sorted_neighbors(node, Direction::Incoming) {
                if !members.contains(&dep) {
                    continue;
                }
                if dep == start {
                    previous.insert(start, node);
                    closed = true;
                    break 'search;
                }
                if let std::collections::hash_map::Entry::Vacant(e) = previous.entry(dep) {
                    e.insert(node);
                    queue.push_back(dep);
                }
            }
        }

        if !closed {
            return vec![self.graph[start].clone()];
        }

        let mut path = vec![start];
        let mut node = previous[&start];
        while node != start {
            path.push(node);
            node = previous[&node];
        }
        path.push(start);
        // `previous` links point backwards along the walk
        let len = path.len();
        path[1..len - 1].reverse();
        path.into_iter().map(|n| self.graph[n].clone()).collect()
    }

    fn sorted_neighbors(&self, node: NodeIndex, dir: Direction) -> Vec<NodeIndex> {
        let mut out: Vec<NodeIndex> = self.graph.neighbors_directed(node, dir).collect();
        out.sort_by(|a, b| self.graph[*a].cmp(&self.graph[*b]));
        out.dedup();
        out
    }

    fn names_of(&self, nodes: Vec<NodeIndex>) -> Vec<&str> {
        nodes.into_iter().map(|n| self.graph[n].as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Direct dependencies of a task, sorted
    pub fn dependencies(&self, name: &str) -> Vec<&str> {
        match self.index.get(name) {
            Some(&n) => self.names_of(self.sorted_neighbors(n, Direction::Incoming)),
            None => Vec::new(),
        }
    }

    /// Tasks that directly wait on `name`, sorted
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        match self.index.get(name) {
            Some(&n) => self.names_of(self.sorted_neighbors(n, Direction::Outgoing)),
            None => Vec::new(),
        }
    }

    /// Every task that waits on `name` directly or indirectly
    pub fn transitive_dependents(&self, name: &str) -> BTreeSet<String> {
        let Some(&start) = self.index.get(name) else {
            return BTreeSet::new();
        };
        let mut out = BTreeSet::new();
        let mut dfs = Dfs::new(&self.graph, start);
        while let Some(node) = dfs.next(&self.graph) {
            if node != start {
                out.insert(self.graph[node].clone());
            }
        }
        out
    }

    /// Tasks grouped into levels; every task's dependencies sit in earlier levels
    pub fn levels(&self) -> Vec<Vec<String>> {
        let mut remaining: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|n| (n, self.sorted_neighbors(n, Direction::Incoming).len()))
            .collect();
        let mut ready: BTreeSet<&str> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(n, _)| self.graph[*n].as_str())
            .collect();

        let mut levels = Vec::new();
        while !ready.is_empty() {
            let level: Vec<String> = ready.iter().map(|s| (*s).to_string()).collect();
            let mut next = BTreeSet::new();
            for name in &ready {
                let node = self.index[*name];
                for dependent in self.sorted_neighbors(node, Direction::Outgoing) {
                    if let Some(count) = remaining.get_mut(&dependent) {
                        *count -= 1;
                        if *count == 0 {
                            next.insert(self.graph[dependent].as_str());
                        }
                    }
                }
            }
            levels.push(level);
            ready = next;
        }
        levels
    }

    /// A topological order, ties broken by name
    pub fn order(&self) -> Vec<String> {
        self.levels().into_iter().flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Context, ContextBuilder};
    use crate::delta::{Changes, Identities, TaskRef};
    use crate::target::{Target, TargetKind, TargetSet};
    use crate::task::Task;

    #[derive(Debug)]
    struct Node {
        name: String,
        deps: Vec<TaskRef>,
    }

    #[derive(Debug)]
    struct NoChanges;

    impl Changes for NoChanges {
        fn is_empty(&self) -> bool {
            true
        }
    }

    impl Task<()> for Node {
        type Changes = NoChanges;

        fn name(&self) -> &str {
            &self.name
        }

        fn resource_type(&self) -> &'static str {
            "node"
        }

        fn references(&self) -> Vec<&TaskRef> {
            self.deps.iter().collect()
        }

        fn find(&self, _ctx: &Context<()>) -> Result<Option<Self>> {
            Ok(None)
        }

        fn changes(&self, _actual: &Self, _ids: &Identities) -> NoChanges {
            NoChanges
        }

        fn creation(&self) -> NoChanges {
            NoChanges
        }

        fn supported_targets(&self) -> TargetSet {
            TargetSet::ALL
        }
    }

    fn node(name: &str, deps: &[&str]) -> Node {
        Node {
            name: name.to_string(),
            deps: deps.iter().map(|d| TaskRef::to(*d)).collect(),
        }
    }

    fn graph(nodes: Vec<Node>) -> Result<TaskGraph> {
        let mut builder = ContextBuilder::new((), Target::new(TargetKind::Api));
        for n in nodes {
            builder = builder.task(n);
        }
        let ctx = builder.build()?;
        TaskGraph::build(ctx.registry())
    }

    #[test]
    fn test_order_respects_dependencies() {
        let g = graph(vec![
            node("route", &["table", "nat"]),
            node("nat", &[]),
            node("table", &[]),
            node("other", &[]),
        ])
        .unwrap();
        assert_eq!(g.order(), vec!["nat", "other", "table", "route"]);
        assert_eq!(
            g.levels(),
            vec![
                vec!["nat".to_string(), "other".to_string(), "table".to_string()],
                vec!["route".to_string()],
            ]
        );
        assert_eq!(g.dependencies("route"), vec!["nat", "table"]);
        assert_eq!(g.dependents("nat"), vec!["route"]);
    }

    #[test]
    fn test_unknown_dependency() {
        let err = graph(vec![node("route", &["missing"])]).unwrap_err();
        assert!(matches!(
            err,
            Error::UnknownDependency { ref task, ref dependency } if task == "route" && dependency == "missing"
        ));
    }

    #[test]
    fn test_cycle_detected_with_path() {
        let err = graph(vec![
            node("a", &["b"]),
            node("b", &["c"]),
            node("c", &["a"]),
            node("d", &[]),
        ])
        .unwrap_err();
        match err {
            Error::DependencyCycle { tasks } => assert_eq!(tasks, vec!["a", "b", "c", "a"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let err = graph(vec![node("a", &["a"])]).unwrap_err();
        match err {
            Error::DependencyCycle { tasks } => assert_eq!(tasks, vec!["a", "a"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_absent_tasks_delete_dependents_first() {
        let ctx = ContextBuilder::new((), Target::new(TargetKind::Api))
            .task(node("table", &[]))
            .task(node("route", &["table"]))
            .task(node("peer", &["table"]))
            .lifecycle_override("table", Lifecycle::Absent)
            .lifecycle_override("route", Lifecycle::Absent)
            .build()
            .unwrap();

        let g = TaskGraph::for_run(&ctx).unwrap();
        assert_eq!(g.dependencies("table"), vec!["route"]);
        assert!(g.dependencies("route").is_empty());
        // Only one side absent: order is unchanged
        assert_eq!(g.dependencies("peer"), vec!["table"]);
        assert_eq!(g.order(), vec!["route", "table", "peer"]);

        let plain = TaskGraph::build(ctx.registry()).unwrap();
        assert_eq!(plain.dependencies("route"), vec!["table"]);
    }

    #[test]
    fn test_transitive_dependents() {
        let g = graph(vec![
            node("a", &[]),
            node("b", &["a"]),
            node("c", &["b"]),
            node("d", &[]),
        ])
        .unwrap();
        let deps: Vec<String> = g.transitive_dependents("a").into_iter().collect();
        assert_eq!(deps, vec!["b", "c"]);
        assert!(g.transitive_dependents("d").is_empty());
    }
}
