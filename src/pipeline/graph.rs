//! Job dependency graph.
//!
//! Jobs are nodes; an edge `A -> B` means B `needs` A. The adjacency list
//! is explicit and keyed by job identifier so acyclicity can be checked
//! before anything executes. Ordering is computed with Kahn's algorithm,
//! breaking ties by declaration order to keep plans reproducible.

use super::errors::GraphError;
use super::job::Job;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// Validated, immutable DAG of jobs
#[derive(Debug, Clone, Default)]
pub struct JobGraph {
    jobs: Vec<Arc<Job>>,
    index: HashMap<String, usize>,
    /// `job -> jobs it needs`
    upstream: HashMap<String, Vec<String>>,
    /// `job -> jobs that need it`
    downstream: HashMap<String, Vec<String>>,
    order: Vec<String>,
}

impl JobGraph {
    /// Builds the graph, rejecting duplicate ids, unknown needs and cycles
    pub fn new(jobs: Vec<Job>) -> Result<Self, GraphError> {
        let mut graph = Self::default();

        for job in jobs {
            if graph.index.contains_key(&job.name) {
                return Err(GraphError::DuplicateJob(job.name));
            }
            graph.index.insert(job.name.clone(), graph.jobs.len());
            graph.upstream.insert(job.name.clone(), Vec::new());
            graph.downstream.insert(job.name.clone(), Vec::new());
            graph.jobs.push(Arc::new(job));
        }

        for job in &graph.jobs {
            let mut seen = HashSet::new();
            for dependency in &job.needs {
                if !graph.index.contains_key(dependency) {
                    return Err(GraphError::UnknownDependency {
                        job: job.name.clone(),
                        dependency: dependency.clone(),
                    });
                }
                if !seen.insert(dependency) {
                    continue;
                }
                graph
                    .upstream
                    .entry(job.name.clone())
                    .or_default()
                    .push(dependency.clone());
                graph
                    .downstream
                    .entry(dependency.clone())
                    .or_default()
                    .push(job.name.clone());
            }
        }

        graph.order = graph.kahn()?;
        Ok(graph)
    }

    fn kahn(&self) -> Result<Vec<String>, GraphError> {
        let mut in_degree: HashMap<&str, usize> = self
            .upstream
            .iter()
            .map(|(job, deps)| (job.as_str(), deps.len()))
            .collect();

        // Ready set ordered by declaration index.
        let mut ready: BTreeSet<usize> = self
            .jobs
            .iter()
            .enumerate()
            .filter(|(_, job)| in_degree[job.name.as_str()] == 0)
            .map(|(i, _)| i)
            .collect();

        let mut order = Vec::with_capacity(self.jobs.len());
        while let Some(i) = ready.pop_first() {
            let name = &self.jobs[i].name;
            order.push(name.clone());
            for dependent in &self.downstream[name] {
                if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(self.index[dependent]);
                    }
                }
            }
        }

        if order.len() != self.jobs.len() {
            return Err(GraphError::Cycle {
                cycle: self.find_cycle(),
            });
        }
        Ok(order)
    }

    /// Depth-first search for one cycle, used for error reporting
    fn find_cycle(&self) -> Vec<String> {
        fn visit(
            graph: &JobGraph,
            node: &str,
            stack: &mut Vec<String>,
            done: &mut HashSet<String>,
        ) -> Option<Vec<String>> {
            if let Some(pos) = stack.iter().position(|n| n == node) {
                let mut cycle = stack[pos..].to_vec();
                cycle.push(node.to_string());
                return Some(cycle);
            }
            if done.contains(node) {
                return None;
            }
            stack.push(node.to_string());
            for next in &graph.upstream[node] {
                if let Some(cycle) = visit(graph, next, stack, done) {
                    return Some(cycle);
                }
            }
            stack.pop();
            done.insert(node.to_string());
            None
        }

        let mut done = HashSet::new();
        for job in &self.jobs {
            if let Some(mut cycle) = visit(self, &job.name, &mut Vec::new(), &mut done) {
                // Walked against edge direction; present in `needs` order.
                cycle.reverse();
                return cycle;
            }
        }
        Vec::new()
    }

    /// Looks up a job
    #[must_use]
    pub fn job(&self, name: &str) -> Option<&Arc<Job>> {
        self.index.get(name).map(|&i| &self.jobs[i])
    }

    /// Jobs in declaration order
    pub fn jobs(&self) -> impl Iterator<Item = &Arc<Job>> {
        self.jobs.iter()
    }

    /// Number of jobs
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Returns true if the graph has no jobs
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Job ids in a valid execution order
    #[must_use]
    pub fn topological_order(&self) -> &[String] {
        &self.order
    }

    /// Jobs grouped by depth: level 0 has no needs, level N needs only
    /// jobs from earlier levels
    #[must_use]
    pub fn levels(&self) -> Vec<Vec<String>> {
        let mut depth: HashMap<&str, usize> = HashMap::new();
        let mut levels: Vec<Vec<String>> = Vec::new();

        for name in &self.order {
            let level = self.upstream[name]
                .iter()
                .map(|dep| depth[dep.as_str()] + 1)
                .max()
                .unwrap_or(0);
            depth.insert(name, level);
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(name.clone());
        }

        levels
    }

    /// Direct dependencies of a job
    #[must_use]
    pub fn dependencies(&self, name: &str) -> &[String] {
        self.upstream.get(name).map_or(&[], Vec::as_slice)
    }

    /// Jobs that directly need this job
    #[must_use]
    pub fn dependents(&self, name: &str) -> &[String] {
        self.downstream.get(name).map_or(&[], Vec::as_slice)
    }

    /// Every job that transitively depends on this job
    #[must_use]
    pub fn transitive_dependents(&self, name: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let mut stack: Vec<&str> = vec![name];
        while let Some(current) = stack.pop() {
            for dependent in self.dependents(current) {
                if found.insert(dependent.clone()) {
                    stack.push(dependent);
                }
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Step;
    use pretty_assertions::assert_eq;

    fn job(name: &str, needs: &[&str]) -> Job {
        let mut job = Job::new(name, vec![Step::Run("true".to_string())]);
        job.needs = needs.iter().map(ToString::to_string).collect();
        job
    }

    fn ci_graph() -> JobGraph {
        JobGraph::new(vec![
            job("lint", &[]),
            job("test", &[]),
            job("deploy", &["lint", "test"]),
        ])
        .unwrap()
    }

    #[test]
    fn test_topological_order() {
        let graph = ci_graph();
        assert_eq!(graph.topological_order(), &["lint", "test", "deploy"]);
    }

    #[test]
    fn test_order_respects_needs_regardless_of_declaration() {
        let graph = JobGraph::new(vec![
            job("deploy", &["test"]),
            job("test", &["lint"]),
            job("lint", &[]),
        ])
        .unwrap();
        assert_eq!(graph.topological_order(), &["lint", "test", "deploy"]);
    }

    #[test]
    fn test_levels() {
        let graph = ci_graph();
        assert_eq!(
            graph.levels(),
            vec![
                vec!["lint".to_string(), "test".to_string()],
                vec!["deploy".to_string()]
            ]
        );
    }

    #[test]
    fn test_unknown_dependency() {
        let err = JobGraph::new(vec![job("deploy", &["test"])]).unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownDependency {
                job: "deploy".to_string(),
                dependency: "test".to_string()
            }
        );
    }

    #[test]
    fn test_duplicate_job() {
        let err = JobGraph::new(vec![job("a", &[]), job("a", &[])]).unwrap_err();
        assert_eq!(err, GraphError::DuplicateJob("a".to_string()));
    }

    #[test]
    fn test_cycle_detected() {
        let err = JobGraph::new(vec![
            job("a", &["c"]),
            job("b", &["a"]),
            job("c", &["b"]),
            job("d", &[]),
        ])
        .unwrap_err();
        match err {
            GraphError::Cycle { cycle } => {
                assert_eq!(cycle.first(), cycle.last());
                assert_eq!(cycle.len(), 4);
                assert!(!cycle.contains(&"d".to_string()));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        assert!(matches!(
            JobGraph::new(vec![job("a", &["a"])]),
            Err(GraphError::Cycle { .. })
        ));
    }

    #[test]
    fn test_transitive_dependents() {
        let graph = JobGraph::new(vec![
            job("lint", &[]),
            job("test", &["lint"]),
            job("build", &["test"]),
            job("deploy", &["build"]),
            job("docs", &[]),
        ])
        .unwrap();

        let dependents: Vec<_> = graph.transitive_dependents("lint").into_iter().collect();
        assert_eq!(dependents, vec!["build", "deploy", "test"]);
        assert!(graph.transitive_dependents("docs").is_empty());
        assert_eq!(graph.dependencies("deploy"), &["build"]);
    }

    #[test]
    fn test_duplicate_needs_are_collapsed() {
        let graph = JobGraph::new(vec![job("a", &[]), job("b", &["a", "a"])]).unwrap();
        assert_eq!(graph.dependencies("b"), &["a"]);
        assert_eq!(graph.dependents("a"), &["b"]);
    }
}
