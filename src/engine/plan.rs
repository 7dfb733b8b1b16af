//! Dry-run planning

use super::state::SkipReason;
use crate::pipeline::{JobGraph, Trigger};
use std::collections::HashMap;
use std::fmt::Write as _;

/// A cell as it would be dispatched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCell {
    /// Cell name
    pub name: String,
    /// Rendered runner platform
    pub runs_on: String,
}

/// A job as it would be dispatched, assuming every job succeeds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedJob {
    /// Job name
    pub name: String,
    /// Dependency level; jobs of the same level may run concurrently
    pub level: usize,
    /// Direct dependencies
    pub needs: Vec<String>,
    /// Why the job would be skipped
    pub skip: Option<SkipReason>,
    /// Rendered steps
    pub steps: Vec<String>,
    /// Cells that would run
    pub cells: Vec<PlannedCell>,
}

/// Expands the graph for `trigger` without running anything
#[must_use]
pub fn plan(graph: &JobGraph, trigger: &Trigger) -> Vec<PlannedJob> {
    let mut skipped: HashMap<String, bool> = HashMap::new();
    let mut planned = Vec::with_capacity(graph.len());

    for (level, names) in graph.levels().iter().enumerate() {
        for name in names {
            let Some(job) = graph.job(name) else {
                continue;
            };
            let needs = graph.dependencies(name).to_vec();
            let cells = job.cells();

            let blocked = needs
                .iter()
                .find(|d| skipped.get(*d).copied().unwrap_or(false));
            let skip = if let Some(dep) = blocked {
                Some(SkipReason::DependencyNotSucceeded {
                    dependency: dep.clone(),
                })
            } else if !job.should_run(trigger) {
                Some(SkipReason::ConditionFalse)
            } else if cells.is_empty() {
                Some(SkipReason::EmptyMatrix)
            } else {
                None
            };

            skipped.insert(name.clone(), skip.is_some());

            let cells = if skip.is_some() {
                Vec::new()
            } else {
                cells
                    .iter()
                    .map(|cell| PlannedCell {
                        name: cell.name.clone(),
                        runs_on: job.runs_on_for(cell),
                    })
                    .collect()
            };

            planned.push(PlannedJob {
                name: name.clone(),
                level,
                needs,
                skip,
                steps: job.steps.iter().map(ToString::to_string).collect(),
                cells,
            });
        }
    }
    planned
}

/// Renders a plan for `relayline ci --dry-run`
#[must_use]
pub fn render_plan(plan: &[PlannedJob]) -> String {
    let mut out = String::new();
    let mut level = None;

    for job in plan {
        if level != Some(job.level) {
            level = Some(job.level);
            let _ = writeln!(out, "Level {}:", job.level);
        }
        let needs = if job.needs.is_empty() {
            String::new()
        } else {
            format!(" (needs: {})", job.needs.join(", "))
        };
        match job.skip {
            Some(ref reason) => {
                let _ = writeln!(out, "  {}{needs}: skipped, {reason}", job.name);
            }
            None => {
                let _ = writeln!(out, "  {}{needs}: {} cell(s)", job.name, job.cells.len());
                for step in &job.steps {
                    let _ = writeln!(out, "      {step}");
                }
                for cell in &job.cells {
                    let _ = writeln!(out, "    - {} on {}", cell.name, cell.runs_on);
                }
            }
        }
    }
    out
}
