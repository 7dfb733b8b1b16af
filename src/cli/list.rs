//! `relayline list` - Show environments and jobs

use relayline::pipeline::Pipeline;
use std::fmt::Write as _;

/// Renders the environment registry and the job graph
pub fn render(pipeline: &Pipeline) -> String {
    let mut out = String::from("Environments:\n");
    let width = pipeline
        .registry
        .names()
        .iter()
        .map(|n| n.len())
        .max()
        .unwrap_or(0);
    for env in pipeline.registry.iter() {
        let description = env.description.as_deref().unwrap_or("");
        let _ = writeln!(out, "  {:<width$}  {description}", env.name);
    }

    out.push_str("\nJobs:\n");
    for name in pipeline.graph.topological_order() {
        let Some(job) = pipeline.graph.job(name) else {
            continue;
        };
        let _ = write!(out, "  {name} ({} cell(s))", job.cells().len());
        let needs = pipeline.graph.dependencies(name);
        if !needs.is_empty() {
            let _ = write!(out, " needs {}", needs.join(", "));
        }
        if job.release {
            out.push_str(" [release]");
        }
        if job.coverage {
            out.push_str(" [coverage]");
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use relayline::pipeline::PipelineConfig;

    #[test]
    fn test_render_lists_everything() {
        let yaml = r#"
environments:
  - name: lint
    description: Static checks
    commands: [ruff check .]
  - name: docs
    commands: [sphinx-build docs out]
jobs:
  - name: lint
    steps: [{env: lint}]
  - name: docs
    needs: [lint]
    coverage: true
    steps: [{env: docs}]
"#;
        let config = PipelineConfig::from_yaml_str(yaml).unwrap();
        let pipeline = Pipeline::from_config(config, ".").unwrap();
        let text = render(&pipeline);
        assert!(text.contains("  lint  Static checks\n"));
        assert!(text.contains("  docs (1 cell(s)) needs lint [coverage]\n"));
    }
}
