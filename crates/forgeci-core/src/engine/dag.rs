//! Job graph validation: cycle detection and dependency reference checking.
//!
//! Uses `petgraph` to model `needs` edges as a directed graph. Topological
//! sort detects cycles at parse time, so a spec accepted by the parser can
//! never dead-lock the scheduler.

use std::collections::{BTreeMap, HashMap};

use forgeci_types::spec::JobSpec;
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;

use super::parser::SpecError;

// ---------------------------------------------------------------------------
// Graph validation
// ---------------------------------------------------------------------------

/// Validate that jobs form a valid DAG (no cycles, all references exist).
pub fn validate_graph(jobs: &BTreeMap<String, JobSpec>) -> Result<(), SpecError> {
    let id_to_idx: HashMap<&str, usize> = jobs
        .keys()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();

    let mut graph = DiGraph::<&str, ()>::new();
    let node_indices: Vec<_> = jobs.keys().map(|id| graph.add_node(id.as_str())).collect();

    for (job_id, job) in jobs {
        let to_idx = id_to_idx[job_id.as_str()];
        for dep in &job.depends_on {
            let from_idx = id_to_idx.get(dep.as_str()).ok_or_else(|| {
                SpecError::UnknownDependency {
                    job_id: job_id.clone(),
                    dependency: dep.clone(),
                }
            })?;
            graph.add_edge(node_indices[*from_idx], node_indices[to_idx], ());
        }
    }

    // Topological sort -- detects cycles
    toposort(&graph, None).map_err(|cycle| {
        let job_id = graph[cycle.node_id()];
        SpecError::CycleDetected(job_id.to_string())
    })?;

    Ok(())
}

/// Topological order of job ids, dependencies first.
///
/// Ties (jobs at the same depth) keep ascending job_id order, matching the
/// scheduler's dispatch tie-break. Assumes the graph already passed
/// [`validate_graph`].
pub fn topological_order(jobs: &BTreeMap<String, JobSpec>) -> Vec<String> {
    let mut depths: HashMap<&str, usize> = HashMap::new();
    // BTreeMap iteration is ascending job_id; repeat until depths settle.
    // Bounded by graph depth, which passed acyclicity validation.
    let mut changed = true;
    while changed {
        changed = false;
        for (job_id, job) in jobs {
            let depth = job
                .depends_on
                .iter()
                .map(|dep| depths.get(dep.as_str()).copied().unwrap_or(0) + 1)
                .max()
                .unwrap_or(0);
            if depths.get(job_id.as_str()) != Some(&depth) {
                depths.insert(job_id.as_str(), depth);
                changed = true;
            }
        }
    }

    let mut order: Vec<String> = jobs.keys().cloned().collect();
    order.sort_by_key(|id| (depths[id.as_str()], id.clone()));
    order
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use forgeci_types::spec::StepSpec;

    /// Helper: build a simple shell job with given dependencies.
    fn job(depends_on: Vec<&str>) -> JobSpec {
        JobSpec {
            runs_on: "default".to_string(),
            depends_on: depends_on.into_iter().map(String::from).collect(),
            tolerate_failed_dependencies: false,
            secrets: vec![],
            matrix: None,
            steps: vec![StepSpec {
                name: None,
                run: "true".to_string(),
                condition: None,
                continue_on_error: false,
                timeout_secs: None,
            }],
        }
    }

    fn jobs(entries: Vec<(&str, Vec<&str>)>) -> BTreeMap<String, JobSpec> {
        entries
            .into_iter()
            .map(|(id, deps)| (id.to_string(), job(deps)))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    #[test]
    fn test_validate_linear_chain() {
        let jobs = jobs(vec![("a", vec![]), ("b", vec!["a"]), ("c", vec!["b"])]);
        assert!(validate_graph(&jobs).is_ok());
    }

    #[test]
    fn test_validate_diamond() {
        let jobs = jobs(vec![
            ("a", vec![]),
            ("b", vec!["a"]),
            ("c", vec!["a"]),
            ("d", vec!["b", "c"]),
        ]);
        assert!(validate_graph(&jobs).is_ok());
    }

    #[test]
    fn test_two_node_cycle_rejected() {
        let jobs = jobs(vec![("a", vec!["b"]), ("b", vec!["a"])]);
        let err = validate_graph(&jobs).unwrap_err();
        assert!(matches!(err, SpecError::CycleDetected(_)));
        assert!(err.to_string().contains("cycle"), "got: {err}");
    }

    #[test]
    fn test_three_node_cycle_names_a_job() {
        let jobs = jobs(vec![("a", vec!["c"]), ("b", vec!["a"]), ("c", vec!["b"])]);
        let err = validate_graph(&jobs).unwrap_err();
        let SpecError::CycleDetected(named) = err else {
            panic!("expected CycleDetected");
        };
        assert!(["a", "b", "c"].contains(&named.as_str()));
    }

    #[test]
    fn test_self_dependency_rejected() {
        let jobs = jobs(vec![("a", vec!["a"])]);
        assert!(matches!(
            validate_graph(&jobs),
            Err(SpecError::CycleDetected(_))
        ));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let jobs = jobs(vec![("a", vec!["missing"])]);
        let err = validate_graph(&jobs).unwrap_err();
        assert!(matches!(err, SpecError::UnknownDependency { .. }));
        assert!(err.to_string().contains("missing"), "got: {err}");
    }

    // -----------------------------------------------------------------------
    // Topological order
    // -----------------------------------------------------------------------

    #[test]
    fn test_topological_order_dependencies_first() {
        let jobs = jobs(vec![
            ("deploy", vec!["build", "test"]),
            ("build", vec!["lint"]),
            ("test", vec!["lint"]),
            ("lint", vec![]),
        ]);
        let order = topological_order(&jobs);
        assert_eq!(order, vec!["lint", "build", "test", "deploy"]);
    }

    #[test]
    fn test_topological_order_ties_ascending() {
        let jobs = jobs(vec![("c", vec![]), ("a", vec![]), ("b", vec![])]);
        let order = topological_order(&jobs);
        assert_eq!(order, vec!["a", "b", "c"]);
    }
}
