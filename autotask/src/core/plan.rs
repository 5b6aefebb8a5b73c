//! Plan graph construction and deterministic topological ordering.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::core::error::PlanError;
use crate::core::types::{PlanStep, StepSpec};

/// A validated plan: steps keyed by id plus their execution order.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltPlan {
    pub steps: BTreeMap<String, PlanStep>,
    pub order: Vec<String>,
}

/// Validate planner output and compute the ready queue.
///
/// Checks run in a fixed order: empty plan, duplicate ids, tools outside
/// `permitted_tools`, unknown dependencies, then cycles.
pub fn build_plan(
    specs: Vec<StepSpec>,
    permitted_tools: &[String],
    max_attempts: u32,
) -> Result<BuiltPlan, PlanError> {
    if specs.is_empty() {
        return Err(PlanError::EmptyPlan);
    }

    let mut seen = HashSet::new();
    for spec in &specs {
        if !seen.insert(spec.id.as_str()) {
            return Err(PlanError::DuplicateStepId(spec.id.clone()));
        }
    }

    for spec in &specs {
        if !permitted_tools.iter().any(|tool| tool == &spec.tool) {
            return Err(PlanError::UnknownTool {
                step: spec.id.clone(),
                tool: spec.tool.clone(),
            });
        }
        if let Some(missing) = spec.depends_on.iter().find(|dep| !seen.contains(dep.as_str())) {
            return Err(PlanError::UnknownDependency {
                step: spec.id.clone(),
                dependency: missing.clone(),
            });
        }
    }

    let steps: Vec<PlanStep> = specs
        .into_iter()
        .map(|spec| PlanStep::from_spec(spec, max_attempts))
        .collect();
    let order = topological_order(&steps)?;

    Ok(BuiltPlan {
        steps: steps
            .into_iter()
            .map(|step| (step.id.clone(), step))
            .collect(),
        order,
    })
}

/// Kahn's algorithm over `steps`, released in stages.
///
/// Edges point dependency -> dependent. Each stage holds the steps whose
/// in-degree dropped to zero together, ordered by their position in `steps`.
/// Stages are concatenated into one execution order.
pub fn topological_order(steps: &[PlanStep]) -> Result<Vec<String>, PlanError> {
    let position: HashMap<&str, usize> = steps
        .iter()
        .enumerate()
        .map(|(idx, step)| (step.id.as_str(), idx))
        .collect();

    let mut in_degree: Vec<usize> = steps.iter().map(|step| step.depends_on.len()).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];
    for (idx, step) in steps.iter().enumerate() {
        for dep in &step.depends_on {
            if let Some(&dep_idx) = position.get(dep.as_str()) {
                dependents[dep_idx].push(idx);
            }
        }
    }

    let mut order = Vec::with_capacity(steps.len());
    let mut stage: Vec<usize> = (0..steps.len()).filter(|&idx| in_degree[idx] == 0).collect();

    while !stage.is_empty() {
        let mut next = Vec::new();
        for &idx in &stage {
            order.push(steps[idx].id.clone());
            for &dependent in &dependents[idx] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    next.push(dependent);
                }
            }
        }
        next.sort_unstable();
        stage = next;
    }

    if order.len() < steps.len() {
        return Err(PlanError::CyclicDependency {
            ordered: order.len(),
            total: steps.len(),
        });
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str, deps: &[&str]) -> StepSpec {
        StepSpec {
            id: id.to_string(),
            tool: "search".to_string(),
            objective: format!("do {id}"),
            depends_on: deps.iter().map(|dep| dep.to_string()).collect(),
        }
    }

    fn tools() -> Vec<String> {
        vec!["search".to_string(), "mail".to_string()]
    }

    fn assert_topological(plan: &BuiltPlan) {
        for step in plan.steps.values() {
            let at = plan.order.iter().position(|id| id == &step.id).expect("ordered");
            for dep in &step.depends_on {
                let dep_at = plan.order.iter().position(|id| id == dep).expect("dep ordered");
                assert!(dep_at < at, "{dep} must precede {}", step.id);
            }
        }
    }

    #[test]
    fn ties_keep_planner_order() {
        let plan = build_plan(
            vec![spec("c", &[]), spec("a", &[]), spec("b", &["c"])],
            &tools(),
            2,
        )
        .expect("plan");
        assert_eq!(plan.order, vec!["c", "a", "b"]);
    }

    #[test]
    fn diamond_orders_dependencies_first() {
        let plan = build_plan(
            vec![
                spec("d", &["b", "c"]),
                spec("b", &["a"]),
                spec("c", &["a"]),
                spec("a", &[]),
            ],
            &tools(),
            2,
        )
        .expect("plan");
        assert_eq!(plan.order, vec!["a", "b", "c", "d"]);
        assert_topological(&plan);
    }

    #[test]
    fn every_step_starts_pending_with_ceiling() {
        let plan = build_plan(vec![spec("a", &[]), spec("b", &["a"])], &tools(), 5).expect("plan");
        for step in plan.steps.values() {
            assert_eq!(step.attempt, 0);
            assert_eq!(step.max_attempts, 5);
            assert_eq!(step.status, crate::core::types::StepStatus::Pending);
        }
    }

    #[test]
    fn cycle_is_rejected() {
        let err = build_plan(
            vec![spec("a", &["c"]), spec("b", &["a"]), spec("c", &["b"]), spec("d", &[])],
            &tools(),
            2,
        )
        .expect_err("cycle");
        assert_eq!(
            err,
            PlanError::CyclicDependency {
                ordered: 1,
                total: 4
            }
        );
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let err = build_plan(vec![spec("a", &["a"])], &tools(), 2).expect_err("cycle");
        assert!(matches!(err, PlanError::CyclicDependency { ordered: 0, .. }));
    }

    #[test]
    fn duplicates_are_caught_before_ordering() {
        let err = build_plan(vec![spec("a", &["a"]), spec("a", &[])], &tools(), 2)
            .expect_err("duplicate");
        assert_eq!(err, PlanError::DuplicateStepId("a".to_string()));
    }

    #[test]
    fn unknown_dependency_and_tool_are_rejected() {
        let err = build_plan(vec![spec("a", &["ghost"])], &tools(), 2).expect_err("unknown dep");
        assert_eq!(
            err,
            PlanError::UnknownDependency {
                step: "a".to_string(),
                dependency: "ghost".to_string()
            }
        );

        let mut rogue = spec("a", &[]);
        rogue.tool = "shell".to_string();
        let err = build_plan(vec![rogue], &tools(), 2).expect_err("unknown tool");
        assert!(matches!(err, PlanError::UnknownTool { .. }));
    }

    #[test]
    fn empty_plan_is_rejected() {
        assert_eq!(build_plan(Vec::new(), &tools(), 2), Err(PlanError::EmptyPlan));
    }

    #[test]
    fn repeated_dependency_counts_once() {
        let plan = build_plan(vec![spec("a", &[]), spec("b", &["a", "a"])], &tools(), 2)
            .expect("plan");
        assert_eq!(plan.order, vec!["a", "b"]);
    }
}
