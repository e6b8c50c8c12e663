use crate::ids::IdGenerator;
use crate::types::{Phase, PhaseStatus, PlanningDefect, Task};
use maestro_core::{MaestroError, MaestroResult};
use std::collections::{HashMap, HashSet};
use tracing::warn;
use uuid::Uuid;

/// Phases plus any defects found while building them.
#[derive(Debug, Clone)]
pub struct PhasePlan {
    pub phases: Vec<Phase>,
    pub defects: Vec<PlanningDefect>,
}

impl PhasePlan {
    pub fn forced_count(&self) -> usize {
        self.phases.iter().filter(|p| p.forced).count()
    }
}

/// Group tasks into phases by dependency level.
///
/// Each round takes every unscheduled task whose dependencies are already
/// scheduled. When no task is ready (cycle or unknown dependency) the first
/// remaining task in input order is forced into its own phase and reported
/// as a defect; with `strict` set the builder fails instead. Duplicate task
/// ids are always rejected.
pub fn build_phases(
    tasks: &[Task],
    strict: bool,
    ids: &dyn IdGenerator,
) -> MaestroResult<PhasePlan> {
    let mut known: HashSet<Uuid> = HashSet::with_capacity(tasks.len());
    let duplicates: Vec<String> = tasks
        .iter()
        .filter(|t| !known.insert(t.id))
        .map(|t| t.id.to_string())
        .collect();
    if !duplicates.is_empty() {
        return Err(MaestroError::Plan(format!(
            "duplicate task ids: {}",
            duplicates.join(", ")
        )));
    }
    let mut defects = Vec::new();

    for task in tasks {
        for dep in &task.dependencies {
            if !known.contains(dep) {
                defects.push(PlanningDefect::MissingDependency {
                    task: task.id,
                    missing: *dep,
                });
            }
        }
    }
    if let Some(cycle) = find_cycle(tasks) {
        defects.push(PlanningDefect::Cycle { tasks: cycle });
    }

    if strict && !defects.is_empty() {
        let details: Vec<String> = defects.iter().map(ToString::to_string).collect();
        return Err(MaestroError::Plan(format!(
            "invalid task graph: {}",
            details.join("; ")
        )));
    }

    let mut scheduled: HashSet<Uuid> = HashSet::new();
    let mut remaining: Vec<&Task> = tasks.iter().collect();
    let mut phases = Vec::new();

    while !remaining.is_empty() {
        let (ready, blocked): (Vec<&Task>, Vec<&Task>) = std::mem::take(&mut remaining)
            .into_iter()
            .partition(|t| t.dependencies.iter().all(|d| scheduled.contains(d)));

        let (members, forced, rest) = if ready.is_empty() {
            let mut blocked = blocked.into_iter();
            let Some(task) = blocked.next() else {
                break;
            };
            warn!(task_id = %task.id, "No ready task; forcing progress");
            defects.push(PlanningDefect::Forced { task: task.id });
            (vec![task], true, blocked.collect())
        } else {
            (ready, false, blocked)
        };

        let task_ids: Vec<Uuid> = members.iter().map(|t| t.id).collect();
        scheduled.extend(task_ids.iter().copied());
        phases.push(Phase {
            id: ids.next_id(),
            index: phases.len(),
            parallel: task_ids.len() > 1,
            task_ids,
            status: PhaseStatus::Pending,
            forced,
        });
        remaining = rest;
    }

    Ok(PhasePlan { phases, defects })
}

/// Depth-first search for a dependency cycle; returns its members.
pub fn find_cycle(tasks: &[Task]) -> Option<Vec<Uuid>> {
    let graph: HashMap<Uuid, &[Uuid]> = tasks
        .iter()
        .map(|t| (t.id, t.dependencies.as_slice()))
        .collect();
    let mut state: HashMap<Uuid, u8> = HashMap::new();
    let mut stack: Vec<Uuid> = Vec::new();

    fn visit(
        id: Uuid,
        graph: &HashMap<Uuid, &[Uuid]>,
        state: &mut HashMap<Uuid, u8>,
        stack: &mut Vec<Uuid>,
    ) -> Option<Vec<Uuid>> {
        match state.get(&id) {
            Some(1) => {
                // back edge: the cycle is the stack suffix starting at `id`
                let start = stack.iter().position(|s| *s == id).unwrap_or(0);
                return Some(stack[start..].to_vec());
            }
            Some(2) => return None,
            _ => {}
        }
        let deps = graph.get(&id)?;
        state.insert(id, 1);
        stack.push(id);
        for dep in *deps {
            if let Some(cycle) = visit(*dep, graph, state, stack) {
                return Some(cycle);
            }
        }
        stack.pop();
        state.insert(id, 2);
        None
    }

    for task in tasks {
        if let Some(cycle) = visit(task.id, &graph, &mut state, &mut stack) {
            return Some(cycle);
        }
    }
    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::ids::SequentialIds;
    use crate::types::TaskKind;

    fn id(n: u128) -> Uuid {
        Uuid::from_u128(1000 + n)
    }

    fn task(n: u128, deps: &[u128]) -> Task {
        Task::new(id(n), TaskKind::Research, format!("task {n}"))
            .with_dependencies(deps.iter().map(|d| id(*d)).collect())
    }

    fn phase_of(plan: &PhasePlan, task: Uuid) -> usize {
        plan.phases
            .iter()
            .find(|p| p.task_ids.contains(&task))
            .map(|p| p.index)
            .unwrap()
    }

    fn assert_well_formed(tasks: &[Task], plan: &PhasePlan) {
        let mut seen = HashSet::new();
        for phase in &plan.phases {
            for t in &phase.task_ids {
                assert!(seen.insert(*t), "task scheduled twice");
            }
        }
        assert_eq!(seen.len(), tasks.len());
        for t in tasks {
            for d in &t.dependencies {
                assert!(phase_of(plan, *d) < phase_of(plan, t.id));
            }
        }
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let tasks = vec![task(1, &[]), task(2, &[1]), task(1, &[])];
        for strict in [false, true] {
            let err = build_phases(&tasks, strict, &SequentialIds::new()).unwrap_err();
            assert!(matches!(err, MaestroError::Plan(ref m) if m.contains(&id(1).to_string())));
        }
    }

    #[test]
    fn test_linear_chain() {
        let tasks = vec![task(1, &[]), task(2, &[1]), task(3, &[2])];
        let plan = build_phases(&tasks, false, &SequentialIds::new()).unwrap();
        assert_eq!(plan.phases.len(), 3);
        assert!(plan.phases.iter().all(|p| !p.parallel));
        assert!(plan.defects.is_empty());
        assert_well_formed(&tasks, &plan);
    }

    #[test]
    fn test_diamond_is_grouped_by_level() {
        let tasks = vec![
            task(1, &[]),
            task(2, &[1]),
            task(3, &[1]),
            task(4, &[2, 3]),
        ];
        let plan = build_phases(&tasks, false, &SequentialIds::new()).unwrap();
        assert_eq!(plan.phases.len(), 3);
        assert!(plan.phases[1].parallel);
        assert_eq!(plan.phases[1].task_ids, vec![id(2), id(3)]);
        assert_well_formed(&tasks, &plan);
    }

    #[test]
    fn test_random_dags_are_well_formed() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..50 {
            let n = rng.gen_range(1..15u128);
            let mut tasks: Vec<Task> = (0..n)
                .map(|i| {
                    let deps: Vec<u128> = (0..i).filter(|_| rng.gen_bool(0.3)).collect();
                    task(i, &deps)
                })
                .collect();
            // scramble input order; dependencies stay acyclic
            tasks.reverse();
            let plan = build_phases(&tasks, false, &SequentialIds::new()).unwrap();
            assert_eq!(plan.forced_count(), 0);
            assert_well_formed(&tasks, &plan);
        }
    }

    #[test]
    fn test_cycle_forces_progress_and_reports() {
        let tasks = vec![task(1, &[3]), task(2, &[1]), task(3, &[2]), task(4, &[])];
        let plan = build_phases(&tasks, false, &SequentialIds::new()).unwrap();

        let scheduled: usize = plan.phases.iter().map(|p| p.task_ids.len()).sum();
        assert_eq!(scheduled, 4);
        assert!(plan.forced_count() >= 1);
        assert!(plan
            .defects
            .iter()
            .any(|d| matches!(d, PlanningDefect::Cycle { tasks } if tasks.len() == 3)));
        assert!(plan
            .defects
            .iter()
            .any(|d| matches!(d, PlanningDefect::Forced { .. })));
    }

    #[test]
    fn test_missing_dependency_is_forced() {
        let tasks = vec![task(1, &[]), task(2, &[99])];
        let plan = build_phases(&tasks, false, &SequentialIds::new()).unwrap();
        assert_eq!(plan.phases.len(), 2);
        assert!(plan.phases[1].forced);
        assert!(plan.defects.contains(&PlanningDefect::MissingDependency {
            task: id(2),
            missing: id(99)
        }));
    }

    #[test]
    fn test_strict_mode_rejects_cycle() {
        let tasks = vec![task(1, &[2]), task(2, &[1])];
        let err = build_phases(&tasks, true, &SequentialIds::new()).unwrap_err();
        assert!(matches!(err, MaestroError::Plan(_)));
    }

    #[test]
    fn test_empty_input() {
        let plan = build_phases(&[], false, &SequentialIds::new()).unwrap();
        assert!(plan.phases.is_empty());
    }
}
