use crate::types::{Agent, AgentStatus, Task};
use serde::{Deserialize, Serialize};

/// Penalty per priority unit for routing to an agent that is not the task
/// kind's preferred agent type.
const CROSS_KIND_PENALTY: f64 = 0.15;

/// Outcome of routing one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteChoice {
    pub agent_id: String,
    pub score: f64,
    /// True when no idle agent was available and the least-loaded capable
    /// agent was picked instead.
    pub overloaded: bool,
    pub reason: String,
}

/// Score of an idle candidate: `success_rate × weight − penalty`.
pub fn score(agent: &Agent, task: &Task) -> f64 {
    let penalty = if agent.kind == task.kind.preferred_agent() {
        0.0
    } else {
        CROSS_KIND_PENALTY * task.priority.factor()
    };
    agent.metrics.success_rate * agent.config.priority_weight - penalty
}

fn capable<'a>(
    agents: &'a [Agent],
    task: &'a Task,
    exclude: &'a [String],
) -> impl Iterator<Item = &'a Agent> {
    let required = task.kind.required_capabilities();
    agents.iter().filter(move |a| {
        a.status != AgentStatus::Offline && a.can_handle(required) && !exclude.contains(&a.id)
    })
}

/// Best capable agent with a free slot, if any. An agent counts as idle
/// while it runs fewer than `config.max_concurrent_tasks` tasks.
pub fn route_idle(agents: &[Agent], task: &Task, exclude: &[String]) -> Option<RouteChoice> {
    capable(agents, task, exclude)
        .filter(|a| a.has_capacity())
        .map(|a| (a, score(a, task)))
        .max_by(|(_, x), (_, y)| x.total_cmp(y))
        .map(|(agent, score)| RouteChoice {
            agent_id: agent.id.clone(),
            score,
            overloaded: false,
            reason: format!(
                "{} agent with {}/{} slot(s) in use, success rate {:.2}, score {score:.3}",
                agent.kind,
                agent.active_tasks,
                agent.config.max_concurrent_tasks.max(1),
                agent.metrics.success_rate
            ),
        })
}

/// Route a task: best idle capable agent, else the least-loaded capable
/// agent regardless of status (ties go to the higher success rate).
/// `None` means no agent has a matching capability at all.
pub fn route(agents: &[Agent], task: &Task, exclude: &[String]) -> Option<RouteChoice> {
    if let Some(choice) = route_idle(agents, task, exclude) {
        return Some(choice);
    }
    capable(agents, task, exclude)
        .min_by(|a, b| {
            a.active_tasks
                .cmp(&b.active_tasks)
                .then(b.metrics.success_rate.total_cmp(&a.metrics.success_rate))
        })
        .map(|agent| RouteChoice {
            agent_id: agent.id.clone(),
            score: score(agent, task),
            overloaded: true,
            reason: format!(
                "no idle capable agent; least-loaded {} agent with {} active task(s)",
                agent.kind, agent.active_tasks
            ),
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::profiles::{default_agent, default_agents};
    use crate::types::{AgentKind, TaskKind, TaskPriority};
    use uuid::Uuid;

    fn task(kind: TaskKind) -> Task {
        Task::new(Uuid::from_u128(1), kind, "t")
    }

    fn research_agent(id: &str, success_rate: f64) -> Agent {
        let mut agent = default_agent(AgentKind::Research);
        agent.id = id.to_string();
        agent.metrics.success_rate = success_rate;
        agent
    }

    #[test]
    fn test_picks_higher_success_rate() {
        let agents = vec![research_agent("r-low", 0.6), research_agent("r-high", 0.9)];
        for _ in 0..10 {
            let choice = route(&agents, &task(TaskKind::Research), &[]).unwrap();
            assert_eq!(choice.agent_id, "r-high");
            assert!(!choice.overloaded);
        }
    }

    #[test]
    fn test_prefers_matching_kind() {
        let agents = default_agents();
        let choice = route(&agents, &task(TaskKind::Finalize), &[]).unwrap();
        assert_eq!(choice.agent_id, "analyst-1");
        let choice = route(&agents, &task(TaskKind::Research), &[]).unwrap();
        assert_eq!(choice.agent_id, "research-1");
    }

    #[test]
    fn test_cross_kind_penalty_grows_with_priority() {
        let browser = default_agent(AgentKind::Browser);
        let low = task(TaskKind::Research).with_priority(TaskPriority::Low);
        let critical = task(TaskKind::Research).with_priority(TaskPriority::Critical);
        assert!(score(&browser, &low) > score(&browser, &critical));
    }

    #[test]
    fn test_falls_back_to_least_loaded() {
        let mut a = research_agent("r-a", 0.9);
        a.status = AgentStatus::Busy;
        a.active_tasks = 3;
        let mut b = research_agent("r-b", 0.5);
        b.status = AgentStatus::Busy;
        b.active_tasks = 2;
        let choice = route(&[a, b], &task(TaskKind::Research), &[]).unwrap();
        assert_eq!(choice.agent_id, "r-b");
        assert!(choice.overloaded);
    }

    #[test]
    fn test_fallback_tie_breaks_on_success_rate() {
        let mut a = research_agent("r-a", 0.4);
        a.status = AgentStatus::Busy;
        a.active_tasks = 2;
        let mut b = research_agent("r-b", 0.8);
        b.status = AgentStatus::Busy;
        b.active_tasks = 2;
        let choice = route(&[a, b], &task(TaskKind::Research), &[]).unwrap();
        assert_eq!(choice.agent_id, "r-b");
        assert!(choice.overloaded);
    }

    #[test]
    fn test_busy_agent_under_its_limit_is_not_overloaded() {
        let mut agent = research_agent("research-1", 0.9);
        assert_eq!(agent.config.max_concurrent_tasks, 2);
        agent.status = AgentStatus::Busy;
        agent.active_tasks = 1;

        let choice = route(&[agent.clone()], &task(TaskKind::Research), &[]).unwrap();
        assert_eq!(choice.agent_id, "research-1");
        assert!(!choice.overloaded);

        agent.active_tasks = 2;
        let choice = route(&[agent], &task(TaskKind::Research), &[]).unwrap();
        assert!(choice.overloaded);
    }

    #[test]
    fn test_recovering_agent_is_not_idle() {
        let mut agent = research_agent("research-1", 0.9);
        agent.status = AgentStatus::Recovering;
        assert!(route_idle(&[agent.clone()], &task(TaskKind::Research), &[]).is_none());
        assert!(route(&[agent], &task(TaskKind::Research), &[]).unwrap().overloaded);
    }

    #[test]
    fn test_exclusion_and_no_capable_agent() {
        let agents = vec![default_agent(AgentKind::Coder)];
        assert!(route(&agents, &task(TaskKind::Research), &[]).is_none());
        assert!(route_idle(&agents, &task(TaskKind::Code), &["coder-1".into()]).is_none());
    }

    #[test]
    fn test_offline_agents_are_skipped() {
        let mut agent = default_agent(AgentKind::Coder);
        agent.status = AgentStatus::Offline;
        assert!(route(&[agent], &task(TaskKind::Code), &[]).is_none());
    }
}
