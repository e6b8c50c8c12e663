use crate::profiles::default_agents;
use crate::types::{Agent, AgentConfig, AgentKind, AgentStatus};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Roster of agents and their live state. Agents are never removed.
#[derive(Clone)]
pub struct AgentRegistry {
    agents: Arc<RwLock<Vec<Agent>>>,
}

impl AgentRegistry {
    pub fn new(agents: Vec<Agent>) -> Self {
        Self {
            agents: Arc::new(RwLock::new(agents)),
        }
    }

    /// Mark an agent as working on a task.
    pub async fn start_task(&self, agent_id: &str, task_id: Uuid) {
        let mut agents = self.agents.write().await;
        if let Some(agent) = agents.iter_mut().find(|a| a.id == agent_id) {
            agent.active_tasks += 1;
            agent.current_task = Some(task_id);
            agent.status = AgentStatus::Busy;
            debug!(agent = %agent_id, task_id = %task_id, active = agent.active_tasks, "Agent busy");
        }
    }

    /// Release an agent from a task and fold the attempt into its metrics.
    pub async fn finish_task(&self, agent_id: &str, task_id: Uuid, success: bool, duration_ms: u64) {
        let mut agents = self.agents.write().await;
        if let Some(agent) = agents.iter_mut().find(|a| a.id == agent_id) {
            agent.active_tasks = agent.active_tasks.saturating_sub(1);
            if agent.current_task == Some(task_id) {
                agent.current_task = None;
            }
            agent.metrics.record(success, duration_ms);
            agent.status = match (agent.active_tasks, success) {
                (0, true) => AgentStatus::Idle,
                (0, false) => AgentStatus::Recovering,
                _ => AgentStatus::Busy,
            };
        }
    }

    /// Put agents left `Recovering` or `Error` after a failure back to `Idle`.
    pub async fn recover_idle(&self) {
        let mut agents = self.agents.write().await;
        for agent in agents.iter_mut() {
            let failed = matches!(agent.status, AgentStatus::Recovering | AgentStatus::Error);
            if failed && agent.active_tasks == 0 {
                agent.status = AgentStatus::Idle;
            }
        }
    }

    /// Clear in-flight bookkeeping after a run was abandoned mid-task.
    pub async fn reset_activity(&self) {
        let mut agents = self.agents.write().await;
        for agent in agents.iter_mut() {
            agent.active_tasks = 0;
            agent.current_task = None;
            if agent.status != AgentStatus::Offline {
                agent.status = AgentStatus::Idle;
            }
        }
    }

    /// Override an agent's status; the engine uses it to take an agent that
    /// failed a task permanently out of the idle pool until the next phase.
    pub async fn set_status(&self, agent_id: &str, status: AgentStatus) {
        let mut agents = self.agents.write().await;
        if let Some(agent) = agents.iter_mut().find(|a| a.id == agent_id) {
            agent.status = status;
        }
    }

    pub async fn snapshot(&self) -> Vec<Agent> {
        self.agents.read().await.clone()
    }

    pub async fn get(&self, agent_id: &str) -> Option<Agent> {
        self.agents
            .read()
            .await
            .iter()
            .find(|a| a.id == agent_id)
            .cloned()
    }

    /// Config of the first agent of a kind.
    pub async fn config_for(&self, kind: AgentKind) -> Option<AgentConfig> {
        self.agents
            .read()
            .await
            .iter()
            .find(|a| a.kind == kind)
            .map(|a| a.config.clone())
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new(default_agents())
    }
}
