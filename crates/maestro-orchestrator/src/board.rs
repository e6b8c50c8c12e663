use crate::types::{PriorOutput, Task, TaskKind, TaskOutput, TaskStatus};
use maestro_core::{MaestroError, MaestroResult};
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

/// All tasks of the current run, in decomposition order.
#[derive(Debug, Default)]
pub struct TaskBoard {
    tasks: HashMap<Uuid, Task>,
    order: Vec<Uuid>,
}

impl TaskBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, task: Task) -> Uuid {
        let id = task.id;
        if self.tasks.insert(id, task).is_none() {
            self.order.push(id);
        }
        id
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
        self.order.clear();
    }

    pub fn get(&self, id: Uuid) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut Task> {
        self.tasks.get_mut(&id)
    }

    /// Apply a status transition through the task state machine.
    pub fn transition(&mut self, id: Uuid, to: TaskStatus) -> MaestroResult<()> {
        let task = self
            .tasks
            .get_mut(&id)
            .ok_or_else(|| MaestroError::Orchestrator(format!("unknown task {id}")))?;
        let from = task.status;
        if let Err(e) = task.transition(to) {
            warn!(task_id = %id, from = %from, to = %to, "Rejected task transition");
            return Err(e);
        }
        debug!(task_id = %id, from = %from, to = %to, "Task transition");
        Ok(())
    }

    pub fn all_tasks(&self) -> Vec<&Task> {
        self.order.iter().filter_map(|id| self.tasks.get(id)).collect()
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.values().filter(|t| t.status == status).count()
    }

    pub fn total_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_done(&self) -> bool {
        self.tasks.values().all(|t| t.status.is_terminal())
    }

    /// Tasks that list `id` among their dependencies.
    pub fn dependents(&self, id: Uuid) -> Vec<&Task> {
        self.all_tasks()
            .into_iter()
            .filter(|t| t.dependencies.contains(&id))
            .collect()
    }

    /// Completed outputs visible to a task: its dependencies' outputs, or
    /// every completed output for a finalize task.
    pub fn prior_outputs(&self, id: Uuid) -> Vec<PriorOutput> {
        let Some(task) = self.tasks.get(&id) else {
            return Vec::new();
        };
        self.all_tasks()
            .into_iter()
            .filter(|t| t.id != id && t.status == TaskStatus::Completed)
            .filter(|t| task.kind == TaskKind::Finalize || task.dependencies.contains(&t.id))
            .filter_map(|t| {
                t.output.as_ref().map(|o| PriorOutput {
                    task_id: t.id,
                    title: t.title.clone(),
                    content: o.content.clone(),
                })
            })
            .collect()
    }

    pub fn set_output(&mut self, id: Uuid, output: TaskOutput) {
        if let Some(task) = self.tasks.get_mut(&id) {
            task.output = Some(output);
        }
    }

    /// Cancel every task that has not started yet or is between attempts.
    /// Returns the ids that were cancelled.
    pub fn cancel_unfinished(&mut self) -> Vec<Uuid> {
        let mut cancelled = Vec::new();
        for id in &self.order {
            if let Some(task) = self.tasks.get_mut(id) {
                if task.status.can_transition(TaskStatus::Cancelled)
                    && task.status != TaskStatus::Running
                    && task.transition(TaskStatus::Cancelled).is_ok()
                {
                    cancelled.push(*id);
                }
            }
        }
        cancelled
    }
}
