use crate::types::{PhaseStatus, PlanStatus, PlanningDefect, TaskStatus};
use maestro_core::ErrorKind;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Everything observable about a run, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    PlanCreated {
        plan_id: Uuid,
        goal: String,
        phases: usize,
        tasks: usize,
    },
    PlanningDefect {
        plan_id: Uuid,
        defect: PlanningDefect,
    },
    TaskStarted {
        task_id: Uuid,
        agent_id: String,
        attempt: u32,
    },
    TaskStatusChanged {
        task_id: Uuid,
        status: TaskStatus,
    },
    TaskRetrying {
        task_id: Uuid,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    TaskReassigned {
        task_id: Uuid,
        from: String,
        to: String,
    },
    TaskSelfHealed {
        task_id: Uuid,
        alternative: String,
        score: f64,
    },
    TaskCompleted {
        task_id: Uuid,
        agent_id: String,
        confidence: f64,
    },
    TaskFailed {
        task_id: Uuid,
        error: String,
        kind: ErrorKind,
    },
    PhaseCompleted {
        plan_id: Uuid,
        index: usize,
        status: PhaseStatus,
    },
    Progress {
        plan_id: Uuid,
        percent: f64,
    },
    AgentMessage {
        from: String,
        to: String,
        content: String,
    },
    PlanCompleted {
        plan_id: Uuid,
        status: PlanStatus,
    },
    Log {
        level: LogLevel,
        message: String,
    },
}

/// Fan-out of events to any number of subscribers.
///
/// Each subscriber gets its own unbounded channel; closed receivers are
/// dropped on the next emit.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<OrchestratorEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<OrchestratorEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn emit(&self, event: OrchestratorEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(OrchestratorEvent::Log {
            level,
            message: message.into(),
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
