use std::sync::Arc;
use std::time::Duration;

use auris_core::config::QueueConfig;
use auris_core::events::{EventBus, OutboundEvent};
use auris_core::ids::{AgentId, UserId};
use auris_core::types::MemoryScope;
use auris_memory::MemoryService;
use auris_sessions::ConversationStore;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::store::TaskStore;
use crate::types::ExtractionTask;

/// Polls for queued extraction tasks and drives them through the memory
/// pipeline (§4.8). Grounded on
/// `skynet-scheduler::engine::SchedulerEngine::run`'s tick-interval loop,
/// generalized from a 1s cron tick to a 5s poll over a bounded batch, with
/// per-task retry bookkeeping instead of cron's next-run scheduling.
pub struct ExtractionWorker {
    store: Arc<TaskStore>,
    memory: Arc<MemoryService>,
    conversations: Arc<ConversationStore>,
    events: EventBus,
    config: QueueConfig,
}

impl ExtractionWorker {
    pub fn new(
        store: Arc<TaskStore>,
        memory: Arc<MemoryService>,
        conversations: Arc<ConversationStore>,
        events: EventBus,
        config: QueueConfig,
    ) -> Self {
        Self { store, memory, conversations, events, config }
    }

    /// Main loop: poll every `poll_interval_secs`, process up to
    /// `batch_size` tasks per tick, until `shutdown` broadcasts `true`.
    /// An error during a tick (e.g. a poisoned/broken DB connection)
    /// triggers `error_loop_backoff_secs` of extra sleep before the next
    /// attempt rather than busy-looping.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("extraction queue worker started");
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.poll_interval_secs));

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.process_batch().await {
                        error!(error = %e, "extraction worker tick failed");
                        tokio::time::sleep(Duration::from_secs(self.config.error_loop_backoff_secs)).await;
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("extraction queue worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn process_batch(&self) -> Result<()> {
        let tasks = self.store.claim_batch(self.config.batch_size)?;
        for task in tasks {
            self.events.publish(OutboundEvent::MemoryExtractionProcessing { task_id: task.id.to_string() });
            self.process_one(task).await;
        }
        Ok(())
    }

    async fn process_one(&self, task: ExtractionTask) {
        let scope = self.resolve_scope(&task.user_id, task.agent_id.as_ref());
        let outcome = tokio::time::timeout(
            Duration::from_secs(self.config.task_timeout_secs),
            self.memory.extract_facts_from_turn(&task.user_id, scope, &task.user_message, &task.ai_response),
        )
        .await;

        match outcome {
            Ok(Ok(_fact_ids)) => {
                if let Err(e) = self.store.mark_completed(&task.id) {
                    error!(error = %e, task_id = %task.id, "failed to persist task completion");
                }
            }
            Ok(Err(e)) => self.fail(&task, &e.to_string()),
            Err(_) => self.fail(&task, "extraction timed out"),
        }
    }

    /// Applies the §4.7.1 scope policy (admin override → per-agent
    /// preference → deprecated toggle → agent default) to a task's raw
    /// `agent_id` before handing it to the memory pipeline, so a task
    /// enqueued against an agent that's since been switched to global
    /// scope (or overridden by an admin policy) lands in the right
    /// partition rather than always following the session's agent.
    fn resolve_scope<'a>(&self, user_id: &UserId, agent_id: Option<&'a AgentId>) -> Option<&'a AgentId> {
        let agent_id = agent_id?;
        let agent_default = match self.conversations.get_agent(agent_id) {
            Ok(agent) => agent.memory_scope,
            Err(e) => {
                warn!(error = %e, agent_id = %agent_id.as_str(), "couldn't look up agent for scope resolution, defaulting to per-agent scope");
                MemoryScope::Agent
            }
        };
        match self.memory.resolve_scope(user_id, agent_id, agent_default) {
            Ok(scope) => scope,
            Err(e) => {
                warn!(error = %e, "scope resolution failed, defaulting to per-agent scope");
                Some(agent_id)
            }
        }
    }

    fn fail(&self, task: &ExtractionTask, error: &str) {
        match self.store.mark_failed(&task.id, error, self.config.max_attempts) {
            Ok(true) => warn!(task_id = %task.id, error, "extraction task failed, will retry"),
            Ok(false) => {
                warn!(task_id = %task.id, error, "extraction task failed permanently after max attempts");
                self.events.publish(OutboundEvent::MemoryExtractionFailed {
                    task_id: task.id.to_string(),
                    error: error.to_string(),
                });
            }
            Err(e) => error!(error = %e, task_id = %task.id, "failed to persist task failure"),
        }
    }
}

/// Implements the enqueue half of the extraction pipeline: auris-sessions
/// calls this on every assistant turn to hand off fact extraction without
/// depending on auris-memory or auris-queue directly.
pub struct QueueEnqueuer {
    store: Arc<TaskStore>,
    events: EventBus,
}

impl QueueEnqueuer {
    pub fn new(store: Arc<TaskStore>, events: EventBus) -> Self {
        Self { store, events }
    }
}

#[async_trait::async_trait]
impl auris_sessions::ExtractionEnqueuer for QueueEnqueuer {
    async fn queue_extraction(&self, user_id: &UserId, agent_id: &AgentId, user_message: &str, ai_response: &str) {
        match self.store.enqueue(user_id, Some(agent_id), user_message, ai_response) {
            Ok(task) => self.events.publish(OutboundEvent::MemoryExtractionQueued { task_id: task.id.to_string() }),
            Err(e) => error!(error = %e, "failed to enqueue extraction task"),
        }
    }
}
