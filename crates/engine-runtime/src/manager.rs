use crate::{
    error::{EngineError, TaskError},
    task::{Job, TaskRunner},
};
use async_trait::async_trait;
use engine_core::{
    actor::{Actor, ActorContext, ActorRef, spawn_actor},
    error::ActorError,
    result::TaskResult,
};
use std::{fmt, sync::Arc};
use tokio::{
    sync::{Mutex, oneshot},
    task::{JoinHandle, JoinSet},
};
use tracing::{debug, error, info};

pub type JobOutcome = Result<TaskResult, TaskError>;

pub enum ManagerMsg {
    Submit {
        job: Job,
        done: oneshot::Sender<JobOutcome>,
    },
    /// Replies once every dispatched job has finished.
    Drain(oneshot::Sender<()>),
    Stop,
}

impl fmt::Debug for ManagerMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagerMsg::Submit { job, .. } => f.debug_tuple("Submit").field(job).finish(),
            ManagerMsg::Drain(_) => f.write_str("Drain"),
            ManagerMsg::Stop => f.write_str("Stop"),
        }
    }
}

/// Dispatcher: pops submissions off the bounded mailbox and runs each job
/// on its own Tokio task.
struct Dispatcher {
    runner: Arc<TaskRunner>,
    running: JoinSet<()>,
}

impl Dispatcher {
    fn reap(&mut self) {
        while let Some(done) = self.running.try_join_next() {
            if let Err(e) = done {
                error!(error = %e, "task job panicked");
            }
        }
    }

    async fn drain(&mut self) {
        while let Some(done) = self.running.join_next().await {
            if let Err(e) = done {
                error!(error = %e, "task job panicked");
            }
        }
    }
}

#[async_trait]
impl Actor<ManagerMsg> for Dispatcher {
    async fn handle(&mut self, msg: ManagerMsg, ctx: &ActorContext) -> Result<(), ActorError> {
        match msg {
            ManagerMsg::Submit { job, done } => {
                self.reap();
                let result_seed = job.result_seed();
                debug!(?job, "dispatching task job");
                let runner = self.runner.clone();
                self.running.spawn(async move {
                    let outcome = runner.execute(job).await;
                    if done.send(outcome).is_err() {
                        debug!(result_seed, "nobody waiting on task outcome");
                    }
                });
            }
            ManagerMsg::Drain(reply) => {
                self.drain().await;
                let _ = reply.send(());
            }
            ManagerMsg::Stop => {
                info!("task manager stopping");
                self.runner.executor().cancel_token().cancel();
                self.drain().await;
                ctx.stop();
            }
        }
        Ok(())
    }

    async fn on_stop(&mut self, _ctx: &ActorContext) -> Result<(), ActorError> {
        self.drain().await;
        Ok(())
    }
}

/// Bounded submission queue in front of the task runner.
pub struct TaskManager {
    actor: ActorRef<ManagerMsg>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TaskManager {
    pub fn new(runner: Arc<TaskRunner>, queue_capacity: usize) -> Self {
        let dispatcher = Dispatcher {
            runner,
            running: JoinSet::new(),
        };
        let (actor, handle) = spawn_actor("task-manager", queue_capacity, dispatcher);
        Self {
            actor,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Queues `job` without waiting for room.
    pub fn submit(&self, job: Job) -> Result<oneshot::Receiver<JobOutcome>, EngineError> {
        let (done, outcome) = oneshot::channel();
        match self.actor.try_send(ManagerMsg::Submit { job, done }) {
            Ok(()) => Ok(outcome),
            Err(ActorError::MailboxFull) => Err(EngineError::QueueFull),
            Err(ActorError::MailboxClosed) => Err(EngineError::ShutDown),
        }
    }

    /// Waits until every job submitted so far has finished.
    pub async fn drain(&self) -> Result<(), EngineError> {
        let (reply, done) = oneshot::channel();
        self.actor
            .send(ManagerMsg::Drain(reply))
            .await
            .map_err(|_| EngineError::ShutDown)?;
        done.await.map_err(|_| EngineError::ShutDown)
    }

    /// Cancels running sweeps, waits for them and stops the dispatcher.
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        let Some(handle) = self.handle.lock().await.take() else {
            return;
        };
        if self.actor.send(ManagerMsg::Stop).await.is_err() {
            debug!("task manager mailbox already closed");
        }
        if let Err(e) = handle.await {
            error!(error = %e, "task manager panicked");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.actor.is_closed()
    }
}
