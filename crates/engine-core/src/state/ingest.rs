use super::sets::{OffsetSets, StateEvent};
use crate::{
    actor::{Actor, ActorContext},
    error::ActorError,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::trace;

#[derive(Debug)]
pub(crate) enum StateMsg {
    Event(StateEvent),
    Stop,
}

/// Sole writer of a task's offset sets.
pub(crate) struct StateIngestor {
    sets: Arc<RwLock<OffsetSets>>,
}

impl StateIngestor {
    pub(crate) fn new(sets: Arc<RwLock<OffsetSets>>) -> Self {
        Self { sets }
    }
}

#[async_trait]
impl Actor<StateMsg> for StateIngestor {
    async fn handle(&mut self, msg: StateMsg, ctx: &ActorContext) -> Result<(), ActorError> {
        match msg {
            StateMsg::Event(event) => {
                trace!(actor = %ctx.name(), offset = event.offset, status = ?event.status, "state event");
                self.sets.write().await.apply(event);
            }
            StateMsg::Stop => ctx.stop(),
        }
        Ok(())
    }
}
