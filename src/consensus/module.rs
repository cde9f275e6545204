use log::{debug, error, info};
use std::collections::VecDeque;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;

use super::timer::Timers;
use super::{ConsensusDriver, Outbox, SharedDriver};
use crate::error::ConsensusError;
use crate::events::{CommunicationEvent, ConsensusEvent, Event, EventBus};
use crate::transaction::NodeId;

/// Event loop of one node: drains the consensus queue in arrival order and
/// hands each event to the driver, then delivers what the driver produced.
pub struct ConsensusModule<D: ConsensusDriver> {
    node_id: NodeId,
    driver: SharedDriver<D>,
    bus: EventBus<D::Proof>,
    inbox: UnboundedReceiver<ConsensusEvent<D::Proof>>,
    /// Events pulled off the queue early while looking for pending RPCs.
    backlog: VecDeque<ConsensusEvent<D::Proof>>,
    timers: Timers<D::Proof>,
    shutdown: watch::Receiver<bool>,
}

impl<D: ConsensusDriver> ConsensusModule<D> {
    pub fn new(
        driver: SharedDriver<D>,
        bus: EventBus<D::Proof>,
        inbox: UnboundedReceiver<ConsensusEvent<D::Proof>>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let node_id = driver.lock().expect("mutex poisoned").state().node_id;
        Self {
            node_id,
            timers: Timers::new(bus.clone()),
            driver,
            bus,
            inbox,
            backlog: VecDeque::new(),
            shutdown,
        }
    }

    pub async fn run(mut self) -> Result<(), ConsensusError> {
        info!("node {}: {} consensus started", self.node_id, D::MECHANISM);
        let needs_chain = {
            let mut driver = self.driver.lock().expect("mutex poisoned");
            driver.start();
            driver.state().chain.is_empty()
        };
        self.flush()?;
        if needs_chain {
            self.bus
                .publish(Event::Communication(CommunicationEvent::RequestChain {
                    from: self.node_id,
                }))?;
        }
        if D::GOSSIPS_TRANSACTIONS {
            self.bus.consensus(ConsensusEvent::CreateTransaction)?;
        }

        let workers = D::spawn_workers(&self.driver, &self.bus, &self.shutdown);
        let result = self.event_loop().await;
        self.timers.stop_all();

        for worker in workers {
            match worker.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("node {}: worker failed: {e}", self.node_id);
                    return Err(e);
                }
                Err(e) => return Err(e.into()),
            }
        }
        info!("node {}: consensus stopped", self.node_id);
        result
    }

    async fn event_loop(&mut self) -> Result<(), ConsensusError> {
        loop {
            let event = match self.backlog.pop_front() {
                Some(event) => event,
                None => {
                    tokio::select! {
                        received = self.inbox.recv() => match received {
                            Some(event) => event,
                            None => return Ok(()),
                        },
                        _ = self.shutdown.changed() => return Ok(()),
                    }
                }
            };
            if *self.shutdown.borrow() {
                return Ok(());
            }
            match self.dispatch(event) {
                Err(ConsensusError::ChannelClosed { family }) if *self.shutdown.borrow() => {
                    debug!("node {}: {family} queue closed during shutdown", self.node_id);
                    return Ok(());
                }
                other => other?,
            }
        }
    }

    /// Whether a vote or heartbeat RPC is already queued behind the current event.
    fn rpc_pending(&mut self) -> bool {
        while let Ok(event) = self.inbox.try_recv() {
            self.backlog.push_back(event);
        }
        self.backlog.iter().any(ConsensusEvent::is_raft_rpc)
    }

    pub fn dispatch(&mut self, event: ConsensusEvent<D::Proof>) -> Result<(), ConsensusError> {
        debug!("node {}: handling {}", self.node_id, event.name());
        let rpc_pending = matches!(event, ConsensusEvent::Raft(_)) && self.rpc_pending();
        let mut appended = false;
        {
            let mut driver = self.driver.lock().expect("mutex poisoned");
            match event {
                ConsensusEvent::CreateBlock => driver.create_block()?,
                ConsensusEvent::ReceiveBlock(block) => appended = driver.receive_block(block),
                ConsensusEvent::CreateTransaction => driver.create_transaction(),
                ConsensusEvent::ReceiveTransaction(tx) => {
                    driver.receive_transaction(tx);
                }
                ConsensusEvent::ChainRequest { requester } => driver.answer_chain_request(requester),
                ConsensusEvent::ChainResponse(blocks) => {
                    appended = driver.receive_chain(blocks) > 0;
                }
                ConsensusEvent::Raft(event) => driver.handle_raft(event, rpc_pending)?,
            }
        }
        self.flush()?;
        if appended && D::GOSSIPS_TRANSACTIONS {
            self.bus.consensus(ConsensusEvent::CreateTransaction)?;
        }
        Ok(())
    }

    /// Deliver the driver's outbox: events to the bus, timer commands to the timers.
    fn flush(&mut self) -> Result<(), ConsensusError> {
        let Outbox { events, timers } = self
            .driver
            .lock()
            .expect("mutex poisoned")
            .state_mut()
            .take_outbox();
        for command in timers {
            self.timers.apply(command);
        }
        self.bus.publish_all(events)
    }
}
