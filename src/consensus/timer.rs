use log::debug;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::raft::RaftEvent;
use crate::blockchain::Proof;
use crate::events::{ConsensusEvent, EventBus};

/// Timer changes requested by a driver. Firings are posted back onto the
/// node's consensus queue tagged with the generation they were armed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCommand {
    RestartElection { timeout: Duration, generation: u64 },
    StopElection,
    StartHeartbeat { period: Duration, generation: u64 },
    StopHeartbeat,
}

/// At most one live election timer and one live heartbeat timer per node:
/// arming a timer always aborts the previous task first.
pub struct Timers<P> {
    bus: EventBus<P>,
    election: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
}

impl<P: Proof> Timers<P> {
    pub fn new(bus: EventBus<P>) -> Self {
        Self {
            bus,
            election: None,
            heartbeat: None,
        }
    }

    pub fn apply(&mut self, command: TimerCommand) {
        match command {
            TimerCommand::RestartElection {
                timeout,
                generation,
            } => {
                cancel(&mut self.election);
                let bus = self.bus.clone();
                self.election = Some(tokio::spawn(async move {
                    time::sleep(timeout).await;
                    let event = ConsensusEvent::Raft(RaftEvent::ElectionTimeout { generation });
                    if bus.consensus(event).is_err() {
                        debug!("election timer fired after shutdown");
                    }
                }));
            }
            TimerCommand::StopElection => cancel(&mut self.election),
            TimerCommand::StartHeartbeat { period, generation } => {
                cancel(&mut self.heartbeat);
                let bus = self.bus.clone();
                self.heartbeat = Some(tokio::spawn(async move {
                    let mut ticker = time::interval_at(Instant::now() + period, period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    loop {
                        ticker.tick().await;
                        let event =
                            ConsensusEvent::Raft(RaftEvent::HeartbeatTimeout { generation });
                        if bus.consensus(event).is_err() {
                            break;
                        }
                    }
                }));
            }
            TimerCommand::StopHeartbeat => cancel(&mut self.heartbeat),
        }
    }

    pub fn stop_all(&mut self) {
        cancel(&mut self.election);
        cancel(&mut self.heartbeat);
    }
}

impl<P> Drop for Timers<P> {
    fn drop(&mut self) {
        cancel(&mut self.election);
        cancel(&mut self.heartbeat);
    }
}

fn cancel(slot: &mut Option<JoinHandle<()>>) {
    if let Some(handle) = slot.take() {
        handle.abort();
    }
}
