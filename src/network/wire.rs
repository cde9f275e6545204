use serde::{Deserialize, Serialize};

use crate::error::ConsensusError;
use crate::events::ConsensusEvent;
use crate::transaction::NodeId;

/// A consensus event in flight between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<P> {
    pub from: NodeId,
    pub event: ConsensusEvent<P>,
}

pub fn encode<P: Serialize>(envelope: &Envelope<P>) -> Result<Vec<u8>, ConsensusError> {
    serde_json::to_vec(envelope).map_err(ConsensusError::Encode)
}

pub fn decode<P>(from: NodeId, frame: &[u8]) -> Result<Envelope<P>, ConsensusError>
where
    P: for<'de> Deserialize<'de>,
{
    serde_json::from_slice(frame).map_err(|source| ConsensusError::Decode { from, source })
}
