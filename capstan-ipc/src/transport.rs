//! Rank-addressed transport abstraction and an in-memory implementation

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::IpcError;
use crate::protocol::Rank;

/// One frame as handed over by the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Rank of the sending peer.
    pub source: Rank,
    /// Raw message discriminator, carried next to the frame.
    pub type_tag: u32,
    pub frame: Vec<u8>,
}

/// The mailbox's view of the underlying transport.
///
/// Implementations are reliable and ordered per peer pair; lost-message
/// retry is out of scope. Receives are non-blocking: waiting is the
/// mailbox's job, not the transport's.
pub trait RankTransport {
    /// Hand a frame and its discriminator to the peer at `rank`.
    fn send(&self, rank: Rank, type_tag: u32, frame: &[u8]) -> Result<(), IpcError>;

    /// Take the next queued delivery, if any.
    fn try_recv(&self) -> Result<Option<Delivery>, IpcError>;

    /// True when a delivery is queued.
    fn message_waiting(&self) -> Result<bool, IpcError>;
}

type Inbox = Arc<Mutex<VecDeque<Delivery>>>;

/// In-memory rank fan-out for single-host runs and tests.
///
/// The hub owns one inbox per rank; endpoints hold handles to all of them
/// and deliver directly into the destination's queue.
#[derive(Debug, Clone)]
pub struct LoopbackHub {
    inboxes: Vec<Inbox>,
}

impl LoopbackHub {
    /// A hub with `ranks` endpoints, addressed `0..ranks`.
    pub fn new(ranks: usize) -> Self {
        Self {
            inboxes: (0..ranks)
                .map(|_| Arc::new(Mutex::new(VecDeque::new())))
                .collect(),
        }
    }

    /// The endpoint for `rank`. Panics if the rank is out of range.
    pub fn endpoint(&self, rank: Rank) -> LoopbackEndpoint {
        assert!(
            (0..self.inboxes.len() as Rank).contains(&rank),
            "rank {rank} outside hub of {} endpoints",
            self.inboxes.len()
        );
        LoopbackEndpoint {
            rank,
            inboxes: self.inboxes.clone(),
        }
    }
}

/// One rank's connection to a [`LoopbackHub`].
#[derive(Debug, Clone)]
pub struct LoopbackEndpoint {
    rank: Rank,
    inboxes: Vec<Inbox>,
}

impl LoopbackEndpoint {
    pub fn rank(&self) -> Rank {
        self.rank
    }

    fn inbox(&self, rank: Rank) -> Result<&Inbox, IpcError> {
        usize::try_from(rank)
            .ok()
            .and_then(|i| self.inboxes.get(i))
            .ok_or_else(|| IpcError::TransportFailure(format!("no endpoint with rank {rank}")))
    }

    fn lock(inbox: &Inbox) -> Result<MutexGuard<'_, VecDeque<Delivery>>, IpcError> {
        inbox
            .lock()
            .map_err(|_| IpcError::TransportFailure("inbox mutex poisoned".to_string()))
    }
}

impl RankTransport for LoopbackEndpoint {
    fn send(&self, rank: Rank, type_tag: u32, frame: &[u8]) -> Result<(), IpcError> {
        let inbox = self.inbox(rank)?;
        Self::lock(inbox)?.push_back(Delivery {
            source: self.rank,
            type_tag,
            frame: frame.to_vec(),
        });
        Ok(())
    }

    fn try_recv(&self) -> Result<Option<Delivery>, IpcError> {
        let inbox = self.inbox(self.rank)?;
        Ok(Self::lock(inbox)?.pop_front())
    }

    fn message_waiting(&self) -> Result<bool, IpcError> {
        let inbox = self.inbox(self.rank)?;
        Ok(!Self::lock(inbox)?.is_empty())
    }
}
