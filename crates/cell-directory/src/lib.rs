//! Directory of participant cells and their peers.
//!
//! Maps a cell id to the replicated peer set hosting it, picks a peer for
//! each request, and maintains ready channels to peer endpoints which may
//! be discovered dynamically over time (cell descriptors ride along on
//! mount info responses).

mod descriptor;
mod directory;
mod hedging;

pub use descriptor::{CellDescriptor, CellPeer};
pub use directory::CellDirectory;
pub use hedging::hedge;

use model::CellId;

/// Which peer of a cell a request should land on.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PeerKind {
    /// The unique voting peer currently leading; fail if unknown.
    Leader,
    /// Uniform random among valid peers.
    LeaderOrFollower,
    /// Uniform random among valid non-leader peers.
    Follower,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("no descriptor for cell {0}")]
    UnknownCell(CellId),
    #[error("no leader known for cell {0}")]
    NoLeader(CellId),
    #[error("no valid {kind:?} peer for cell {cell_id}")]
    NoSuchPeer { cell_id: CellId, kind: PeerKind },
    #[error("peer of cell {cell_id} has no address on networks {networks:?}")]
    NoAddress {
        cell_id: CellId,
        networks: Vec<String>,
    },
}
