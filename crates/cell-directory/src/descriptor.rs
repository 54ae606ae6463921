use model::CellId;
use std::collections::HashMap;

/// One peer of a replicated cell.
#[derive(Clone, Debug, PartialEq)]
pub struct CellPeer {
    /// Address per network name; consumers pick by preference list.
    pub addresses: HashMap<String, String>,
    pub voting: bool,
}

impl CellPeer {
    /// The peer's address on the first matching preferred network.
    pub fn address<S: AsRef<str>>(&self, networks: &[S]) -> Option<&str> {
        networks
            .iter()
            .find_map(|network| self.addresses.get(network.as_ref()))
            .map(String::as_str)
    }
}

/// A cell's peer set, versioned by the master's cell configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct CellDescriptor {
    pub cell_id: CellId,
    pub config_version: i32,
    pub peers: Vec<CellPeer>,
    pub leader_index: Option<usize>,
}

impl CellDescriptor {
    pub fn from_proto(proto: &proto_tablet::master::CellDescriptor) -> Option<Self> {
        let cell_id = CellId(proto_tablet::guid_from_proto(&proto.cell_id)?);
        Some(Self {
            cell_id,
            config_version: proto.config_version,
            peers: proto
                .peers
                .iter()
                .map(|peer| CellPeer {
                    addresses: peer.addresses.clone(),
                    voting: peer.voting,
                })
                .collect(),
            leader_index: proto
                .leader_index
                .and_then(|index| usize::try_from(index).ok())
                .filter(|index| *index < proto.peers.len()),
        })
    }
}
