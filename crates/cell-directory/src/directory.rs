use crate::descriptor::CellDescriptor;
use crate::{Error, PeerKind};
use model::CellId;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::Mutex;

/// Tracks cell descriptors and hands out ready channels to their peers.
///
/// `C` is the transport client type; the directory is generic so that the
/// core stays independent of the concrete RPC stack. Channels are dialed
/// through `factory`, cached per address, and cheaply cloned out to
/// callers; `sweep()` drops channels unused since the previous sweep.
pub struct CellDirectory<C> {
    factory: Box<dyn Fn(&str) -> C + Send + Sync>,
    networks: Vec<String>,
    cells: Mutex<HashMap<CellId, CellDescriptor>>,
    // Ready channels also track their number of uses since the last sweep.
    channels: Mutex<HashMap<String, (C, usize)>>,
}

impl<C: Clone> CellDirectory<C> {
    pub fn new(
        networks: Vec<String>,
        factory: impl Fn(&str) -> C + Send + Sync + 'static,
    ) -> Self {
        Self {
            factory: Box::new(factory),
            networks,
            cells: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Install or update a cell's descriptor. Stale configurations (by
    /// `config_version`) are ignored, so descriptors riding on concurrent
    /// mount responses may be folded in any order.
    pub fn reconfigure_cell(&self, descriptor: CellDescriptor) {
        let mut cells = self.cells.lock().unwrap();
        match cells.get(&descriptor.cell_id) {
            Some(known) if known.config_version >= descriptor.config_version => {}
            _ => {
                tracing::debug!(
                    cell_id = %descriptor.cell_id,
                    config_version = descriptor.config_version,
                    peers = descriptor.peers.len(),
                    "reconfigured cell",
                );
                cells.insert(descriptor.cell_id, descriptor);
            }
        }
    }

    pub fn find_descriptor(&self, cell_id: CellId) -> Option<CellDescriptor> {
        self.cells.lock().unwrap().get(&cell_id).cloned()
    }

    pub fn descriptor_or_err(&self, cell_id: CellId) -> Result<CellDescriptor, Error> {
        self.find_descriptor(cell_id)
            .ok_or(Error::UnknownCell(cell_id))
    }

    /// A ready channel to the chosen peer of `cell_id`.
    pub fn channel(&self, cell_id: CellId, kind: PeerKind) -> Result<C, Error> {
        let descriptor = self.descriptor_or_err(cell_id)?;
        let index = self.pick_peer(&descriptor, kind, None)?;
        self.dial(&descriptor, index)
    }

    /// A primary channel plus a backup to a distinct peer, for hedged
    /// requests. The backup is `None` when no other valid peer exists.
    pub fn channel_with_backup(
        &self,
        cell_id: CellId,
        kind: PeerKind,
    ) -> Result<(C, Option<C>), Error> {
        let descriptor = self.descriptor_or_err(cell_id)?;
        let primary = self.pick_peer(&descriptor, kind, None)?;
        let backup = self
            .pick_peer(&descriptor, PeerKind::LeaderOrFollower, Some(primary))
            .ok();

        let primary = self.dial(&descriptor, primary)?;
        let backup = backup.map(|index| self.dial(&descriptor, index)).transpose()?;
        Ok((primary, backup))
    }

    /// Drop channels which have not been used since the preceding sweep.
    /// Call periodically: peers come and go as cells rebalance.
    pub fn sweep(&self) {
        let mut channels = self.channels.lock().unwrap();
        channels.retain(|address, (_channel, uses)| {
            if *uses == 0 {
                tracing::debug!(address, "dropping idle peer channel");
                return false;
            }
            *uses = 0; // Mark for next sweep.
            true
        });
    }

    fn pick_peer(
        &self,
        descriptor: &CellDescriptor,
        kind: PeerKind,
        exclude: Option<usize>,
    ) -> Result<usize, Error> {
        let candidates: Vec<usize> = descriptor
            .peers
            .iter()
            .enumerate()
            .filter(|(index, peer)| {
                peer.voting
                    && peer.address(&self.networks).is_some()
                    && Some(*index) != exclude
            })
            .map(|(index, _)| index)
            .collect();

        match kind {
            PeerKind::Leader => match descriptor.leader_index {
                Some(index) if candidates.contains(&index) => Ok(index),
                _ => Err(Error::NoLeader(descriptor.cell_id)),
            },
            PeerKind::LeaderOrFollower => candidates
                .choose(&mut rand::thread_rng())
                .copied()
                .ok_or(Error::NoSuchPeer {
                    cell_id: descriptor.cell_id,
                    kind,
                }),
            PeerKind::Follower => {
                let followers: Vec<usize> = candidates
                    .into_iter()
                    .filter(|index| Some(*index) != descriptor.leader_index)
                    .collect();
                followers
                    .choose(&mut rand::thread_rng())
                    .copied()
                    .ok_or(Error::NoSuchPeer {
                        cell_id: descriptor.cell_id,
                        kind,
                    })
            }
        }
    }

    fn dial(&self, descriptor: &CellDescriptor, peer_index: usize) -> Result<C, Error> {
        let peer = &descriptor.peers[peer_index];
        let address = peer.address(&self.networks).ok_or_else(|| Error::NoAddress {
            cell_id: descriptor.cell_id,
            networks: self.networks.clone(),
        })?;

        let mut channels = self.channels.lock().unwrap();
        if let Some((channel, uses)) = channels.get_mut(address) {
            *uses += 1;
            return Ok(channel.clone());
        }
        let channel = (self.factory)(address);
        channels.insert(address.to_string(), (channel.clone(), 1));
        Ok(channel)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::descriptor::CellPeer;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn peer(address: &str, voting: bool) -> CellPeer {
        CellPeer {
            addresses: HashMap::from([("default".to_string(), address.to_string())]),
            voting,
        }
    }

    fn descriptor(cell_id: CellId, leader_index: Option<usize>) -> CellDescriptor {
        CellDescriptor {
            cell_id,
            config_version: 1,
            peers: vec![peer("a:9020", true), peer("b:9020", true), peer("c:9020", false)],
            leader_index,
        }
    }

    fn directory() -> (Arc<AtomicUsize>, CellDirectory<String>) {
        let dials = Arc::new(AtomicUsize::new(0));
        let counter = dials.clone();
        let directory = CellDirectory::new(vec!["default".to_string()], move |address| {
            counter.fetch_add(1, Ordering::SeqCst);
            address.to_string()
        });
        (dials, directory)
    }

    #[test]
    fn leader_kind_requires_a_known_leader() {
        let (_, directory) = directory();
        let cell_id = CellId::random();

        directory.reconfigure_cell(descriptor(cell_id, None));
        assert!(matches!(
            directory.channel(cell_id, PeerKind::Leader),
            Err(Error::NoLeader(_))
        ));

        directory.reconfigure_cell(CellDescriptor {
            config_version: 2,
            ..descriptor(cell_id, Some(0))
        });
        assert_eq!(directory.channel(cell_id, PeerKind::Leader).unwrap(), "a:9020");
    }

    #[test]
    fn follower_kind_avoids_the_leader_and_non_voters() {
        let (_, directory) = directory();
        let cell_id = CellId::random();
        directory.reconfigure_cell(descriptor(cell_id, Some(0)));

        for _ in 0..32 {
            let channel = directory.channel(cell_id, PeerKind::Follower).unwrap();
            assert_eq!(channel, "b:9020");
        }
    }

    #[test]
    fn channels_are_reused_until_swept() {
        let (dials, directory) = directory();
        let cell_id = CellId::random();
        directory.reconfigure_cell(descriptor(cell_id, Some(0)));

        directory.channel(cell_id, PeerKind::Leader).unwrap();
        directory.channel(cell_id, PeerKind::Leader).unwrap();
        assert_eq!(dials.load(Ordering::SeqCst), 1);

        directory.sweep(); // Used since last sweep: retained.
        directory.sweep(); // Not used since: dropped.
        directory.channel(cell_id, PeerKind::Leader).unwrap();
        assert_eq!(dials.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn stale_reconfigurations_are_ignored() {
        let (_, directory) = directory();
        let cell_id = CellId::random();
        directory.reconfigure_cell(CellDescriptor {
            config_version: 5,
            ..descriptor(cell_id, Some(1))
        });
        directory.reconfigure_cell(descriptor(cell_id, Some(0)));

        let known = directory.find_descriptor(cell_id).unwrap();
        assert_eq!(known.config_version, 5);
        assert_eq!(known.leader_index, Some(1));
    }

    #[test]
    fn backup_peer_is_distinct_from_primary() {
        let (_, directory) = directory();
        let cell_id = CellId::random();
        directory.reconfigure_cell(descriptor(cell_id, Some(0)));

        let (primary, backup) = directory
            .channel_with_backup(cell_id, PeerKind::Leader)
            .unwrap();
        assert_eq!(primary, "a:9020");
        assert_eq!(backup.as_deref(), Some("b:9020"));
    }
}
