//! Collective pattern construction.
//!
//! Given the local subdomains and a halo generator, every process derives
//! its receive halos locally, discovers all domain extents with an
//! all-gather, resolves peers by global-box intersection, assigns
//! disambiguating tags, and finally ships each receive plan back to the
//! process that has to do the sending. After [`make_patterns`] returns,
//! send and receive plans are symmetric across the whole world.
//!
//! Wire records follow the LE fixed-width convention; iteration-space
//! lists travel as flat `i64` coordinate streams.

use super::coordinate::Coordinate;
use super::domain::{DomainDescriptor, HaloGenerator};
use super::iteration::{IterationSpace, IterationSpacePair};
use super::pattern::{DomainId, ExtendedDomainId, Pattern};
use crate::halo_error::HaloExchangeError;
use crate::setup::SetupComm;
use crate::transport::communicator::{Rank, Tag};
use bytemuck::{Pod, Zeroable};
use hashbrown::hash_map::Entry;
use hashbrown::HashMap;
use std::collections::BTreeMap;

/// Extended domain id on the wire.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct WireDomainRecord {
    id_le: u64,
    rank_le: u32,
    address_le: u32,
    tag_le: u32,
    _pad: u32,
}

const _: () = {
    assert!(std::mem::size_of::<WireDomainRecord>() == 24);
    assert!(std::mem::align_of::<WireDomainRecord>() == 8);
};

impl WireDomainRecord {
    fn encode(id: ExtendedDomainId) -> Self {
        Self {
            id_le: id.id.get().to_le(),
            rank_le: (id.rank as u32).to_le(),
            address_le: (id.address as u32).to_le(),
            tag_le: id.tag.to_le(),
            _pad: 0,
        }
    }

    fn decode(&self) -> ExtendedDomainId {
        ExtendedDomainId {
            id: DomainId::new(u64::from_le(self.id_le)),
            rank: u32::from_le(self.rank_le) as Rank,
            address: u32::from_le(self.address_le) as Rank,
            tag: u32::from_le(self.tag_le),
        }
    }
}

/// Flatten iteration-space pairs into an `i64` stream:
/// per pair, `local.first, local.last, global.first, global.last`.
fn encode_spaces<const D: usize>(spaces: &[IterationSpacePair<D>]) -> Vec<i64> {
    let mut out = Vec::with_capacity(spaces.len() * 4 * D);
    for sp in spaces {
        for c in [sp.local.first, sp.local.last, sp.global.first, sp.global.last] {
            out.extend_from_slice(&c.0);
        }
    }
    out
}

fn decode_spaces<const D: usize>(
    flat: &[i64],
    count: usize,
) -> Result<Vec<IterationSpacePair<D>>, HaloExchangeError> {
    let expected = count * 4 * D;
    if flat.len() != expected {
        return Err(HaloExchangeError::SizeMismatch {
            expected,
            got: flat.len(),
        });
    }
    let mut out = Vec::with_capacity(count);
    for k in 0..count {
        let base = k * 4 * D;
        let coord = |off: usize| {
            let mut c = [0i64; D];
            c.copy_from_slice(&flat[base + off * D..base + (off + 1) * D]);
            Coordinate::new(c)
        };
        out.push(IterationSpacePair::new(
            IterationSpace::new(coord(0), coord(1)),
            IterationSpace::new(coord(2), coord(3)),
        ));
    }
    Ok(out)
}

type PairMap<const D: usize> = BTreeMap<ExtendedDomainId, Vec<IterationSpacePair<D>>>;

/// Build the communication patterns for `domains`, collectively with every
/// other process on `setup`. `address` is this process's transport-layer
/// peer identity (the rank, for the built-in transports).
///
/// Returns one pattern per local subdomain, in input order, with both
/// receive and send halos populated and tags assigned.
pub fn make_patterns<S, H, const D: usize>(
    setup: &S,
    address: Rank,
    halo_gen: &H,
    domains: &[DomainDescriptor<D>],
) -> Result<Vec<Pattern<D>>, HaloExchangeError>
where
    S: SetupComm,
    H: HaloGenerator<D>,
{
    let my_rank = setup.rank();
    let world_size = setup.size();

    // local extraction: extents with local origin zero, generated recv
    // halos with empty regions dropped
    let mut patterns = Vec::with_capacity(domains.len());
    let mut generated = Vec::with_capacity(domains.len());
    for d in domains {
        let id = ExtendedDomainId {
            id: d.domain_id(),
            rank: my_rank,
            address,
            tag: 0,
        };
        let origin = d.first();
        let extents = IterationSpacePair::new(
            IterationSpace::new(origin - origin, d.last() - origin),
            IterationSpace::new(d.first(), d.last()),
        );
        patterns.push(Pattern::new(id, extents));
        let halos: Vec<IterationSpacePair<D>> = halo_gen
            .generate(d)
            .into_iter()
            .filter(|h| !h.local.is_empty())
            .collect();
        generated.push(halos);
    }

    // global discovery: per-rank domain counts, ids and extents
    let counts: Vec<usize> = setup
        .all_gather(domains.len() as u32)?
        .iter()
        .map(|&c| c as usize)
        .collect();
    let my_ids: Vec<WireDomainRecord> = patterns
        .iter()
        .map(|p| WireDomainRecord::encode(p.extended_domain_id()))
        .collect();
    let all_domain_ids: Vec<Vec<ExtendedDomainId>> = setup
        .all_gather_v(&my_ids, &counts)?
        .iter()
        .map(|v| v.iter().map(WireDomainRecord::decode).collect())
        .collect();
    let my_extents: Vec<IterationSpacePair<D>> =
        patterns.iter().map(|p| *p.extents()).collect();
    let extent_counts: Vec<usize> = counts.iter().map(|c| c * 4 * D).collect();
    let all_extents: Vec<Vec<IterationSpacePair<D>>> = setup
        .all_gather_v(&encode_spaces(&my_extents), &extent_counts)?
        .iter()
        .zip(&counts)
        .map(|(flat, &c)| decode_spaces(flat, c))
        .collect::<Result<_, _>>()?;

    // peer resolution: intersect every generated halo with every domain
    // extent, translating hits back into this pattern's local frame
    for (pattern, halos) in patterns.iter_mut().zip(&generated) {
        for halo in halos {
            for (ids_vec, extents_vec) in all_domain_ids.iter().zip(&all_extents) {
                for (peer_id, extent) in ids_vec.iter().zip(extents_vec) {
                    let left = halo.global.first.cwise_max(extent.global.first);
                    let right = halo.global.last.cwise_min(extent.global.last);
                    if left.le_all(right) {
                        let left_local = halo.local.first + (left - halo.global.first);
                        let right_local = halo.local.first + (right - halo.global.first);
                        pattern
                            .recv_halos_mut()
                            .entry(*peer_id)
                            .or_default()
                            .push(IterationSpacePair::new(
                                IterationSpace::new(left_local, right_local),
                                IterationSpace::new(left, right),
                            ));
                    }
                }
            }
        }
    }

    // tag assignment: one counter per peer rank across all local patterns,
    // walked in (peer rank, domain id) order so every rank derives the
    // same sequence
    let mut tag_map: HashMap<Rank, Tag> = HashMap::new();
    for p in patterns.iter_mut() {
        let old = std::mem::take(p.recv_halos_mut());
        let mut entries: Vec<_> = old.into_iter().collect();
        entries.sort_by_key(|(k, _)| (k.rank, k.id));
        for (mut key, spaces) in entries {
            key.tag = match tag_map.entry(key.rank) {
                Entry::Occupied(mut e) => {
                    *e.get_mut() += 1;
                    *e.get()
                }
                Entry::Vacant(e) => *e.insert(0),
            };
            p.recv_halos_mut().insert(key, spaces);
        }
    }

    // translate receive plans into send plans for the peers, recasting the
    // local boxes into each receiving peer's own frame
    let mut send_map: BTreeMap<Rank, BTreeMap<DomainId, PairMap<D>>> = BTreeMap::new();
    for p in &patterns {
        for (peer, spaces) in p.recv_halos() {
            let mut owner = p.extended_domain_id();
            owner.tag = peer.tag;
            let ids_vec = &all_domain_ids[peer.rank];
            let pos = ids_vec
                .iter()
                .position(|d| d.id == peer.id)
                .ok_or(HaloExchangeError::UnknownDomain(peer.id.get()))?;
            let ext = all_extents[peer.rank][pos];
            let slot = send_map
                .entry(peer.rank)
                .or_default()
                .entry(peer.id)
                .or_default()
                .entry(owner)
                .or_default();
            let start = slot.len();
            slot.extend(spaces.iter().copied());
            for sp in &mut slot[start..] {
                sp.local.first = ext.local.first + (sp.global.first - ext.global.first);
                sp.local.last = ext.local.first + (sp.global.last - ext.global.first);
            }
        }
    }

    // self-loops merge directly, no message
    if let Some(mine) = send_map.remove(&my_rank) {
        for (dom_id, owners) in mine {
            let p = patterns
                .iter_mut()
                .find(|p| p.domain_id() == dom_id)
                .ok_or(HaloExchangeError::UnknownDomain(dom_id.get()))?;
            for (owner, spaces) in owners {
                p.send_halos_mut().entry(owner).or_default().extend(spaces);
            }
        }
    }

    // send-halo exchange: each rank in turn broadcasts which peers it
    // feeds, then ships each peer its share point-to-point
    for root in 0..world_size {
        if root == my_rank {
            let mut nbuf = [send_map.len() as u32];
            setup.broadcast(&mut nbuf, root)?;
            if !send_map.is_empty() {
                let mut ranks: Vec<u32> = send_map.keys().map(|&r| r as u32).collect();
                setup.broadcast(&mut ranks, root)?;
                for (&peer, doms) in &send_map {
                    setup.send_slice(peer, &[doms.len() as u32])?;
                }
                for (&peer, doms) in &send_map {
                    let dom_ids: Vec<u64> = doms.keys().map(|d| d.get()).collect();
                    setup.send_slice(peer, &dom_ids)?;
                    let num_pairs: Vec<u32> =
                        doms.values().map(|m| m.len() as u32).collect();
                    setup.send_slice(peer, &num_pairs)?;
                    for owners in doms.values() {
                        let records: Vec<WireDomainRecord> = owners
                            .keys()
                            .map(|k| WireDomainRecord::encode(*k))
                            .collect();
                        setup.send_slice(peer, &records)?;
                        for spaces in owners.values() {
                            setup.send_slice(peer, &[spaces.len() as u32])?;
                            setup.send_slice(peer, &encode_spaces(spaces))?;
                        }
                    }
                }
            }
        } else {
            let mut nbuf = [0u32];
            setup.broadcast(&mut nbuf, root)?;
            let num_ranks = nbuf[0] as usize;
            if num_ranks > 0 {
                let mut ranks = vec![0u32; num_ranks];
                setup.broadcast(&mut ranks, root)?;
                if ranks.iter().any(|&r| r as usize == my_rank) {
                    let num_domains = setup.recv_vec::<u32>(root, 1)?[0] as usize;
                    let dom_ids = setup.recv_vec::<u64>(root, num_domains)?;
                    let num_pairs = setup.recv_vec::<u32>(root, num_domains)?;
                    for (j, &np) in num_pairs.iter().enumerate() {
                        let records =
                            setup.recv_vec::<WireDomainRecord>(root, np as usize)?;
                        let dom_id = DomainId::new(dom_ids[j]);
                        let pat_idx = patterns
                            .iter()
                            .position(|p| p.domain_id() == dom_id)
                            .ok_or(HaloExchangeError::UnknownDomain(dom_id.get()))?;
                        for w in records {
                            let n_is = setup.recv_vec::<u32>(root, 1)?[0] as usize;
                            let flat = setup.recv_vec::<i64>(root, n_is * 4 * D)?;
                            let spaces = decode_spaces::<D>(&flat, n_is)?;
                            patterns[pat_idx]
                                .send_halos_mut()
                                .entry(w.decode())
                                .or_default()
                                .extend(spaces);
                        }
                    }
                }
            }
        }
    }

    Ok(patterns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::ThreadSetupComm;
    use crate::transport::thread::ThreadContext;

    fn pair_1d(
        local: (i64, i64),
        global: (i64, i64),
    ) -> IterationSpacePair<1> {
        IterationSpacePair::new(
            IterationSpace::new(Coordinate::new([local.0]), Coordinate::new([local.1])),
            IterationSpace::new(Coordinate::new([global.0]), Coordinate::new([global.1])),
        )
    }

    /// One cell of halo on each side of a 1-D domain.
    fn unit_halo_gen(d: &DomainDescriptor<1>) -> Vec<IterationSpacePair<1>> {
        let extent = d.last()[0] - d.first()[0] + 1;
        vec![
            pair_1d((-1, -1), (d.first()[0] - 1, d.first()[0] - 1)),
            pair_1d((extent, extent), (d.last()[0] + 1, d.last()[0] + 1)),
        ]
    }

    #[test]
    fn wire_record_round_trip() {
        let id = ExtendedDomainId {
            id: DomainId::new(17),
            rank: 3,
            address: 3,
            tag: 2,
        };
        assert_eq!(WireDomainRecord::encode(id).decode(), id);
    }

    #[test]
    fn spaces_round_trip() {
        let spaces = vec![pair_1d((-1, -1), (9, 9)), pair_1d((10, 10), (20, 20))];
        let flat = encode_spaces(&spaces);
        assert_eq!(flat.len(), 8);
        assert_eq!(decode_spaces::<1>(&flat, 2).unwrap(), spaces);
    }

    #[test]
    fn spaces_decode_rejects_bad_length() {
        assert!(decode_spaces::<1>(&[0; 7], 2).is_err());
    }

    #[test]
    fn two_domains_one_rank_are_symmetric() {
        let ctx = ThreadContext::new(1);
        let setup = ThreadSetupComm::new(ctx.communicator(0));
        let domains = [
            DomainDescriptor::new(DomainId::new(0), Coordinate::new([0]), Coordinate::new([9])),
            DomainDescriptor::new(
                DomainId::new(1),
                Coordinate::new([10]),
                Coordinate::new([19]),
            ),
        ];
        let patterns = make_patterns(&setup, 0, &unit_halo_gen, &domains).unwrap();
        assert_eq!(patterns.len(), 2);

        // each domain receives exactly its neighbor's boundary cell
        let p0 = &patterns[0];
        let p1 = &patterns[1];
        assert_eq!(p0.recv_halos().len(), 1);
        assert_eq!(p1.recv_halos().len(), 1);
        let (peer0, spaces0) = p0.recv_halos().iter().next().unwrap();
        assert_eq!(peer0.id, DomainId::new(1));
        assert_eq!(spaces0, &vec![pair_1d((10, 10), (10, 10))]);
        let (peer1, spaces1) = p1.recv_halos().iter().next().unwrap();
        assert_eq!(peer1.id, DomainId::new(0));
        assert_eq!(spaces1, &vec![pair_1d((-1, -1), (9, 9))]);

        // send plans mirror the neighbor's recv plans, tags included
        let (dst0, send0) = p0.send_halos().iter().next().unwrap();
        assert_eq!(dst0.id, DomainId::new(1));
        assert_eq!(dst0.tag, peer1.tag);
        assert_eq!(send0[0].global, spaces1[0].global);
        // boundary cell 9 in domain 0's own frame
        assert_eq!(send0, &vec![pair_1d((9, 9), (9, 9))]);
        let (dst1, send1) = p1.send_halos().iter().next().unwrap();
        assert_eq!(dst1.id, DomainId::new(0));
        assert_eq!(dst1.tag, peer0.tag);
        assert_eq!(send1, &vec![pair_1d((0, 0), (10, 10))]);
    }

    #[test]
    fn tags_distinguish_same_rank_peers() {
        // three adjacent domains on one rank: the middle one receives from
        // both neighbors, which share the peer rank, so tags must differ
        let ctx = ThreadContext::new(1);
        let setup = ThreadSetupComm::new(ctx.communicator(0));
        let domains = [
            DomainDescriptor::new(DomainId::new(0), Coordinate::new([0]), Coordinate::new([4])),
            DomainDescriptor::new(DomainId::new(1), Coordinate::new([5]), Coordinate::new([9])),
            DomainDescriptor::new(
                DomainId::new(2),
                Coordinate::new([10]),
                Coordinate::new([14]),
            ),
        ];
        let patterns = make_patterns(&setup, 0, &unit_halo_gen, &domains).unwrap();
        let p1 = &patterns[1];
        assert_eq!(p1.recv_halos().len(), 2);
        let tags: Vec<Tag> = p1.recv_halos().keys().map(|k| k.tag).collect();
        assert_ne!(tags[0], tags[1]);
        // every recv entry has a matching send entry on the peer pattern
        for (peer, spaces) in p1.recv_halos() {
            let sender = patterns
                .iter()
                .find(|p| p.domain_id() == peer.id)
                .expect("peer pattern");
            let (key, sent) = sender
                .send_halos()
                .iter()
                .find(|(k, _)| k.id == p1.domain_id() && k.tag == peer.tag)
                .expect("matching send entry");
            assert_eq!(key.rank, 0);
            let sent_globals: Vec<_> = sent.iter().map(|s| s.global).collect();
            let recv_globals: Vec<_> = spaces.iter().map(|s| s.global).collect();
            assert_eq!(sent_globals, recv_globals);
        }
    }
}
