use std::collections::BTreeSet;

use basalt_core::PortPair;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("no free port pair left in range")]
pub struct PortsExhausted;

/// Picks a free (game, rcon) pair from `[min_port, max_port)`.
///
/// Candidates are `(p, p + span/2)` for every p in the range; the symmetric
/// difference against the used set drops fully-assigned pairs. A candidate
/// surviving the set arithmetic can still share one half with an assigned
/// pair when the used set is internally inconsistent, so both ports are also
/// checked individually against the flattened used ports before returning.
/// Selection is the lowest free game port.
pub fn allocate_pair(
    min_port: u16,
    max_port: u16,
    used: &[PortPair],
) -> Result<PortPair, PortsExhausted> {
    let span = u32::from(max_port).saturating_sub(u32::from(min_port));
    let half = span / 2;

    let used_pairs: BTreeSet<PortPair> = used.iter().copied().collect();
    let used_ports: BTreeSet<u16> = used.iter().flat_map(|&(g, r)| [g, r]).collect();

    let candidates: BTreeSet<PortPair> = (u32::from(min_port)..u32::from(max_port))
        .filter_map(|p| {
            let rcon = p + half;
            if rcon > u32::from(u16::MAX) {
                return None;
            }
            Some((p as u16, rcon as u16))
        })
        .collect();

    candidates
        .symmetric_difference(&used_pairs)
        .find(|pair| {
            !used_pairs.contains(pair)
                && !used_ports.contains(&pair.0)
                && !used_ports.contains(&pair.1)
        })
        .copied()
        .ok_or(PortsExhausted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_lowest_free_pair() {
        let pair = allocate_pair(25565, 25575, &[]).unwrap();
        assert_eq!(pair, (25565, 25570));
    }

    #[test]
    fn skips_used_pairs() {
        let used = vec![(25565, 25570), (25566, 25571)];
        let pair = allocate_pair(25565, 25575, &used).unwrap();
        assert_eq!(pair, (25567, 25572));
    }

    #[test]
    fn rcon_offset_is_half_span() {
        let (game, rcon) = allocate_pair(30000, 30100, &[]).unwrap();
        assert_eq!(rcon, game + 50);
    }

    #[test]
    fn rejects_candidate_with_colliding_half() {
        // An inconsistent used set: (25566, 25570) blocks the rcon half of
        // the 25565 candidate and the game half of the 25566 candidate.
        let used = vec![(25566, 25570)];
        let (game, rcon) = allocate_pair(25565, 25575, &used).unwrap();
        assert_eq!((game, rcon), (25567, 25572));
        assert!(!used.iter().any(|&(g, r)| g == game || r == game || g == rcon || r == rcon));
    }

    #[test]
    fn exhausted_range_fails() {
        let used: Vec<_> = (25565u16..25575).map(|p| (p, p + 5)).collect();
        assert_eq!(allocate_pair(25565, 25575, &used), Err(PortsExhausted));
    }

    #[test]
    fn empty_range_fails() {
        assert_eq!(allocate_pair(25565, 25565, &[]), Err(PortsExhausted));
    }
}
