/* This file is part of DarkFi (https://dark.fi)
 *
 * Copyright (C) 2020-2026 Dyne.org foundation
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Address range diversity policy.
//!
//! Everything here is a pure function of its inputs and the supplied
//! random source, so the policy can be tested without a contract set or
//! a resolver.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    net::IpAddr,
};

use rand::{seq::SliceRandom, Rng};

use crate::{contract::ContractId, hostdb::AddressRange, hostdb::RangeFilter};

/// Active contracts whose hosts resolve into the same address range
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AddressGroup {
    pub range: AddressRange,
    pub members: Vec<ContractId>,
}

impl AddressGroup {
    /// More than one member means the range is used redundantly.
    pub fn is_violation(&self) -> bool {
        self.members.len() > 1
    }
}

/// Group contracts by the ranges their resolved addresses fall into. A
/// contract with addresses in several ranges is a member of each of them.
/// Contracts without addresses belong to no group.
pub fn group_by_address_range(
    resolved: &[(ContractId, Vec<IpAddr>)],
    filter: &RangeFilter,
) -> Vec<AddressGroup> {
    let mut groups: BTreeMap<AddressRange, Vec<ContractId>> = BTreeMap::new();

    for (id, addrs) in resolved {
        for addr in addrs {
            let members = groups.entry(filter.range_of(*addr)).or_default();
            if !members.contains(id) {
                members.push(*id);
            }
        }
    }

    groups.into_iter().map(|(range, members)| AddressGroup { range, members }).collect()
}

/// Pick the contracts to deactivate so that no range keeps more than one
/// active member.
///
/// Contracts are visited in random order. A contract whose ranges are all
/// unclaimed is kept and claims them. Any other contract shares a range
/// with a contract that stays, and is returned.
pub fn select_redundant<R: Rng + ?Sized>(groups: &[AddressGroup], rng: &mut R) -> Vec<ContractId> {
    let mut order: Vec<ContractId> = vec![];
    let mut ranges: HashMap<ContractId, Vec<AddressRange>> = HashMap::new();
    for group in groups {
        for id in &group.members {
            let entry = ranges.entry(*id).or_insert_with(|| {
                order.push(*id);
                vec![]
            });
            entry.push(group.range);
        }
    }
    order.shuffle(rng);

    let mut claimed: HashSet<AddressRange> = HashSet::new();
    let mut doomed = vec![];
    for id in order {
        let own = &ranges[&id];
        if own.iter().any(|r| claimed.contains(r)) {
            doomed.push(id);
            continue
        }
        claimed.extend(own.iter().copied());
    }

    doomed
}

/// Members of `groups` whose range contains any of `addrs`.
pub fn conflicting_members(
    addrs: &[IpAddr],
    groups: &[AddressGroup],
    filter: &RangeFilter,
) -> Vec<ContractId> {
    let ranges: HashSet<AddressRange> = addrs.iter().map(|a| filter.range_of(*a)).collect();

    let mut conflicts = vec![];
    for group in groups.iter().filter(|g| ranges.contains(&g.range)) {
        for id in &group.members {
            if !conflicts.contains(id) {
                conflicts.push(*id);
            }
        }
    }
    conflicts
}

/// Choose which of several equally eligible inactive contracts a new
/// contract replaces, uniformly at random.
pub fn choose_inactive<R: Rng + ?Sized>(
    candidates: &[ContractId],
    rng: &mut R,
) -> Option<ContractId> {
    candidates.choose(rng).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};
    use std::net::Ipv4Addr;

    fn id(n: u8) -> ContractId {
        ContractId([n; 32])
    }

    fn ip(a: u8, d: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(a, 0, 0, d))
    }

    #[test]
    fn distinct_ranges_are_kept() {
        let resolved =
            vec![(id(1), vec![ip(128, 1)]), (id(2), vec![ip(129, 1)]), (id(3), vec![ip(130, 1)])];
        let groups = group_by_address_range(&resolved, &RangeFilter::default());
        assert_eq!(groups.len(), 3);
        assert!(groups.iter().all(|g| !g.is_violation()));

        let mut rng = StdRng::seed_from_u64(0);
        assert!(select_redundant(&groups, &mut rng).is_empty());
    }

    #[test]
    fn redundant_pair_loses_one_member_at_random() {
        let resolved =
            vec![(id(1), vec![ip(129, 1)]), (id(3), vec![ip(130, 1)]), (id(4), vec![ip(130, 2)])];
        let groups = group_by_address_range(&resolved, &RangeFilter::default());

        let mut picked = HashSet::new();
        for seed in 0..64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let doomed = select_redundant(&groups, &mut rng);
            assert_eq!(doomed.len(), 1);
            assert!(doomed[0] == id(3) || doomed[0] == id(4));
            picked.insert(doomed[0]);
        }
        // Both members of the pair get picked over enough runs
        assert_eq!(picked.len(), 2);
    }

    #[test]
    fn overlapping_groups_keep_one_survivor_each() {
        // Contract 2 sits in both ranges. Whatever happens, each range
        // ends up with exactly one active member.
        let resolved = vec![
            (id(1), vec![ip(130, 1)]),
            (id(2), vec![ip(130, 2), ip(131, 1)]),
            (id(3), vec![ip(131, 2)]),
        ];
        let filter = RangeFilter::default();
        let groups = group_by_address_range(&resolved, &filter);

        for seed in 0..32 {
            let mut rng = StdRng::seed_from_u64(seed);
            let doomed = select_redundant(&groups, &mut rng);
            for group in &groups {
                let active = group.members.iter().filter(|id| !doomed.contains(*id)).count();
                assert_eq!(active, 1, "seed {} left {} active in {}", seed, active, group.range);
            }
            let unique: HashSet<_> = doomed.iter().collect();
            assert_eq!(unique.len(), doomed.len());
        }
    }

    #[test]
    fn survivor_of_one_range_is_not_dropped_for_another() {
        // 2 straddles both ranges. Dropping 2 settles both conflicts, so
        // 1 and 3 go together or not at all; never 1 alongside 2.
        let resolved = vec![
            (id(1), vec![ip(130, 1)]),
            (id(2), vec![ip(130, 2), ip(131, 1)]),
            (id(3), vec![ip(131, 2)]),
        ];
        let groups = group_by_address_range(&resolved, &RangeFilter::default());

        let mut outcomes = HashSet::new();
        for seed in 0..64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut doomed = select_redundant(&groups, &mut rng);
            doomed.sort();
            assert!(
                doomed == vec![id(2)] || doomed == vec![id(1), id(3)],
                "seed {} dropped {:?}",
                seed,
                doomed
            );
            outcomes.insert(doomed);
        }
        assert_eq!(outcomes.len(), 2);
    }

    #[test]
    fn unresolved_contracts_are_never_grouped() {
        let resolved = vec![(id(1), vec![]), (id(2), vec![]), (id(3), vec![ip(130, 1)])];
        let groups = group_by_address_range(&resolved, &RangeFilter::default());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members, vec![id(3)]);
    }

    #[test]
    fn conflicts_and_inactive_choice() {
        let filter = RangeFilter::default();
        let resolved = vec![(id(1), vec![ip(128, 1)]), (id(2), vec![ip(129, 1)])];
        let groups = group_by_address_range(&resolved, &filter);

        assert_eq!(conflicting_members(&[ip(128, 9)], &groups, &filter), vec![id(1)]);
        assert!(conflicting_members(&[ip(140, 1)], &groups, &filter).is_empty());

        let candidates = [id(5), id(6), id(7)];
        let mut picked = HashSet::new();
        for seed in 0..64 {
            let mut rng = StdRng::seed_from_u64(seed);
            picked.insert(choose_inactive(&candidates, &mut rng).unwrap());
        }
        assert_eq!(picked.len(), 3);

        let mut rng = StdRng::seed_from_u64(0);
        assert!(choose_inactive(&[], &mut rng).is_none());
    }
}
