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

use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
};

use crate::{Error, Result};

/// Default prefix length of an IPv4 address range
pub const DEFAULT_IPV4_FILTER_PREFIX: u8 = 24;
/// Default prefix length of an IPv6 address range
pub const DEFAULT_IPV6_FILTER_PREFIX: u8 = 54;

/// Subnet granularity used to decide whether two addresses share a range
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RangeFilter {
    pub ipv4_prefix: u8,
    pub ipv6_prefix: u8,
}

impl Default for RangeFilter {
    fn default() -> Self {
        Self { ipv4_prefix: DEFAULT_IPV4_FILTER_PREFIX, ipv6_prefix: DEFAULT_IPV6_FILTER_PREFIX }
    }
}

impl RangeFilter {
    pub fn new(ipv4_prefix: u8, ipv6_prefix: u8) -> Result<Self> {
        if ipv4_prefix > 32 {
            return Err(Error::ConfigInvalid(format!("IPv4 prefix /{} exceeds /32", ipv4_prefix)))
        }
        if ipv6_prefix > 128 {
            return Err(Error::ConfigInvalid(format!("IPv6 prefix /{} exceeds /128", ipv6_prefix)))
        }
        Ok(Self { ipv4_prefix, ipv6_prefix })
    }

    /// Range containing `addr`. IPv4-mapped IPv6 addresses are treated
    /// as IPv4.
    pub fn range_of(&self, addr: IpAddr) -> AddressRange {
        let addr = match addr {
            IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
                Some(v4) => IpAddr::V4(v4),
                None => IpAddr::V6(v6),
            },
            v4 => v4,
        };

        match addr {
            IpAddr::V4(v4) => {
                let prefix = self.ipv4_prefix.min(32);
                let mask = u32::MAX.checked_shl(32 - prefix as u32).unwrap_or(0);
                let network = Ipv4Addr::from(u32::from(v4) & mask);
                AddressRange { network: IpAddr::V4(network), prefix }
            }
            IpAddr::V6(v6) => {
                let prefix = self.ipv6_prefix.min(128);
                let mask = u128::MAX.checked_shl(128 - prefix as u32).unwrap_or(0);
                let network = Ipv6Addr::from(u128::from(v6) & mask);
                AddressRange { network: IpAddr::V6(network), prefix }
            }
        }
    }
}

/// A masked network address, e.g. `130.0.0.0/24`
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct AddressRange {
    network: IpAddr,
    prefix: u8,
}

impl AddressRange {
    pub fn network(&self) -> IpAddr {
        self.network
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v4(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(a, b, c, d))
    }

    #[test]
    fn default_granularity() {
        let filter = RangeFilter::default();
        assert_eq!(filter.range_of(v4(130, 0, 0, 1)), filter.range_of(v4(130, 0, 0, 2)));
        assert_ne!(filter.range_of(v4(128, 0, 0, 1)), filter.range_of(v4(129, 0, 0, 1)));
        assert_ne!(filter.range_of(v4(128, 0, 0, 1)), filter.range_of(v4(128, 1, 0, 1)));
        assert_eq!(filter.range_of(v4(130, 0, 0, 1)).to_string(), "130.0.0.0/24");
    }

    #[test]
    fn configurable_granularity() {
        let wide = RangeFilter::new(8, 32).unwrap();
        assert_eq!(wide.range_of(v4(128, 0, 0, 1)), wide.range_of(v4(128, 1, 0, 1)));

        let exact = RangeFilter::new(32, 128).unwrap();
        assert_ne!(exact.range_of(v4(130, 0, 0, 1)), exact.range_of(v4(130, 0, 0, 2)));

        let all = RangeFilter::new(0, 0).unwrap();
        assert_eq!(all.range_of(v4(1, 2, 3, 4)), all.range_of(v4(200, 2, 3, 4)));

        assert!(RangeFilter::new(33, 54).is_err());
        assert!(RangeFilter::new(24, 129).is_err());
    }

    #[test]
    fn ipv6_ranges() {
        let filter = RangeFilter::default();
        let a: IpAddr = "2001:db8:0:1::1".parse().unwrap();
        let b: IpAddr = "2001:db8:0:1::2".parse().unwrap();
        let c: IpAddr = "2001:db9::1".parse().unwrap();
        assert_eq!(filter.range_of(a), filter.range_of(b));
        assert_ne!(filter.range_of(a), filter.range_of(c));

        let mapped: IpAddr = "::ffff:130.0.0.7".parse().unwrap();
        assert_eq!(filter.range_of(mapped), filter.range_of(v4(130, 0, 0, 1)));
    }
}
