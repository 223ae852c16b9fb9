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

use std::{sync::Arc, time::Duration};

use structopt::StructOpt;

use crate::{
    hostdb::range::{RangeFilter, DEFAULT_IPV4_FILTER_PREFIX, DEFAULT_IPV6_FILTER_PREFIX},
    Result,
};

/// Atomic pointer to contractor settings
pub type SettingsPtr = Arc<Settings>;

/// Contractor settings. The scope of this is a single renter instance
/// configured by the library user.
#[derive(Debug, Clone)]
pub struct Settings {
    /// IPv4 prefix length used to group hosts into address ranges
    pub ipv4_filter_prefix: u8,
    /// IPv6 prefix length used to group hosts into address ranges
    pub ipv6_filter_prefix: u8,
    /// Interval of the periodic pruning pass (in seconds), 0 to only prune
    /// on new blocks
    pub prune_interval: u64,
    /// How long the contractor waits for a held contract (in milliseconds)
    pub acquire_timeout: u64,
    /// Skip pruning and refuse new contracts until the host database
    /// finished its initial scan
    pub wait_initial_scan: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ipv4_filter_prefix: DEFAULT_IPV4_FILTER_PREFIX,
            ipv6_filter_prefix: DEFAULT_IPV6_FILTER_PREFIX,
            prune_interval: 0,
            acquire_timeout: 10_000,
            wait_initial_scan: true,
        }
    }
}

impl Settings {
    /// Subnet granularity, validated.
    pub fn range_filter(&self) -> Result<RangeFilter> {
        RangeFilter::new(self.ipv4_filter_prefix, self.ipv6_filter_prefix)
    }

    pub fn validate(&self) -> Result<()> {
        self.range_filter()?;
        Ok(())
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout)
    }
}

// The following is used so we can have contractor settings configurable
// from TOML files.

/// Defines the contractor settings.
#[derive(Clone, Debug, serde::Deserialize, structopt::StructOpt, structopt_toml::StructOptToml)]
#[structopt()]
pub struct SettingsOpt {
    /// IPv4 prefix length of a host address range
    #[structopt(long = "ipv4-filter-prefix")]
    pub ipv4_filter_prefix: Option<u8>,

    /// IPv6 prefix length of a host address range
    #[structopt(long = "ipv6-filter-prefix")]
    pub ipv6_filter_prefix: Option<u8>,

    /// Seconds between periodic pruning passes (0 disables the timer)
    #[structopt(long)]
    pub prune_interval: Option<u64>,

    /// Milliseconds to wait for a contract held by another task
    #[structopt(skip)]
    pub acquire_timeout: Option<u64>,

    /// Do not wait for the initial host scan before pruning
    #[serde(default)]
    #[structopt(long)]
    pub skip_initial_scan: bool,
}

impl From<SettingsOpt> for Settings {
    fn from(opt: SettingsOpt) -> Self {
        let def = Settings::default();

        Self {
            ipv4_filter_prefix: opt.ipv4_filter_prefix.unwrap_or(def.ipv4_filter_prefix),
            ipv6_filter_prefix: opt.ipv6_filter_prefix.unwrap_or(def.ipv6_filter_prefix),
            prune_interval: opt.prune_interval.unwrap_or(def.prune_interval),
            acquire_timeout: opt.acquire_timeout.unwrap_or(def.acquire_timeout),
            wait_initial_scan: !opt.skip_initial_scan,
        }
    }
}
