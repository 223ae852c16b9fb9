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

//! Host database collaborators consumed by the contractor: name
//! resolution, address range computation and the initial scan signal.

use std::sync::Arc;

use log::info;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{contract::PublicKey, system::CondVar};

/// Address range computation
pub mod range;
pub use range::{AddressRange, RangeFilter};

/// Host name resolution
pub mod resolver;
pub use resolver::{resolve_host, DnsResolver, Resolver, ResolverPtr, StaticResolver};

/// A host announcement confirmed on chain
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct HostAnnouncement {
    pub host_key: PublicKey,
    pub net_address: Url,
}

impl HostAnnouncement {
    pub fn new(host_key: PublicKey, net_address: Url) -> Self {
        Self { host_key, net_address }
    }
}

/// Atomic pointer to the initial scan signal
pub type ScanStatusPtr = Arc<ScanStatus>;

/// Tells whether the host database finished its first full scan.
/// Moves from incomplete to complete exactly once.
#[derive(Default)]
pub struct ScanStatus {
    cv: CondVar,
}

impl ScanStatus {
    pub fn new() -> ScanStatusPtr {
        Arc::new(Self::default())
    }

    /// A signal that is already complete, for callers that never scan.
    pub fn completed() -> ScanStatusPtr {
        let status = Self::new();
        status.set_complete();
        status
    }

    pub fn is_complete(&self) -> bool {
        self.cv.is_awake()
    }

    /// Mark the initial scan as complete. Subsequent calls do nothing.
    pub fn set_complete(&self) {
        if !self.is_complete() {
            info!(target: "hostdb::set_complete()", "Initial host scan complete");
        }
        self.cv.notify();
    }

    /// Wait until the initial scan completes.
    pub async fn wait(&self) {
        self.cv.wait().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_status_is_one_shot() {
        smol::block_on(async {
            let status = ScanStatus::new();
            assert!(!status.is_complete());

            let waiter = {
                let status = status.clone();
                smol::spawn(async move { status.wait().await })
            };

            status.set_complete();
            status.set_complete();
            waiter.await;
            assert!(status.is_complete());
            assert!(ScanStatus::completed().is_complete());
        });
    }
}
