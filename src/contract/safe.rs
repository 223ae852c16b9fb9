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

use std::{fmt, sync::Arc};

use log::trace;
use smol::lock::{Mutex, MutexGuardArc, RwLock};
use url::Url;

use super::{ContractHeader, ContractId, Revision};
use crate::Result;

/// Atomic pointer to a safe contract
pub type SafeContractPtr = Arc<SafeContract>;

/// A single contract protected by its own exclusive lock.
///
/// The exclusive lock serializes revisions. The header itself sits behind
/// a short-lived read/write lock so snapshots never wait for a holder of
/// the exclusive lock, and never observe a half-applied mutation.
pub struct SafeContract {
    id: ContractId,
    header: RwLock<ContractHeader>,
    mu: Arc<Mutex<()>>,
}

impl SafeContract {
    pub fn new(header: ContractHeader) -> SafeContractPtr {
        Arc::new(Self { id: header.id(), header: RwLock::new(header), mu: Arc::new(Mutex::new(())) })
    }

    pub fn id(&self) -> ContractId {
        self.id
    }

    /// Return a copy of the current header.
    pub async fn snapshot(&self) -> ContractHeader {
        self.header.read().await.clone()
    }

    /// Wait for the exclusive lock of this contract.
    pub(super) async fn lock(self: &Arc<Self>) -> ContractHandle {
        trace!(target: "contract::safe::lock()", "Waiting for contract {}", self.id);
        let guard = self.mu.lock_arc().await;
        ContractHandle { contract: self.clone(), _guard: guard }
    }
}

impl fmt::Debug for SafeContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SafeContract").field("id", &self.id).finish()
    }
}

/// Exclusive access to a contract, obtained through
/// [`ContractSet::acquire`](super::ContractSet::acquire).
///
/// The lock is released when the handle is passed to
/// [`ContractSet::release`](super::ContractSet::release) or dropped.
pub struct ContractHandle {
    contract: SafeContractPtr,
    _guard: MutexGuardArc<()>,
}

impl ContractHandle {
    pub fn id(&self) -> ContractId {
        self.contract.id
    }

    /// The underlying contract object. Holding this pointer does not
    /// hold the exclusive lock.
    pub fn contract(&self) -> SafeContractPtr {
        self.contract.clone()
    }

    pub async fn header(&self) -> ContractHeader {
        self.contract.snapshot().await
    }

    /// Replace the latest revision with `revision`.
    ///
    /// Fails with [`Error::InvalidRevision`](crate::Error::InvalidRevision)
    /// when the revision number does not increase or the revision belongs
    /// to another contract. The header is untouched on failure.
    pub async fn apply_revision(&self, revision: Revision) -> Result<()> {
        let mut header = self.contract.header.write().await;
        header.validate_revision(&revision)?;
        trace!(
            target: "contract::safe::apply_revision()",
            "Contract {} revision {} -> {}",
            self.contract.id, header.last_revision().revision_number, revision.revision_number,
        );
        header.set_last_revision(revision);
        Ok(())
    }

    /// Record a new announced address for the contract's host.
    pub async fn update_net_address(&self, net_address: Url) {
        self.contract.header.write().await.net_address = net_address;
    }

    pub(super) fn is(&self, other: &SafeContractPtr) -> bool {
        Arc::ptr_eq(&self.contract, other)
    }
}

impl fmt::Debug for ContractHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContractHandle").field("id", &self.contract.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{contract::tests::header, Error};

    #[test]
    fn revision_applies_under_lock() {
        smol::block_on(async {
            let contract = SafeContract::new(header(1, "tcp://host1.com:9982"));
            let handle = contract.lock().await;

            let mut rev = handle.header().await.last_revision().clone();
            rev.revision_number = 5;
            rev.file_size = 4096;
            handle.apply_revision(rev.clone()).await.unwrap();

            // Same number again is rejected and leaves the header alone
            rev.file_size = 1;
            let err = handle.apply_revision(rev).await.unwrap_err();
            assert!(matches!(err, Error::InvalidRevision(_)));

            let snap = contract.snapshot().await;
            assert_eq!(snap.last_revision().revision_number, 5);
            assert_eq!(snap.last_revision().file_size, 4096);
        });
    }

    #[test]
    fn snapshot_does_not_wait_for_holder() {
        smol::block_on(async {
            let contract = SafeContract::new(header(2, "tcp://host2.com:9982"));
            let handle = contract.lock().await;
            handle.update_net_address(Url::parse("tcp://host4.com:9982").unwrap()).await;

            // Handle still held, snapshot must complete
            let snap = contract.snapshot().await;
            assert_eq!(snap.host(), Some("host4.com"));
            assert_eq!(handle.id(), snap.id());
            drop(handle);

            assert!(contract.mu.try_lock().is_some());
        });
    }
}
