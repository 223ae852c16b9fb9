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

use std::{collections::HashMap, sync::Arc, time::Duration};

use log::{debug, trace};
use smol::lock::RwLock;

use super::{ContractHandle, ContractHeader, ContractId, SafeContractPtr};
use crate::{system::timeout, Error, Result};

/// Atomic pointer to a contract set
pub type ContractSetPtr = Arc<ContractSet>;

/// Registry of active contracts.
///
/// Two lock levels are used. `contracts` guards only the shape of the
/// map and is never held while waiting on a contract's exclusive lock,
/// so a long-held contract never blocks other contracts, membership
/// queries or snapshots.
#[derive(Default)]
pub struct ContractSet {
    contracts: RwLock<HashMap<ContractId, SafeContractPtr>>,
}

impl ContractSet {
    pub fn new() -> ContractSetPtr {
        Arc::new(Self::default())
    }

    /// Create a set from already loaded contracts. Later duplicates of the
    /// same id are rejected.
    pub async fn from_contracts(contracts: Vec<SafeContractPtr>) -> Result<ContractSetPtr> {
        let set = Self::new();
        for contract in contracts {
            set.insert(contract).await?;
        }
        Ok(set)
    }

    async fn lookup(&self, id: &ContractId) -> Option<SafeContractPtr> {
        self.contracts.read().await.get(id).cloned()
    }

    /// Obtain exclusive access to the contract with the given id.
    ///
    /// Returns `None` immediately if the id is not a member. Otherwise
    /// waits until no other caller holds the contract. If the contract
    /// was deleted while we were waiting, `None` is returned as well.
    pub async fn acquire(&self, id: &ContractId) -> Option<ContractHandle> {
        let mut contract = self.lookup(id).await?;

        loop {
            let handle = contract.lock().await;

            // Membership may have changed while we waited on the contract lock.
            match self.lookup(id).await {
                Some(current) if handle.is(&current) => {
                    trace!(target: "contract::set::acquire()", "Acquired contract {}", id);
                    return Some(handle)
                }
                Some(current) => {
                    // A different object was inserted under this id.
                    drop(handle);
                    contract = current;
                }
                None => {
                    debug!(
                        target: "contract::set::acquire()",
                        "Contract {} was removed while waiting for it", id,
                    );
                    return None
                }
            }
        }
    }

    /// [`ContractSet::acquire`] bounded by `dur`. Fails with
    /// [`Error::AcquireTimeout`] if the contract is still held by then,
    /// in which case nothing was taken.
    pub async fn acquire_timeout(
        &self,
        id: &ContractId,
        dur: Duration,
    ) -> Result<Option<ContractHandle>> {
        timeout(dur, self.acquire(id)).await.map_err(|_| {
            debug!(
                target: "contract::set::acquire_timeout()",
                "Contract {} still held after {:?}", id, dur,
            );
            Error::AcquireTimeout(id.to_string())
        })
    }

    /// Release a contract obtained with [`ContractSet::acquire`].
    pub fn release(&self, handle: ContractHandle) {
        trace!(target: "contract::set::release()", "Released contract {}", handle.id());
        drop(handle);
    }

    /// Remove the contract held by `handle` from the set and hand the object
    /// back to the caller. The exclusive lock stays with the handle.
    ///
    /// Deleting a contract that is no longer a member is a no-op reported as
    /// [`Error::ContractNotFound`].
    pub async fn delete(&self, handle: &ContractHandle) -> Result<SafeContractPtr> {
        let id = handle.id();
        let mut contracts = self.contracts.write().await;

        match contracts.get(&id) {
            Some(current) if handle.is(current) => {}
            _ => return Err(Error::ContractNotFound(id.to_string())),
        }

        debug!(target: "contract::set::delete()", "Deleting contract {}", id);
        contracts.remove(&id).ok_or_else(|| Error::ContractNotFound(id.to_string()))
    }

    /// Add a new or previously deleted contract.
    pub async fn insert(&self, contract: SafeContractPtr) -> Result<()> {
        let id = contract.id();
        let mut contracts = self.contracts.write().await;
        if contracts.contains_key(&id) {
            return Err(Error::DuplicateContractId(id.to_string()))
        }

        debug!(target: "contract::set::insert()", "Inserting contract {}", id);
        contracts.insert(id, contract);
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.contracts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.contracts.read().await.is_empty()
    }

    pub async fn contains(&self, id: &ContractId) -> bool {
        self.contracts.read().await.contains_key(id)
    }

    /// Identifiers of all current members.
    pub async fn ids(&self) -> Vec<ContractId> {
        self.contracts.read().await.keys().copied().collect()
    }

    /// Snapshot of a single member, without taking its exclusive lock.
    pub async fn view(&self, id: &ContractId) -> Option<ContractHeader> {
        let contract = self.lookup(id).await?;
        Some(contract.snapshot().await)
    }

    /// Snapshots of all current members. Each snapshot is atomic, but they
    /// may be taken at slightly different instants.
    pub async fn view_all(&self) -> Vec<ContractHeader> {
        let contracts: Vec<SafeContractPtr> =
            self.contracts.read().await.values().cloned().collect();

        let mut headers = Vec::with_capacity(contracts.len());
        for contract in contracts {
            headers.push(contract.snapshot().await);
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{tests::header, SafeContract};

    #[test]
    fn acquire_missing_returns_none() {
        smol::block_on(async {
            let set = ContractSet::new();
            assert!(set.acquire(&ContractId([1; 32])).await.is_none());
            assert!(set.view(&ContractId([1; 32])).await.is_none());
            assert!(set.is_empty().await);
        });
    }

    #[test]
    fn insert_rejects_duplicates() {
        smol::block_on(async {
            let set = ContractSet::new();
            set.insert(SafeContract::new(header(1, "tcp://host1.com:1"))).await.unwrap();
            let err = set.insert(SafeContract::new(header(1, "tcp://host1.com:1"))).await;
            assert!(matches!(err, Err(Error::DuplicateContractId(_))));
            assert_eq!(set.len().await, 1);

            let dup = vec![
                SafeContract::new(header(2, "tcp://host2.com:1")),
                SafeContract::new(header(2, "tcp://host2.com:1")),
            ];
            assert!(ContractSet::from_contracts(dup).await.is_err());
        });
    }

    #[test]
    fn delete_is_idempotent() {
        smol::block_on(async {
            let set = ContractSet::new();
            set.insert(SafeContract::new(header(1, "tcp://host1.com:1"))).await.unwrap();

            let handle = set.acquire(&ContractId([1; 32])).await.unwrap();
            let removed = set.delete(&handle).await.unwrap();
            assert_eq!(removed.id(), ContractId([1; 32]));
            assert!(!set.contains(&ContractId([1; 32])).await);

            let err = set.delete(&handle).await.unwrap_err();
            assert!(matches!(err, Error::ContractNotFound(_)));
            assert!(set.is_empty().await);
            set.release(handle);
        });
    }

    #[test]
    fn delete_does_not_remove_replacement() {
        smol::block_on(async {
            let set = ContractSet::new();
            set.insert(SafeContract::new(header(1, "tcp://host1.com:1"))).await.unwrap();

            let stale = set.acquire(&ContractId([1; 32])).await.unwrap();
            set.delete(&stale).await.unwrap();

            // A fresh object under the same id must survive a delete through
            // the stale handle.
            set.insert(SafeContract::new(header(1, "tcp://host1.com:2"))).await.unwrap();
            assert!(set.delete(&stale).await.is_err());
            drop(stale);

            let fresh = set.acquire(&ContractId([1; 32])).await.unwrap();
            assert_eq!(fresh.header().await.net_address.port(), Some(2));
        });
    }

    #[test]
    fn acquire_timeout_reports_held_contract() {
        smol::block_on(async {
            let set = ContractSet::new();
            set.insert(SafeContract::new(header(1, "tcp://host1.com:1"))).await.unwrap();
            let id = ContractId([1; 32]);
            let dur = Duration::from_millis(20);

            let held = set.acquire_timeout(&id, dur).await.unwrap().unwrap();
            let err = set.acquire_timeout(&id, dur).await.unwrap_err();
            assert!(matches!(err, Error::AcquireTimeout(_)));
            set.release(held);

            assert!(set.acquire_timeout(&id, dur).await.unwrap().is_some());
            assert!(set.acquire_timeout(&ContractId([2; 32]), dur).await.unwrap().is_none());
        });
    }
}
