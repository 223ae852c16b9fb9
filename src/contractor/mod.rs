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

//! The contractor keeps the renter's contracts diverse.
//!
//! It owns the active [`ContractSet`] and a record of inactive contracts.
//! On every confirmed block it applies host re-announcements, archives
//! expired contracts and runs a pruning pass which deactivates contracts
//! whose hosts share an address range with another active contract.
//! Inactive contracts never become active again: diversity is restored by
//! forming new contracts through [`Contractor::form_contract`].

use std::{
    collections::{HashMap, HashSet},
    net::IpAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex as SyncMutex,
    },
};

use log::{debug, error, info, warn};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use smol::lock::{Mutex, RwLock};

use crate::{
    contract::{ContractHeader, ContractId, ContractSet, ContractSetPtr, SafeContract},
    hostdb::{resolve_host, HostAnnouncement, RangeFilter, ResolverPtr, ScanStatusPtr},
    system::{
        sleep, ExecutorPtr, StoppableTask, StoppableTaskPtr, Subscriber, SubscriberPtr, Subscription,
    },
    Error, Result,
};

/// Pure address range policy
pub mod redundancy;
use redundancy::{choose_inactive, conflicting_members, group_by_address_range, select_redundant};

/// Contractor configuration
pub mod settings;
pub use settings::{Settings, SettingsOpt, SettingsPtr};

/// Atomic pointer to the contractor
pub type ContractorPtr = Arc<Contractor>;

/// Why a contract left the active set
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum DeactivationReason {
    /// Explicit cancellation request
    Canceled,
    /// Host shared an address range with another active contract
    RedundantAddressRange,
    /// The proof window of the contract has been reached
    Expired,
}

/// A contract that is no longer active
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct InactiveContract {
    pub header: ContractHeader,
    pub reason: DeactivationReason,
    /// Block height at which the contract was deactivated
    pub height: u64,
    /// The contract formed to fill this one's slot
    pub replaced_by: Option<ContractId>,
}

impl InactiveContract {
    pub fn id(&self) -> ContractId {
        self.header.id()
    }
}

/// Notifications published by the contractor
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ContractEvent {
    Formed { id: ContractId, replaces: Option<ContractId> },
    Deactivated { id: ContractId, reason: DeactivationReason },
}

pub struct Contractor {
    /// Active contracts
    contracts: ContractSetPtr,
    /// Canceled, pruned and expired contracts
    inactive: RwLock<HashMap<ContractId, InactiveContract>>,
    resolver: ResolverPtr,
    scan: ScanStatusPtr,
    settings: SettingsPtr,
    filter: RangeFilter,
    rng: SyncMutex<Box<dyn RngCore + Send>>,
    /// Last confirmed block height
    height: AtomicU64,
    /// Serializes pruning passes and contract formation. Never held
    /// across name resolution.
    policy_lock: Mutex<()>,
    /// Periodic pruning task
    process: StoppableTaskPtr,
    event_subscriber: SubscriberPtr<ContractEvent>,
}

impl Contractor {
    pub fn new(
        settings: Settings,
        resolver: ResolverPtr,
        scan: ScanStatusPtr,
    ) -> Result<ContractorPtr> {
        Self::with_rng(settings, resolver, scan, Box::new(OsRng))
    }

    /// Create a contractor drawing its random choices from `rng`.
    pub fn with_rng(
        settings: Settings,
        resolver: ResolverPtr,
        scan: ScanStatusPtr,
        rng: Box<dyn RngCore + Send>,
    ) -> Result<ContractorPtr> {
        let filter = settings.range_filter()?;

        Ok(Arc::new(Self {
            contracts: ContractSet::new(),
            inactive: RwLock::new(HashMap::new()),
            resolver,
            scan,
            settings: Arc::new(settings),
            filter,
            rng: SyncMutex::new(rng),
            height: AtomicU64::new(0),
            policy_lock: Mutex::new(()),
            process: StoppableTask::new("contract pruning"),
            event_subscriber: Subscriber::new(),
        }))
    }

    pub fn contract_set(&self) -> ContractSetPtr {
        self.contracts.clone()
    }

    pub fn settings(&self) -> SettingsPtr {
        self.settings.clone()
    }

    pub fn height(&self) -> u64 {
        self.height.load(Ordering::SeqCst)
    }

    pub async fn subscribe(&self) -> Subscription<ContractEvent> {
        self.event_subscriber.clone().subscribe().await
    }

    fn with_rng_mut<T>(&self, f: impl FnOnce(&mut dyn RngCore) -> T) -> T {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut **rng)
    }

    /// Restore contracts from persisted state. No diversity check is done
    /// here; the next pruning pass takes care of conflicts.
    pub async fn load_contracts(
        &self,
        active: Vec<ContractHeader>,
        inactive: Vec<InactiveContract>,
    ) -> Result<()> {
        let mut record = self.inactive.write().await;
        for contract in inactive {
            record.insert(contract.id(), contract);
        }

        for header in active {
            let id = header.id();
            if record.contains_key(&id) {
                return Err(Error::ContractInactive(id.to_string()))
            }
            self.contracts.insert(SafeContract::new(header)).await?;
        }

        debug!(
            target: "contractor::load_contracts()",
            "Loaded {} active and {} inactive contracts",
            self.contracts.len().await, record.len(),
        );
        Ok(())
    }

    /// Snapshots of all active contracts, ordered by id.
    pub async fn active_contracts(&self) -> Vec<ContractHeader> {
        let mut headers = self.contracts.view_all().await;
        headers.sort_unstable_by_key(|h| h.id());
        headers
    }

    pub async fn active_ids(&self) -> Vec<ContractId> {
        let mut ids = self.contracts.ids().await;
        ids.sort_unstable();
        ids
    }

    /// All inactive contracts, oldest deactivation first.
    pub async fn inactive_contracts(&self) -> Vec<InactiveContract> {
        let mut contracts: Vec<InactiveContract> =
            self.inactive.read().await.values().cloned().collect();
        contracts.sort_unstable_by_key(|c| (c.height, c.id()));
        contracts
    }

    pub async fn inactive_contract(&self, id: &ContractId) -> Option<InactiveContract> {
        self.inactive.read().await.get(id).cloned()
    }

    /// Cancel an active contract on the user's request.
    pub async fn cancel_contract(&self, id: &ContractId) -> Result<()> {
        match self.deactivate(id, DeactivationReason::Canceled).await? {
            true => Ok(()),
            false => Err(Error::ContractNotFound(id.to_string())),
        }
    }

    /// Remove a contract from the active set and record it as inactive.
    /// Returns `false` if the contract was not active, which callers that
    /// retry treat as already handled.
    async fn deactivate(&self, id: &ContractId, reason: DeactivationReason) -> Result<bool> {
        let dur = self.settings.acquire_timeout();
        let Some(handle) = self.contracts.acquire_timeout(id, dur).await? else { return Ok(false) };

        // The record stays locked from the delete until the contract is
        // archived, so the id is always in exactly one of the two places.
        let mut inactive = self.inactive.write().await;
        let contract = match self.contracts.delete(&handle).await {
            Ok(contract) => contract,
            Err(e) => {
                drop(inactive);
                self.contracts.release(handle);
                return match e {
                    Error::ContractNotFound(_) => Ok(false),
                    e => Err(e),
                }
            }
        };

        let header = contract.snapshot().await;
        let height = self.height();
        inactive.insert(*id, InactiveContract { header, reason, height, replaced_by: None });
        drop(inactive);
        self.contracts.release(handle);

        info!(
            target: "contractor::deactivate()",
            "Contract {} deactivated at height {}: {:?}", id, height, reason,
        );
        self.event_subscriber.notify(ContractEvent::Deactivated { id: *id, reason }).await;
        Ok(true)
    }

    /// Resolve the hosts of the given contracts. Hosts which fail to resolve
    /// are left out for this pass.
    async fn resolve_contracts(&self, headers: &[ContractHeader]) -> Vec<(ContractId, Vec<IpAddr>)> {
        let mut resolved = Vec::with_capacity(headers.len());
        for header in headers {
            match resolve_host(self.resolver.as_ref(), &header.net_address).await {
                Ok(addrs) => resolved.push((header.id(), addrs)),
                Err(e) => {
                    warn!(
                        target: "contractor::resolve_contracts()",
                        "Skipping contract {} this pass: {}", header.id(), e,
                    );
                }
            }
        }
        resolved
    }

    /// Keep only entries which are still active.
    async fn retain_active(
        &self,
        resolved: Vec<(ContractId, Vec<IpAddr>)>,
    ) -> Vec<(ContractId, Vec<IpAddr>)> {
        let active: HashSet<ContractId> = self.contracts.ids().await.into_iter().collect();
        resolved.into_iter().filter(|(id, _)| active.contains(id)).collect()
    }

    fn initial_scan_pending(&self) -> bool {
        self.settings.wait_initial_scan && !self.scan.is_complete()
    }

    /// Deactivate contracts whose hosts share an address range with another
    /// active contract. Returns the ids deactivated by this pass.
    pub async fn prune_redundant_address_ranges(&self) -> Result<Vec<ContractId>> {
        if self.initial_scan_pending() {
            debug!(
                target: "contractor::prune_redundant_address_ranges()",
                "Initial host scan pending, skipping pass",
            );
            return Ok(vec![])
        }

        let headers = self.contracts.view_all().await;
        let resolved = self.resolve_contracts(&headers).await;

        let _policy = self.policy_lock.lock().await;
        // Contracts may have left the set while we were resolving.
        let resolved = self.retain_active(resolved).await;
        let groups = group_by_address_range(&resolved, &self.filter);
        let doomed = self.with_rng_mut(|rng| select_redundant(&groups, rng));

        let mut pruned = vec![];
        for id in doomed {
            match self.deactivate(&id, DeactivationReason::RedundantAddressRange).await {
                Ok(true) => pruned.push(id),
                Ok(false) => {
                    debug!(
                        target: "contractor::prune_redundant_address_ranges()",
                        "Contract {} already inactive", id,
                    );
                }
                Err(e) => {
                    warn!(
                        target: "contractor::prune_redundant_address_ranges()",
                        "Failed pruning contract {}, retrying next pass: {}", id, e,
                    );
                }
            }
        }

        if !pruned.is_empty() {
            info!(
                target: "contractor::prune_redundant_address_ranges()",
                "Pruned {} contracts with redundant address ranges", pruned.len(),
            );
        }
        Ok(pruned)
    }

    /// Add a newly formed contract to the active set.
    ///
    /// The host must not share an address range with any active contract.
    /// Conflicts with inactive contracts are fine. If inactive contracts
    /// are waiting for a replacement, one of them is picked at random and
    /// marked as replaced by the new contract; its id is returned.
    ///
    /// A pruning pass follows every formation, since hosts may have moved
    /// after they were resolved here.
    pub async fn form_contract(&self, header: ContractHeader) -> Result<Option<ContractId>> {
        if self.initial_scan_pending() {
            return Err(Error::InitialScanIncomplete)
        }

        let id = header.id();
        let net_address = header.net_address.clone();
        let candidate = resolve_host(self.resolver.as_ref(), &net_address).await?;
        let headers = self.contracts.view_all().await;
        let resolved = self.resolve_contracts(&headers).await;

        let replaces = {
            let _policy = self.policy_lock.lock().await;
            // Held until the insert, so a concurrent deactivation of this id
            // either lands before the check or fails on the duplicate.
            let mut inactive = self.inactive.write().await;
            if inactive.contains_key(&id) {
                return Err(Error::ContractInactive(id.to_string()))
            }

            let resolved = self.retain_active(resolved).await;
            let groups = group_by_address_range(&resolved, &self.filter);
            if let Some(other) = conflicting_members(&candidate, &groups, &self.filter).first() {
                return Err(Error::RedundantAddressRange(format!(
                    "{} conflicts with contract {}",
                    net_address, other
                )))
            }

            self.contracts.insert(SafeContract::new(header)).await?;

            let mut eligible: Vec<ContractId> =
                inactive.values().filter(|c| c.replaced_by.is_none()).map(|c| c.id()).collect();
            eligible.sort_unstable();

            let replaces = self.with_rng_mut(|rng| choose_inactive(&eligible, rng));
            if let Some(old) = replaces.and_then(|old| inactive.get_mut(&old)) {
                old.replaced_by = Some(id);
            }
            replaces
        };

        info!(
            target: "contractor::form_contract()",
            "Formed contract {} with {}", id, net_address,
        );
        self.event_subscriber.notify(ContractEvent::Formed { id, replaces }).await;

        if let Err(e) = self.prune_redundant_address_ranges().await {
            warn!(target: "contractor::form_contract()", "Pruning after formation failed: {}", e);
        }
        Ok(replaces)
    }

    /// Update the address of active contracts whose host re-announced.
    /// Returns the number of contracts updated.
    pub async fn apply_announcements(&self, announcements: &[HostAnnouncement]) -> usize {
        if announcements.is_empty() {
            return 0
        }

        let mut updated = 0;
        for header in self.contracts.view_all().await {
            let Some(host_key) = header.host_key() else { continue };
            // The last announcement of a host wins.
            let Some(ann) = announcements.iter().rev().find(|a| &a.host_key == host_key) else {
                continue
            };
            if ann.net_address == header.net_address {
                continue
            }

            let id = header.id();
            match self.contracts.acquire_timeout(&id, self.settings.acquire_timeout()).await {
                Ok(Some(handle)) => {
                    handle.update_net_address(ann.net_address.clone()).await;
                    self.contracts.release(handle);
                    debug!(
                        target: "contractor::apply_announcements()",
                        "Contract {} host moved {} -> {}", id, header.net_address, ann.net_address,
                    );
                    updated += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        target: "contractor::apply_announcements()",
                        "Skipping announcement for contract {} until next block: {}", id, e,
                    );
                }
            }
        }
        updated
    }

    /// Deactivate contracts whose proof window opened before `height`.
    pub async fn archive_expired(&self, height: u64) -> Vec<ContractId> {
        let mut archived = vec![];
        for header in self.contracts.view_all().await {
            if header.end_height() >= height {
                continue
            }

            let id = header.id();
            match self.deactivate(&id, DeactivationReason::Expired).await {
                Ok(true) => archived.push(id),
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        target: "contractor::archive_expired()",
                        "Failed archiving contract {}: {}", id, e,
                    );
                }
            }
        }
        archived
    }

    /// Handle a newly confirmed block. Safe to call repeatedly with the
    /// same height.
    pub async fn process_block(
        &self,
        height: u64,
        announcements: &[HostAnnouncement],
    ) -> Result<()> {
        debug!(target: "contractor::process_block()", "Processing block {}", height);
        self.height.fetch_max(height, Ordering::SeqCst);

        self.apply_announcements(announcements).await;
        self.archive_expired(height).await;
        self.prune_redundant_address_ranges().await?;
        Ok(())
    }

    /// Start the periodic pruning pass, if an interval is configured.
    pub fn start(self: Arc<Self>, executor: ExecutorPtr) {
        if self.settings.prune_interval == 0 {
            debug!(target: "contractor::start()", "Periodic pruning disabled");
            return
        }

        let process = self.process.clone();
        process.start(
            self.prune_loop(),
            |res| async move {
                match res {
                    Ok(()) | Err(Error::ServiceStopped) => {}
                    Err(e) => error!(target: "contractor::start()", "Pruning task failed: {}", e),
                }
            },
            executor,
        );
    }

    pub async fn stop(&self) {
        self.process.stop().await
    }

    async fn prune_loop(self: Arc<Self>) -> Result<()> {
        if self.settings.wait_initial_scan {
            self.scan.wait().await;
        }

        loop {
            if let Err(e) = self.prune_redundant_address_ranges().await {
                warn!(target: "contractor::prune_loop()", "Pruning pass failed: {}", e);
            }
            sleep(self.settings.prune_interval).await;
        }
    }
}
