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

//! Storage contract data model and the concurrent contract registry.
//!
//! A [`ContractHeader`] carries the signed revisions of a single storage
//! contract held with a remote host. Each header lives inside a
//! [`SafeContract`], which is owned by the [`ContractSet`] while the
//! contract is active.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Exclusive contract access and snapshots
pub mod safe;
pub use safe::{ContractHandle, SafeContract, SafeContractPtr};

/// Registry of active contracts
pub mod set;
pub use set::{ContractSet, ContractSetPtr};

/// Index of the renter key inside [`UnlockConditions::public_keys`]
pub const RENTER_KEY_INDEX: usize = 0;
/// Index of the host key inside [`UnlockConditions::public_keys`]
pub const HOST_KEY_INDEX: usize = 1;

/// Identifier of a storage contract
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct ContractId(pub [u8; 32]);

impl ContractId {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn inner(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.0).into_string())
    }
}

impl FromStr for ContractId {
    type Err = Error;

    fn from_str(enc: &str) -> Result<Self> {
        let decoded = bs58::decode(enc).into_vec()?;
        if decoded.len() != 32 {
            return Err(Error::ParseFailed("Invalid contract id length"))
        }

        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&decoded);
        Ok(Self(bytes))
    }
}

/// Public key of one of the contract parties
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; 32]);

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.0).into_string())
    }
}

/// Keys required to authorize future revisions of a contract
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct UnlockConditions {
    pub timelock: u64,
    pub public_keys: Vec<PublicKey>,
    pub signatures_required: u64,
}

/// Payout created when the storage proof window closes
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ProofOutput {
    pub value: u128,
    pub unlock_hash: [u8; 32],
}

/// A single revision of a storage contract
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    /// Contract this revision belongs to
    pub parent_id: ContractId,
    pub unlock_conditions: UnlockConditions,
    pub revision_number: u64,
    pub file_size: u64,
    pub file_merkle_root: [u8; 32],
    /// Height at which the storage proof window opens
    pub window_start: u64,
    pub window_end: u64,
    /// Outputs created on a successful storage proof
    pub valid_proof_outputs: Vec<ProofOutput>,
    /// Outputs created on a missed storage proof
    pub missed_proof_outputs: Vec<ProofOutput>,
}

/// Signed contract state as known by the renter.
///
/// The revision list is never empty, and the last element is the
/// authoritative revision.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredHeader")]
pub struct ContractHeader {
    revisions: Vec<Revision>,
    /// Address the host announced itself with
    pub net_address: Url,
    /// Block height at which the contract was formed
    pub start_height: u64,
}

/// Unchecked form of [`ContractHeader`] as read from storage
#[derive(Deserialize)]
struct StoredHeader {
    revisions: Vec<Revision>,
    net_address: Url,
    start_height: u64,
}

impl TryFrom<StoredHeader> for ContractHeader {
    type Error = Error;

    fn try_from(stored: StoredHeader) -> Result<Self> {
        Self::from_revisions(stored.revisions, stored.net_address, stored.start_height)
    }
}

impl ContractHeader {
    pub fn new(revision: Revision, net_address: Url, start_height: u64) -> Self {
        Self { revisions: vec![revision], net_address, start_height }
    }

    /// Rebuild a header from a revision history. The history must not be
    /// empty, every revision must belong to the same contract, and
    /// revision numbers must never decrease.
    pub fn from_revisions(
        revisions: Vec<Revision>,
        net_address: Url,
        start_height: u64,
    ) -> Result<Self> {
        let Some(first) = revisions.first() else {
            return Err(Error::InvalidRevision("empty revision history".to_string()))
        };

        let id = first.parent_id;
        for pair in revisions.windows(2) {
            if pair[1].parent_id != id {
                return Err(Error::InvalidRevision(format!(
                    "revision of {} in history of contract {}",
                    pair[1].parent_id, id
                )))
            }
            if pair[1].revision_number < pair[0].revision_number {
                return Err(Error::InvalidRevision(format!(
                    "revision number {} follows {} on contract {}",
                    pair[1].revision_number, pair[0].revision_number, id
                )))
            }
        }

        Ok(Self { revisions, net_address, start_height })
    }

    /// Contract identifier, which is the parent id of the first revision.
    pub fn id(&self) -> ContractId {
        self.revisions[0].parent_id
    }

    pub fn revisions(&self) -> &[Revision] {
        &self.revisions
    }

    pub fn last_revision(&self) -> &Revision {
        // The constructor guarantees at least one revision
        &self.revisions[self.revisions.len() - 1]
    }

    pub fn host_key(&self) -> Option<&PublicKey> {
        self.last_revision().unlock_conditions.public_keys.get(HOST_KEY_INDEX)
    }

    pub fn renter_key(&self) -> Option<&PublicKey> {
        self.last_revision().unlock_conditions.public_keys.get(RENTER_KEY_INDEX)
    }

    /// Height after which the contract can no longer be revised.
    pub fn end_height(&self) -> u64 {
        self.last_revision().window_start
    }

    /// Funds still owned by the renter in the latest revision.
    pub fn renter_funds(&self) -> u128 {
        self.last_revision().valid_proof_outputs.first().map(|o| o.value).unwrap_or(0)
    }

    /// Host part of the announced network address, if any.
    pub fn host(&self) -> Option<&str> {
        self.net_address.host_str()
    }

    /// Check that `revision` may follow the current last revision.
    pub(crate) fn validate_revision(&self, revision: &Revision) -> Result<()> {
        let id = self.id();
        if revision.parent_id != id {
            return Err(Error::InvalidRevision(format!(
                "parent {} does not match contract {}",
                revision.parent_id, id
            )))
        }

        let current = self.last_revision().revision_number;
        if revision.revision_number <= current {
            return Err(Error::InvalidRevision(format!(
                "revision number {} is not greater than {} on contract {}",
                revision.revision_number, current, id
            )))
        }

        Ok(())
    }

    /// Replace the authoritative revision. The caller validates first.
    pub(crate) fn set_last_revision(&mut self, revision: Revision) {
        let last = self.revisions.len() - 1;
        self.revisions[last] = revision;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn header(n: u8, addr: &str) -> ContractHeader {
        let revision = Revision {
            parent_id: ContractId([n; 32]),
            unlock_conditions: UnlockConditions {
                public_keys: vec![PublicKey([0; 32]), PublicKey([n; 32])],
                signatures_required: 2,
                ..Default::default()
            },
            valid_proof_outputs: vec![ProofOutput::default(), ProofOutput::default()],
            ..Default::default()
        };
        ContractHeader::new(revision, Url::parse(addr).unwrap(), 0)
    }

    #[test]
    fn contract_id_encoding() {
        let id = ContractId([7; 32]);
        let parsed = ContractId::from_str(&id.to_string()).unwrap();
        assert_eq!(id, parsed);

        assert!(ContractId::from_str("0OIl").is_err());
        assert!(ContractId::from_str("2NEpo7TZRRrLZSi2U").is_err());
    }

    #[test]
    fn header_accessors() {
        let h = header(3, "tcp://host3.com:9982");
        assert_eq!(h.id(), ContractId([3; 32]));
        assert_eq!(h.host_key(), Some(&PublicKey([3; 32])));
        assert_eq!(h.renter_key(), Some(&PublicKey([0; 32])));
        assert_eq!(h.host(), Some("host3.com"));
        assert_eq!(h.revisions().len(), 1);
        assert_eq!(h.renter_funds(), 0);
    }

    #[test]
    fn revision_validation() {
        let mut h = header(1, "tcp://host1.com:9982");

        let mut next = h.last_revision().clone();
        next.revision_number = 1;
        assert!(h.validate_revision(&next).is_ok());

        let mut stale = h.last_revision().clone();
        stale.revision_number = 0;
        assert!(matches!(h.validate_revision(&stale), Err(Error::InvalidRevision(_))));

        let mut foreign = next.clone();
        foreign.parent_id = ContractId([9; 32]);
        assert!(matches!(h.validate_revision(&foreign), Err(Error::InvalidRevision(_))));

        h.set_last_revision(next);
        assert_eq!(h.last_revision().revision_number, 1);
        assert_eq!(h.id(), ContractId([1; 32]));
    }

    #[test]
    fn stored_history_is_checked() {
        let url = Url::parse("tcp://host1.com:9982").unwrap();
        let first = header(1, "tcp://host1.com:9982").last_revision().clone();
        let mut second = first.clone();
        second.revision_number = 5;

        let h = ContractHeader::from_revisions(vec![first.clone(), second.clone()], url.clone(), 7)
            .unwrap();
        assert_eq!(h.id(), ContractId([1; 32]));
        assert_eq!(h.last_revision().revision_number, 5);

        let res = ContractHeader::from_revisions(vec![], url.clone(), 0);
        assert!(matches!(res, Err(Error::InvalidRevision(_))));

        let res = ContractHeader::from_revisions(vec![second.clone(), first.clone()], url.clone(), 0);
        assert!(matches!(res, Err(Error::InvalidRevision(_))));

        let mut foreign = second;
        foreign.parent_id = ContractId([2; 32]);
        let res = ContractHeader::from_revisions(vec![first, foreign], url, 0);
        assert!(matches!(res, Err(Error::InvalidRevision(_))));
    }

    #[test]
    fn empty_stored_history_is_rejected() {
        let stored = r#"
            revisions = []
            net_address = "tcp://host1.com:9982"
            start_height = 0
        "#;
        let err = toml::from_str::<ContractHeader>(stored).unwrap_err();
        assert!(err.to_string().contains("empty revision history"));
    }
}
