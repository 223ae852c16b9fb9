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

// Hello developer. Please add your error to the according subsection
// that is commented, or make a new subsection. Keep it clean.

/// Main result type used throughout the codebase.
pub type Result<T> = std::result::Result<T, Error>;

/// General library errors used throughout the codebase.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    // ==============
    // Parsing errors
    // ==============
    #[error("Parse failed: {0}")]
    ParseFailed(&'static str),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    Bs58DecodeError(#[from] bs58::decode::Error),

    // ======================
    // Contract set errors
    // ======================
    #[error("Contract {0} not found in the active set")]
    ContractNotFound(String),

    #[error("Contract {0} is already in the active set")]
    DuplicateContractId(String),

    #[error("Invalid revision: {0}")]
    InvalidRevision(String),

    #[error("Timed out acquiring contract {0}")]
    AcquireTimeout(String),

    // ======================
    // Contractor errors
    // ======================
    #[error("Contract {0} is inactive and cannot be reactivated")]
    ContractInactive(String),

    #[error("Host address range is already used by an active contract: {0}")]
    RedundantAddressRange(String),

    #[error("Failed resolving host {0}")]
    ResolutionFailure(String),

    #[error("Initial host scan has not completed yet")]
    InitialScanIncomplete,

    // ====================
    // Configuration errors
    // ====================
    #[error("Configuration is invalid: {0}")]
    ConfigInvalid(String),

    // ====================
    // Miscellaneous errors
    // ====================
    #[error("IO error: {0:?}")]
    Io(std::io::ErrorKind),

    #[error("Service stopped")]
    ServiceStopped,

    #[error("Set logger failed: {0}")]
    SetLoggerError(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.kind())
    }
}

impl From<log::SetLoggerError> for Error {
    fn from(err: log::SetLoggerError) -> Self {
        Self::SetLoggerError(err.to_string())
    }
}
