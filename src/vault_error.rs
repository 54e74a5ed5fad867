use thiserror::Error;

use crate::lifecycle::VaultState;
use crate::traits::ConstructError;
use crate::vault::Key;

/// Errors returned by [`Vault::create_or_get`](crate::Vault::create_or_get).
///
/// Only [`VaultError::Construct`] is recoverable. The global surface treats
/// [`VaultError::PriorityConflict`] as fatal.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error(
        "singleton {key} already exists with a different priority; existing={existing}, requested={requested}"
    )]
    PriorityConflict {
        key: Key,
        existing: i32,
        requested: i32,
    },

    #[error("failed to construct singleton {key}: {source}")]
    Construct {
        key: Key,
        #[source]
        source: ConstructError,
    },
}

/// Invalid accesses to the vault lifecycle. All of them are fatal on the
/// global surface.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("trying to access singleton vault while it's being destroyed")]
    Destroying,

    #[error("trying to access a destroyed singleton vault")]
    Destroyed,

    #[error("waiting for singleton vault initialization, but the vault went back to uninitialized")]
    WaitedOnUninitialized,

    #[error("trying to destroy singleton vault in state {0}")]
    TeardownFrom(VaultState),
}
