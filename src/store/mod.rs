//! Persistence — layered key-value backing stores and the session ledger.
//!
//! Writes go through every layer (primary, snapshot, mirror); reads take
//! the first layer that answers.  [`Ledger`] is the only consumer and owns
//! the recovery logic that runs at startup.

pub mod backing;
pub mod ledger;

pub use backing::{
    BackingStore, LayeredStore, MirrorStore, PrimaryStore, SnapshotStore, StoreError,
};
pub use ledger::{Ledger, RecoveryReport};
