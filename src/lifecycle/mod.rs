//! Lifecycle supervision — background execution grants, platform event
//! handling, and pipeline health recovery.

pub mod grant;
pub mod guard;

pub use grant::{ExecutionGrant, GrantError, GrantHandle, GrantSupervisor, UnrestrictedGrant};
pub use guard::{LifecycleEvent, LifecycleGuard, Supervised};
