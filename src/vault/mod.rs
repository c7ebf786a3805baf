//! Vault orchestration: call lifecycle, rollback journal and the user-facing
//! deposit/withdraw entry points

pub mod atomic;
pub mod call;
mod orchestrator;

pub use atomic::{AtomicScope, Compensation};
pub use call::{CallKind, CallState, PendingCall};
pub use orchestrator::{DepositReceipt, VaultOrchestrator, WithdrawReceipt};
