pub mod orders;
pub mod reconciliation;

pub use orders::{CheckoutOutcome, OrderLifecycleService, OrderPolicy};
pub use reconciliation::{OrphanedSession, OrphanedSessions};
