//! Domain types shared by the store, service and HTTP layers.

pub mod money;
pub mod order;
pub mod user;

pub use order::{Order, OrderItem, OrderWithOwner, OwnerSummary, PaymentState};
pub use user::User;
