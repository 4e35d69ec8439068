pub mod health;
pub mod orders;

pub use health::health_routes;
pub use orders::order_routes;
