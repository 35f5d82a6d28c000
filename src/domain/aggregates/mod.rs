//! Aggregates module
pub mod product;
pub mod order;
pub mod waitlist;

pub use product::{Product, ProductError};
pub use order::{CustomerStatus, Fulfillment, Order, OrderError, OrderItem, OrderStatus, PaymentMethod, Shipment};
pub use waitlist::WaitlistEntry;
