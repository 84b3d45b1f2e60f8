//! Purchase fulfillment for the order backend.
//!
//! A purchase turns one cart line of a shopping session into an order:
//! 1. Create a pending payment placeholder
//! 2. Create the order pointing at the payment
//! 3. Snapshot the cart line as an order item
//! 4. Link and settle the payment
//! 5. Lock the product's stock row and take the purchased quantity
//! 6. Delete the cart line
//! 7. Delete the session
//!
//! The steps run in a single database transaction. Either all of them take
//! effect or none does.

pub mod error;
pub mod service;

pub use error::{FulfillmentError, Result};
pub use service::{FulfillPurchase, FulfillmentResult, FulfillmentService};
