//! REST API 클라이언트.

pub mod client;
pub mod order;

pub use client::RestClient;
pub use order::{OrderType, PlaceOrder};
