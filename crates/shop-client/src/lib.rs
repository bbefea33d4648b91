//! `shop-client`: commerce admin API client and product remediation steps.
//!
//! Implements [`remedy_core::api::RemoteApi`] for a Shopify-style admin API
//! and supplies the sub-steps the `remedy` binary runs against products.
//!
//! # Architecture
//!
//! ```text
//! ShopConfig ──▶ ShopClient ── GraphQL: products / product(id:) / metafieldsSet
//!                    │         REST:    PUT images, PUT variants
//!                    ▼
//!              RemoteError    ← 429 / THROTTLED, 5xx / timeouts, other 4xx
//!
//! product_action(config) ──▶ SwapLeadImage ▸ PriceFromCost ▸ CostMetafield
//!                            ▸ TranslateColorMetafield (color::translate_value)
//! ```

pub mod client;
pub mod color;
pub mod config;
pub mod error;
pub mod steps;
pub mod types;

pub use client::{MetafieldKeys, ProductFilter, ShopClient, ShopMutation};
pub use config::ShopConfig;
pub use error::ShopError;
pub use steps::{metafield_keys, product_action};

pub type Result<T> = std::result::Result<T, ShopError>;
