//! Pay-per-view gating and Lightning invoice brokering for content entities.
//!
//! Given an entity and a view mode, this crate decides whether payment is
//! required and at what price, then finds or creates the covering invoice
//! through an external Lightning Charge-style service.
pub mod broker;
pub mod charge;
pub mod config;
pub mod db;
pub mod model;
pub mod registry;
pub mod resolver;
pub mod settings;

pub use broker::{InvoiceBroker, InvoiceOutcome};
pub use model::{Actor, ContentEntity, EntityRef, Price, PriceMode};
pub use resolver::Resolver;
pub use settings::{Scope, SettingsStore};
