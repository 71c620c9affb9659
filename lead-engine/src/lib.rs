//! Lead deduplication and routing engine.
//!
//! Given an inbound sales lead with loosely-formatted contact
//! identifiers, this crate decides whether the lead is well-formed,
//! whether it duplicates a known customer (and with what confidence),
//! who should own it, and records every decision on an append-only
//! audit ledger. Record storage, views, notifications and transports
//! are host concerns consumed through the traits in [`customer`],
//! [`rules`] and [`audit`].

pub mod assignment;
pub mod audit;
pub mod conflict;
pub mod customer;
pub mod error;
pub mod lead;
pub mod matching;
pub mod normalize;
pub mod pipeline;
pub mod rules;
pub mod scoring;
