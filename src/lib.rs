//! Postern - relay-authorization decision engine
//!
//! Sits in the request path of a mail-relay gateway and decides, per
//! connection and transaction, whether a principal may authenticate, send as
//! a given address, deliver to a given recipient, and submit a message of a
//! given size. Rules live in a relational store, are compiled into immutable
//! snapshots, swapped atomically on change notifications, and survive store
//! outages through a persisted fallback cache.

pub mod auth;
pub mod cache;
pub mod errors;
pub mod rules;
pub mod settings;
pub mod store;
pub mod watch;
pub mod web;
