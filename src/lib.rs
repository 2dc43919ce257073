//! The identity core of HashPost, a forum where people post under pseudonyms.
//!
//! A person signs up once and can then speak through any number of personas.
//! Each persona gets a pseudonym that is derived from a secret the person holds
//! and a master secret the server holds, so nobody reading the forum can link
//! two personas together, and nobody holding only a database dump can either.
//!
//! Sometimes linking personas is exactly what needs to happen: a moderator
//! chasing ban evasion in their subforum, an admin looking at a harassment
//! campaign, a legal team answering a court order. For that, every persona's
//! identity mapping is sealed at signup under a handful of role keys, one per
//! tier of access. A role key is derived from a per-domain master secret and is
//! bound to a role, a scope, and an expiry. Whoever holds one can open the
//! mappings sealed for that tier, and nothing else.
//!
//! Every correlation is written to an append-only audit log before any result
//! leaves the engine. If the audit can't be written, nothing is returned.
//!
//! The pieces:
//!
//! 1. [`keystore`] holds the versioned master secrets, one per domain, and
//! rotates them with a grace period for the old set.
//! 1. [`derive`] turns master secrets into pseudonyms, fingerprints, and role
//! keys.
//! 1. [`vault`] seals and opens identity mappings.
//! 1. [`correlation`] answers "who else is this person?" for authorized roles,
//! and [`audit`] records that the question was asked.
//! 1. [`storage`] defines where mappings, activity, and audits live, with memory
//! and file-backed implementations.
//! 1. [`service`] wires the rest together from a [`config::Config`].

#[macro_use]
pub mod util;
pub mod error;
pub mod crypto;
pub mod keystore;
pub mod derive;
pub mod vault;
pub mod storage;
pub mod audit;
pub mod correlation;
pub mod config;
pub mod service;

pub use error::{Error, Result};
