//! Committed-data storage for morphdb
//!
//! This crate provides [`ShardedStore`], the in-memory implementation of the
//! [`morph_core::Storage`] trait that transactions read committed values from
//! and install new versions into.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod sharded;

pub use sharded::ShardedStore;
