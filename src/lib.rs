//! Core of the SocietyShare neighbourhood rental marketplace: a local cache
//! with stale-while-revalidate reads, rental lifecycle reconciliation and the
//! trust score.

pub mod cache;
pub mod clock;
pub mod config;
pub mod db;
pub mod market;
pub mod session;
