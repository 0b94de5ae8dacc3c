//! Database queries

pub mod record;
