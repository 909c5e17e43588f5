//! Domain types and PostgreSQL queries for meter and vehicle telemetry.

pub mod db;
pub mod domain;
