//! Generic dynamic storage provisioner control loop.
//!
//! This crate implements the reconciliation engine shared by concrete
//! storage backends: watching claims and volumes, deciding when to
//! provision or delete, scheduling that work with backoff, and leaving the
//! actual backend mechanics to a [`provider::Provider`] implementation
//! supplied by the caller.

pub mod cluster_api;
pub mod config;
pub mod controller;
pub mod demo_provider;
pub mod eligibility;
pub mod error;
pub mod ext;
pub mod leader_election;
pub mod provider;
pub mod quantity_parser;
pub mod scheduler;
