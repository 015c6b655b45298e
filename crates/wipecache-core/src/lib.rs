//! wipecache - client-side caching and sync for the data-erasure dashboard.
//!
//! Reads of machines, audit reports and sub-accounts go through a
//! stale-while-revalidate [`QueryCache`] backed by a persistent JSON store
//! and a remote service speaking a `{success, data, message}` envelope.
//! Mutations reconcile local state in place once the service accepts them,
//! and monthly erasure metrics are derived from what is already cached.
//!
//! Most consumers only need [`Dashboard`].

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod dashboard;
pub mod demo;
pub mod metrics;
pub mod models;
pub mod mutation;
pub mod store;
pub mod utils;

pub use api::{ApiError, Envelope, HttpAdapter, RemoteFetch, Request};
pub use cache::{CacheKey, KeyPattern, Query, QueryCache, QueryState, ReadOptions};
pub use config::Config;
pub use dashboard::{Dashboard, DashboardBuilder};
pub use demo::DemoGate;
pub use metrics::{MetricsEngine, MetricsPolicy};
pub use models::{AuditReport, Collection, DerivedMetrics, Machine, MonthlyMetric, Subuser};
pub use mutation::{Mutation, MutationCoordinator, MutationError, MutationOutcome};
pub use store::SharedStore;
