//! togglegate: multi-tenant feature-flag evaluation gateway
//!
//! Sits between many client applications and one flag-management backend.
//! Callers ask for toggle state per application; the gateway keeps one warm
//! tenant client per application (see [`togglegate_core`]) and answers from
//! its cached snapshot.
//!
//! ## Modules
//!
//! - [`config`]: configuration from file and `TOGGLEGATE_*` environment
//! - [`backend`]: reqwest implementation of [`FlagBackend`](togglegate_core::FlagBackend)
//! - [`gateway`]: axum routes, authentication and lifecycle
//! - [`telemetry`]: tracing subscriber setup
//! - `cli`: the `togglegate` binary (feature `cli`)
//!
//! ## HTTP surface
//!
//! | Route | Access | |
//! |-------|--------|-|
//! | `GET/POST /proxy` | client key | enabled toggles |
//! | `GET/POST /proxy/all` | client key | all toggles, when enabled |
//! | `GET /client/features` | server-side token | raw definitions of a live tenant |
//! | `POST /client/metrics` | either | merge SDK-reported counts |
//! | `POST /client/register` | either | acknowledged |
//! | `GET /health` | none | liveness |
//! | `GET /internal-backstage/prometheus` | none | counters |

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod config;
pub mod gateway;
pub mod telemetry;

#[cfg(feature = "cli")]
pub mod cli;

pub use backend::{HttpBackend, HttpBackendConfig};
pub use config::{ConfigError, GatewayConfig, GatewayConfigBuilder, LoggingConfig, UpstreamConfig};
pub use gateway::{ApiError, Gateway, GatewayBuilder};
