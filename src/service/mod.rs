//! Service layer for the table-match service
//!
//! Application state, the HTTP intake, health logic and background task
//! management for the production binary.

pub mod app;
pub mod health;
pub mod intake;

pub use app::{AppState, ServiceError};
pub use health::{ComponentCheck, HealthCheck, HealthStatus, ServiceStats};
pub use intake::{IntakeServer, IntakeServerConfig, PARTICIPANT_HEADER};
