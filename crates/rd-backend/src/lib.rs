//! rd-backend: HTTP collaborators of the relaydeck session bridge.
//!
//! This crate talks to the dashboard server outside the live transports:
//! the multipart upload endpoint and the session history endpoint. It also
//! carries the credential store seam and, behind the `mock` feature, a
//! scripted mock dashboard used by tests at every layer.

pub mod credentials;
pub mod dashboard;
#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use credentials::{CredentialStore, MemoryCredentials};
pub use dashboard::{endpoint, DashboardClient, DashboardError, ProgressFn, UploadPayload};
#[cfg(any(test, feature = "mock"))]
pub use mock::{fixtures, ConnectionRecord, MockConfig, MockDashboard, MockResponse, Route};
