// Lifecycle notification server
//
// Hosts the onboarding workflow behind HTTP and runs the wake scheduler
// that resumes sleeping instances when they come due.

pub mod api;
pub mod app;
pub mod config;
pub mod telemetry;

pub use api::{ApiDoc, AppState};
pub use app::{build_executor, onboarding_executor, router, Backends};
pub use config::ServerConfig;
