pub mod api;
pub mod audio;
pub mod auth;
pub mod config;
pub mod database;
pub mod errors;
pub mod generation;
pub mod lifecycle;
pub mod llm_providers;
pub mod logging;
pub mod models;
pub mod partial_json;
pub mod record_service;
pub mod streaming;

pub use audio::AudioService;
pub use auth::AuthService;
pub use config::Config;
pub use database::Database;
pub use errors::*;
pub use generation::{GenerationEvent, GenerationService};
pub use lifecycle::{FetchOutcome, GenerationLocks, LifecycleCoordinator};
pub use llm_providers::{FixedProvider, LlmProvider, LlmProviderFactory, LlmProviderType};
pub use models::*;
pub use record_service::RecordService;
