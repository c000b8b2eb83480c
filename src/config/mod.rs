//! Configuration module

pub mod cli;
pub mod profiles;
pub mod settings;

pub use cli::CliArgs;
pub use profiles::{StoredProfile, load_profiles};
pub use settings::{BgscanMethod, ConfigUpdate, RegistrationPolicy, Settings, StationConfig};
