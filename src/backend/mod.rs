//! Station process backend abstraction layer

pub mod command;
pub mod mock_backend;
pub mod properties;
pub mod station_backend;
pub mod supplicant_backend;

pub use command::{Command, CommandReply, CommandWorker};
pub use mock_backend::MockStationBackend;
pub use station_backend::{StationBackend, StationEvent};
pub use supplicant_backend::SupplicantBackend;
