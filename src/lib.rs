pub mod configuration;
pub mod controller;
pub mod error_handling;
pub mod network;
pub mod storage;

pub use configuration::Config;
pub use controller::Controller;
pub use network::{ReceiverHandle, ReceiverService, ReceiverSettings};
pub use storage::Storage;
