pub mod command;
pub mod config;
pub mod error;
pub mod sim;
pub mod telemetry;
pub mod vehicle;
pub mod web_server;

pub use command::{CommandExecutor, CommandRequest};
pub use error::CommandError;
pub use sim::{Subscription, SubscriptionId, VehicleStore};
pub use vehicle::{HomePosition, VehicleState};
