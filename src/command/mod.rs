pub mod executor;
pub mod request;


pub use executor::CommandExecutor;
pub use request::CommandRequest;
