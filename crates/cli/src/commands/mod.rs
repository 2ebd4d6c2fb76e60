//! Command handlers for the Bastion CLI.

pub mod ask;
pub mod models;
pub mod route;

pub use ask::AskCommand;
pub use models::ModelsCommand;
pub use route::RouteCommand;
