// Module declarations
mod config;
mod messaging;
mod processor;
mod agent;

pub use config::AgentConfig;
pub use agent::Agent;
