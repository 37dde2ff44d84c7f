//! HTTP control plane for a fleet of agents. Every control request passes
//! through [`agent_policy_rs::PolicyEngine`] before it reaches a dispatcher.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod registry;
pub mod routes;
pub mod server;

pub use config::DashboardConfig;
pub use dispatcher::{
    control_command, CommandDispatcher, DispatchError, DispatchReceipt, DispatchRequest,
    RecordingDispatcher,
};
pub use error::DashboardError;
pub use registry::{Agent, AgentRegistry, AgentStatus, DirectoryRegistry, StaticRegistry};
pub use routes::{ApiResponse, ControlPlane};
pub use server::DashboardServer;
