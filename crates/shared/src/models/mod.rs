pub mod deployment;
pub mod netem;
pub mod node;
pub mod server;

pub use deployment::{DeploymentDetails, DEFAULT_IMAGE};
pub use netem::Netconf;
pub use node::{Node, SidecarNode};
pub use server::Server;
