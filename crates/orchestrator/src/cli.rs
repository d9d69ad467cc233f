use clap::Parser;

#[derive(Parser)]
pub struct Cli {
    /// Host to bind the control API to
    #[arg(short = 'e', long, default_value = "0.0.0.0")]
    pub host: String,

    /// Port of the control API
    #[arg(short = 'p', long, default_value = "8000")]
    pub port: u16,

    /// Redis store url
    #[arg(short = 's', long, default_value = "redis://localhost:6379")]
    pub redis_store_url: String,

    /// User for ssh connections to the node hosts
    #[arg(long, default_value = "appo")]
    pub ssh_user: String,

    /// Path of the ssh private key
    #[arg(long, default_value = "/root/.ssh/id_rsa")]
    pub ssh_key: String,

    /// Container name prefix; the local node number is appended
    #[arg(long, default_value = "testnet-node")]
    pub node_prefix: String,

    /// File inside each container the chain process logs to
    #[arg(long, default_value = "/output.log")]
    pub docker_output_file: String,

    /// Docker network node containers are attached to
    #[arg(long, default_value = "testnet")]
    pub docker_network: String,

    /// Max concurrent remote operations across all fan-outs
    #[arg(long, default_value = "10")]
    pub thread_limit: usize,

    /// Log every remote command and its output
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Log level
    #[arg(short = 'l', long, default_value = "info")]
    pub log_level: String,
}

/// Immutable process configuration, built once from the CLI and passed by
/// reference into each subsystem.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub host: String,
    pub port: u16,
    pub redis_url: String,
    pub ssh_user: String,
    pub ssh_key_path: String,
    pub node_prefix: String,
    pub docker_output_file: String,
    pub docker_network: String,
    pub thread_limit: usize,
    pub verbose: bool,
}

impl Cli {
    pub fn into_config(self) -> OrchestratorConfig {
        OrchestratorConfig {
            host: self.host,
            port: self.port,
            redis_url: self.redis_store_url,
            ssh_user: self.ssh_user,
            ssh_key_path: self.ssh_key,
            node_prefix: self.node_prefix,
            docker_output_file: self.docker_output_file,
            docker_network: self.docker_network,
            thread_limit: self.thread_limit,
            verbose: self.verbose,
        }
    }
}
