use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use russh_sftp::client::SftpSession;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::time::{sleep, Duration};

use crate::cli::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::state::BuildRegistry;

const MAX_RUN_ATTEMPTS: usize = 20;
const MAX_CONNECTIONS: usize = 50;
const DIAL_RETRY_DELAY: Duration = Duration::from_millis(50);
const SSH_PORT: u16 = 22;

struct ClientHandler;

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Host key verification is disabled; testnet hosts are ephemeral.
        Ok(true)
    }
}

/// A pool of persistent SSH connections to one host. Sessions are gated by a
/// weighted semaphore of capacity [`MAX_CONNECTIONS`]; that cap is the only
/// backpressure on remote work. The object is safe to share across tasks.
pub struct SshClient {
    host: String,
    server_id: u32,
    connections: RwLock<Vec<Handle<ClientHandler>>>,
    sem: Arc<Semaphore>,
    config: Arc<OrchestratorConfig>,
    registry: Arc<BuildRegistry>,
}

/// One remote session plus the semaphore unit backing it; the unit is
/// released when the session is dropped.
struct Session {
    channel: Channel<Msg>,
    _permit: OwnedSemaphorePermit,
}

impl Session {
    async fn exec_capture(mut self, command: &str) -> Result<(String, Option<u32>)> {
        self.channel.exec(true, command).await?;
        let mut output = Vec::new();
        let mut status = None;
        loop {
            match self.channel.wait().await {
                Some(ChannelMsg::Data { data }) => output.extend_from_slice(&data),
                Some(ChannelMsg::ExtendedData { data, .. }) => output.extend_from_slice(&data),
                Some(ChannelMsg::ExitStatus { exit_status }) => status = Some(exit_status),
                Some(_) => {}
                None => break,
            }
        }
        Ok((String::from_utf8_lossy(&output).into_owned(), status))
    }

    async fn upload(self, data: &[u8], dest: &str) -> Result<()> {
        let Session {
            mut channel,
            _permit,
        } = self;
        channel.request_subsystem(true, "sftp").await?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .context("failed to open sftp session")?;
        let mut remote = sftp
            .create(dest)
            .await
            .with_context(|| format!("failed to create remote file {dest}"))?;
        remote.write_all(data).await?;
        remote.shutdown().await?;
        Ok(())
    }
}

impl SshClient {
    /// Opens the pool with a first live connection to `host`, validating
    /// reachability and credentials up front.
    pub async fn connect(
        host: &str,
        server_id: u32,
        config: Arc<OrchestratorConfig>,
        registry: Arc<BuildRegistry>,
    ) -> Result<Self> {
        let client = Self {
            host: host.to_string(),
            server_id,
            connections: RwLock::new(Vec::new()),
            sem: Arc::new(Semaphore::new(MAX_CONNECTIONS)),
            config,
            registry,
        };
        let handle = client.dial_retry().await?;
        client.connections.write().await.push(handle);
        Ok(client)
    }

    /// A client with an empty pool that has never dialed. Operations resolve
    /// paths and consult the registry as usual but fail at the transport.
    #[cfg(test)]
    pub(crate) fn disconnected(
        host: &str,
        server_id: u32,
        config: Arc<OrchestratorConfig>,
        registry: Arc<BuildRegistry>,
    ) -> Self {
        Self {
            host: host.to_string(),
            server_id,
            connections: RwLock::new(Vec::new()),
            sem: Arc::new(Semaphore::new(MAX_CONNECTIONS)),
            config,
            registry,
        }
    }

    async fn dial(&self) -> Result<Handle<ClientHandler>> {
        let key = russh_keys::load_secret_key(&self.config.ssh_key_path, None)
            .with_context(|| format!("failed to load ssh key {}", self.config.ssh_key_path))?;
        let ssh_config = Arc::new(client::Config::default());
        let mut handle =
            client::connect(ssh_config, (self.host.as_str(), SSH_PORT), ClientHandler).await?;
        let authenticated = handle
            .authenticate_publickey(self.config.ssh_user.as_str(), Arc::new(key))
            .await?;
        if !authenticated {
            bail!(
                "public key authentication rejected for {}@{}",
                self.config.ssh_user,
                self.host
            );
        }
        Ok(handle)
    }

    async fn dial_retry(&self) -> Result<Handle<ClientHandler>> {
        loop {
            match self.dial().await {
                Ok(handle) => return Ok(handle),
                Err(err) => {
                    let text = format!("{err:#}");
                    if text.contains("connection reset by peer") || text.contains("EOF") {
                        debug!("retrying ssh dial to {}: {}", self.host, text);
                        sleep(DIAL_RETRY_DELAY).await;
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Acquires a semaphore unit, then opens a session on the first cached
    /// connection that accepts one, dialing a fresh connection when the whole
    /// pool is exhausted.
    async fn get_session(&self) -> Result<Session> {
        let permit = self
            .sem
            .clone()
            .acquire_owned()
            .await
            .context("ssh session semaphore closed")?;

        {
            let connections = self.connections.read().await;
            for connection in connections.iter() {
                if let Ok(channel) = connection.channel_open_session().await {
                    return Ok(Session {
                        channel,
                        _permit: permit,
                    });
                }
            }
        }

        let handle = self.dial_retry().await?;
        let channel = handle.channel_open_session().await?;
        self.connections.write().await.push(handle);
        Ok(Session {
            channel,
            _permit: permit,
        })
    }

    async fn active_build(&self) -> Option<Arc<crate::state::BuildState>> {
        self.registry.for_server(self.server_id).await
    }

    /// Executes a command on the host, returning combined stdout/stderr.
    /// Short-circuits with the sticky build error when the build on this
    /// server has been stopped.
    pub async fn run(&self, command: &str) -> Result<String> {
        if let Some(build) = self.active_build().await {
            if build.stop().await {
                return Err(build.sticky_error().await);
            }
        }
        if self.config.verbose {
            info!("[{}] running: {}", self.host, command);
        } else {
            debug!("[{}] running: {}", self.host, command);
        }

        let session = self.get_session().await?;
        let (output, status) = session.exec_capture(command).await?;
        if self.config.verbose && !output.is_empty() {
            info!("[{}] {}", self.host, output.trim_end());
        }
        match status {
            Some(0) | None => Ok(output),
            Some(status) => {
                Err(anyhow::Error::new(OrchestratorError::CommandFailed { status, output })
                    .context(format!("`{command}` failed on {}", self.host)))
            }
        }
    }

    /// Runs each command in order, stopping at the first failure.
    pub async fn multi_run(&self, commands: &[&str]) -> Result<Vec<String>> {
        let mut out = Vec::with_capacity(commands.len());
        for command in commands {
            out.push(self.run(command).await?);
        }
        Ok(out)
    }

    /// Chains the commands with `&&` into a single session.
    pub async fn fast_multi_run(&self, commands: &[&str]) -> Result<String> {
        self.run(&commands.join("&&")).await
    }

    /// Retries a command until it succeeds, up to [`MAX_RUN_ATTEMPTS`] times.
    pub async fn keep_try_run(&self, command: &str) -> Result<String> {
        if let Some(build) = self.active_build().await {
            if build.stop().await {
                return Err(build.sticky_error().await);
            }
        }
        let mut last = Err(anyhow!("command was never attempted"));
        for attempt in 0..MAX_RUN_ATTEMPTS {
            last = self.run(command).await;
            match &last {
                Ok(_) => break,
                Err(err) => debug!(
                    "[{}] attempt {}/{} failed: {err:#}",
                    self.host,
                    attempt + 1,
                    MAX_RUN_ATTEMPTS
                ),
            }
        }
        last
    }

    fn container_name(&self, node: usize) -> String {
        format!("{}{}", self.config.node_prefix, node)
    }

    /// Executes a command inside a node's container.
    pub async fn docker_exec(&self, node: usize, command: &str) -> Result<String> {
        self.run(&format!("docker exec {} {}", self.container_name(node), command))
            .await
    }

    pub async fn keep_try_docker_exec(&self, node: usize, command: &str) -> Result<String> {
        self.keep_try_run(&format!("docker exec {} {}", self.container_name(node), command))
            .await
    }

    pub async fn keep_try_docker_exec_all(
        &self,
        node: usize,
        commands: &[&str],
    ) -> Result<Vec<String>> {
        let mut out = Vec::with_capacity(commands.len());
        for command in commands {
            out.push(self.keep_try_docker_exec(node, command).await?);
        }
        Ok(out)
    }

    /// Starts a command inside a container and returns without waiting on it.
    pub async fn docker_execd(&self, node: usize, command: &str) -> Result<String> {
        self.run(&format!(
            "docker exec -d {} {}",
            self.container_name(node),
            command
        ))
        .await
    }

    /// Runs every command detached inside the container, chained with `&&`.
    pub async fn docker_multi_exec(&self, node: usize, commands: &[&str]) -> Result<String> {
        let merged = commands
            .iter()
            .map(|command| format!("docker exec -d {} {}", self.container_name(node), command))
            .collect::<Vec<_>>()
            .join("&&");
        self.run(&merged).await
    }

    /// Starts the node's long-running process detached, with stdout and
    /// stderr appended to the configured per-container log file. The command
    /// is recorded on the build state for later inspection. Single quotes in
    /// `command` must be escaped (`\'`); an unescaped quote would corrupt the
    /// remote invocation, so it fails here before any remote I/O.
    pub async fn docker_execd_log(&self, node: usize, command: &str) -> Result<()> {
        ensure_quotes_escaped(command)?;
        if let Some(build) = self.active_build().await {
            build
                .set(
                    &node.to_string(),
                    json!({
                        "cmdline": command,
                        "server_id": self.server_id,
                        "node": node,
                    }),
                )
                .await;
        }
        self.run(&format!(
            "docker exec -d {} bash -c '{} >> {} 2>&1'",
            self.container_name(node),
            command,
            self.config.docker_output_file
        ))
        .await?;
        Ok(())
    }

    /// Reads a file inside a container; `tail_lines` limits the read to the
    /// last n lines.
    pub async fn docker_read(
        &self,
        node: usize,
        file: &str,
        tail_lines: Option<usize>,
    ) -> Result<String> {
        match tail_lines {
            Some(lines) => {
                self.docker_exec(node, &format!("tail -n {} {}", lines, file))
                    .await
            }
            None => self.docker_exec(node, &format!("cat {}", file)).await,
        }
    }

    /// Copies a file that is already on the host into a node's container.
    pub async fn docker_cp(&self, node: usize, source: &str, dest: &str) -> Result<()> {
        self.run(&format!(
            "docker cp {} {}:{}",
            source,
            self.container_name(node),
            dest
        ))
        .await?;
        Ok(())
    }

    /// Resolves a copy source: bare names refer to the working directory of
    /// the build currently running against this server.
    async fn resolve_source(&self, src: &str) -> Result<String> {
        if src.starts_with('/') || src.starts_with("./") {
            return Ok(src.to_string());
        }
        let build = self
            .active_build()
            .await
            .ok_or_else(|| anyhow!("no active build on server {}", self.server_id))?;
        Ok(build.build_dir().join(src).to_string_lossy().into_owned())
    }

    /// Copies a local file to the remote host.
    pub async fn scp(&self, src: &str, dest: &str) -> Result<()> {
        let src = self.resolve_source(src).await?;
        if self.config.verbose {
            info!("[{}] copying {} to {}", self.host, src, dest);
        }
        let data = tokio::fs::read(&src)
            .await
            .with_context(|| format!("failed to read {src}"))?;
        self.scp_bytes(&data, dest).await
    }

    /// Writes bytes straight to a remote path.
    pub async fn scp_bytes(&self, data: &[u8], dest: &str) -> Result<()> {
        let session = self.get_session().await?;
        session.upload(data, dest).await
    }

    /// Closes every pooled connection.
    pub async fn close(&self) {
        let mut connections = self.connections.write().await;
        for connection in connections.drain(..) {
            if let Err(err) = connection
                .disconnect(Disconnect::ByApplication, "", "English")
                .await
            {
                warn!("error closing connection to {}: {err}", self.host);
            }
        }
    }
}

/// Every `'` must be written as `\'`; anything else is a programmer error in
/// the caller's command template.
fn ensure_quotes_escaped(command: &str) -> Result<()> {
    if command.matches('\'').count() != command.matches("\\'").count() {
        bail!("command contains unescaped single quotes: {command}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unescaped_quotes_rejected() {
        // two quotes, zero escaped: must fail before any remote work
        assert!(ensure_quotes_escaped("echo 'hi'").is_err());
        assert!(ensure_quotes_escaped("echo plain").is_ok());
        assert!(ensure_quotes_escaped("echo \\'hi\\'").is_ok());
        // mixed escaped and unescaped still fails
        assert!(ensure_quotes_escaped("echo \\'hi'").is_err());
    }
}
