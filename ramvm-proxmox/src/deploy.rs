//! Deployment orchestrator.
//!
//! Drives one VM from "maybe already there" to "running with an address":
//!
//! ```text
//! INIT → CONNECTED → EXISTENCE_CHECKED ─┬─ CLEAN ─────────────┐
//!                                       ├─ CONFLICT_RESOLVED ─┤
//!                                       └─ ABORTED            ▼
//!                      STORAGE_READY → CLONED → STARTED → IP_FOUND | IP_TIMEOUT
//! ```
//!
//! The existence probe and the stop of a conflicting VM may fail without
//! consequence. Every other remote failure ends the run; the session is
//! closed either way.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{ProxmoxError, Result};
use crate::executor::{ExecOptions, RemoteExecutor};
use crate::network::{wait_for_ip, PollConfig};
use crate::node::NodeParams;
use crate::qm;
use crate::reclaim::cleanup_ram_vms;
use crate::storage::prepare_storage;

/// Default memory for a fresh clone, in MiB.
pub const DEFAULT_MEMORY_MIB: u32 = 8192;

/// States of one deployment run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployState {
    Init,
    Connected,
    ExistenceChecked,
    Clean,
    ConflictResolved,
    Aborted,
    StorageReady,
    Cloned,
    Started,
    IpFound,
    IpTimeout,
}

impl fmt::Display for DeployState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "INIT",
            Self::Connected => "CONNECTED",
            Self::ExistenceChecked => "EXISTENCE_CHECKED",
            Self::Clean => "CLEAN",
            Self::ConflictResolved => "CONFLICT_RESOLVED",
            Self::Aborted => "ABORTED",
            Self::StorageReady => "STORAGE_READY",
            Self::Cloned => "CLONED",
            Self::Started => "STARTED",
            Self::IpFound => "IP_FOUND",
            Self::IpTimeout => "IP_TIMEOUT",
        };
        f.write_str(name)
    }
}

/// Decides whether an existing VM may be replaced.
///
/// Asynchronous so that an interactive answer can be awaited without
/// blocking the runtime.
#[async_trait]
pub trait ConflictResolver: Send + Sync {
    /// Return `true` to stop and replace VM `vm_id`.
    async fn confirm_destroy(&self, vm_id: u32) -> bool;
}

#[async_trait]
impl<F> ConflictResolver for F
where
    F: Fn(u32) -> bool + Send + Sync,
{
    async fn confirm_destroy(&self, vm_id: u32) -> bool {
        self(vm_id)
    }
}

/// Resolver that never replaces an existing VM.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclineAll;

#[async_trait]
impl ConflictResolver for DeclineAll {
    async fn confirm_destroy(&self, _vm_id: u32) -> bool {
        false
    }
}

/// What to deploy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployRequest {
    /// Template VM to clone from
    pub template_id: u32,
    /// Snapshot of the template
    pub snapshot: String,
    /// ID of the new VM
    pub vm_id: u32,
    /// Memory of the new VM in MiB
    pub memory_mib: u32,
    /// Log commands instead of running them
    pub dry_run: bool,
    /// Replace an existing VM without asking
    pub force: bool,
}

impl DeployRequest {
    pub fn new(template_id: u32, snapshot: impl Into<String>, vm_id: u32) -> Self {
        Self {
            template_id,
            snapshot: snapshot.into(),
            vm_id,
            memory_mib: DEFAULT_MEMORY_MIB,
            dry_run: false,
            force: false,
        }
    }

    pub fn with_memory(mut self, memory_mib: u32) -> Self {
        self.memory_mib = memory_mib;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    fn validate(&self, node: &NodeParams) -> Result<()> {
        if self.template_id == self.vm_id {
            return Err(ProxmoxError::InvalidInput(format!(
                "new VM ID {} equals the template ID",
                self.vm_id
            )));
        }
        if self.memory_mib == 0 {
            return Err(ProxmoxError::InvalidInput("memory must be positive".into()));
        }
        check_identifier("snapshot name", &self.snapshot)?;
        check_identifier("storage name", &node.storage)?;
        Ok(())
    }
}

/// Proxmox IDs for snapshots and storages: letters, digits, `-`, `_`, `.`.
fn check_identifier(what: &str, value: &str) -> Result<()> {
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(ProxmoxError::InvalidInput(format!("invalid {}: '{}'", what, value)))
    }
}

/// Result of a deployment run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployOutcome {
    pub id: u32,
    /// Guest address; `None` on timeout or abort
    pub ip: Option<String>,
    /// The operator declined to replace an existing VM
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub aborted: bool,
}

/// Runs the deployment state machine against one node.
pub struct Deployer<'a> {
    executor: &'a RemoteExecutor,
    node: &'a NodeParams,
    resolver: &'a dyn ConflictResolver,
    poll: PollConfig,
    history: Vec<DeployState>,
}

impl<'a> Deployer<'a> {
    pub fn new(
        executor: &'a RemoteExecutor,
        node: &'a NodeParams,
        resolver: &'a dyn ConflictResolver,
    ) -> Self {
        Self {
            executor,
            node,
            resolver,
            poll: PollConfig::default(),
            history: vec![DeployState::Init],
        }
    }

    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// States visited so far, starting with `INIT`.
    pub fn history(&self) -> &[DeployState] {
        &self.history
    }

    pub fn state(&self) -> DeployState {
        self.history.last().copied().unwrap_or(DeployState::Init)
    }

    fn transition(&mut self, next: DeployState) {
        info!(from = %self.state(), to = %next, "Deployment state");
        self.history.push(next);
    }

    /// Deploy `request`, closing the session on every path out.
    #[instrument(skip(self, request), fields(
        node = %self.node.name,
        template_id = request.template_id,
        vm_id = request.vm_id,
        dry_run = request.dry_run,
    ))]
    pub async fn run(&mut self, request: &DeployRequest) -> Result<DeployOutcome> {
        request.validate(self.node)?;

        info!(
            "Starting deployment: tpl={} snap={} new_id={} node={}",
            request.template_id, request.snapshot, request.vm_id, self.node.name
        );

        self.executor.connect(request.dry_run).await?;
        let result = self.run_connected(request).await;
        self.executor.close().await;

        if let Err(e) = &result {
            error!(state = %self.state(), error = %e, "Deployment failed");
        }
        result
    }

    async fn run_connected(&mut self, request: &DeployRequest) -> Result<DeployOutcome> {
        let vm_id = request.vm_id;
        let dry_run = request.dry_run;
        let opts = ExecOptions::new().dry_run(dry_run);
        self.transition(DeployState::Connected);

        let exists = self.vm_exists(vm_id, dry_run).await?;
        self.transition(DeployState::ExistenceChecked);

        if exists {
            if request.force {
                warn!("VM {} exists, force flag set, replacing", vm_id);
            } else {
                error!("VM {} already exists", vm_id);
                if !dry_run && !self.resolver.confirm_destroy(vm_id).await {
                    info!("Operation aborted by user");
                    self.transition(DeployState::Aborted);
                    return Ok(DeployOutcome {
                        id: vm_id,
                        ip: None,
                        aborted: true,
                    });
                }
                warn!("Stopping VM {} (approved)", vm_id);
            }
            self.stop_best_effort(vm_id, dry_run).await;
            self.transition(DeployState::ConflictResolved);

            let report = cleanup_ram_vms(self.executor, &self.node.storage, dry_run).await;
            if !dry_run && !report.destroyed.contains(&vm_id) {
                return Err(ProxmoxError::UnsafeToDestroy {
                    vm_id,
                    reason: format!(
                        "it still exists and is not entirely on storage '{}'",
                        self.node.storage
                    ),
                });
            }
        } else {
            self.transition(DeployState::Clean);
        }

        prepare_storage(
            self.executor,
            &self.node.storage_path,
            self.node.ram_disk_size_gb,
            dry_run,
            false,
        )
        .await?;
        self.transition(DeployState::StorageReady);

        info!(
            "Cloning tpl {} -> VM {} to storage '{}'",
            request.template_id, vm_id, self.node.storage
        );
        let clone = qm::clone_and_configure(
            request.template_id,
            vm_id,
            &request.snapshot,
            &self.node.storage,
            request.memory_mib,
        );
        self.executor.execute(&clone, opts).await?;
        self.transition(DeployState::Cloned);

        info!("Starting VM {}", vm_id);
        self.executor.execute(&qm::start(vm_id), opts).await?;
        self.transition(DeployState::Started);

        let ip = wait_for_ip(self.executor, vm_id, dry_run, &self.poll).await;
        self.transition(if ip.is_some() {
            DeployState::IpFound
        } else {
            DeployState::IpTimeout
        });

        Ok(DeployOutcome {
            id: vm_id,
            ip,
            aborted: false,
        })
    }

    /// A failed status query means the VM is absent. Dry-run sends no
    /// query and assumes the VM exists so the replacement steps are shown.
    async fn vm_exists(&self, vm_id: u32, dry_run: bool) -> Result<bool> {
        if dry_run {
            warn!("[DRY-RUN] Assuming VM {} exists", vm_id);
            return Ok(true);
        }
        let probe = self.executor.probe(&qm::status(vm_id)).await?;
        debug!(vm_id, exists = probe.is_found(), "Existence check");
        Ok(probe.is_found())
    }

    async fn stop_best_effort(&self, vm_id: u32, dry_run: bool) {
        let opts = ExecOptions::new().dry_run(dry_run).quiet().ignore_errors();
        if let Err(e) = self.executor.execute(&qm::stop(vm_id), opts).await {
            debug!(vm_id, error = %e, "Stop failed (ignored)");
        }
    }
}
