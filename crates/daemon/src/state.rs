//! Shared daemon state

use crate::admin::AdminService;
use crate::config::{BackendKind, DaemonConfig};
use std::sync::Arc;
use tracing::info;
use wgplane_common::repository::{CommandRepository, SimulationRepository};
use wgplane_common::runner::{CommandRunner, TokioCommandRunner};
use wgplane_common::{Database, InterfaceLocks, Repository, Result, Stores};

/// Everything the daemon's handlers and bootstrap share
#[derive(Clone)]
pub struct DaemonState {
    config: DaemonConfig,
    db: Database,
    stores: Stores,
    repo: Arc<dyn Repository>,
    /// Present only for the command backend; bootstrap needs its host helpers
    command: Option<Arc<CommandRepository>>,
    locks: InterfaceLocks,
}

impl DaemonState {
    /// Open the database under the store path and build the configured backend.
    pub fn new(config: &DaemonConfig) -> Result<Self> {
        let db = Database::open(config.db_path())?;
        let runner: Arc<dyn CommandRunner> = Arc::new(TokioCommandRunner::new(config.command_timeout()));
        Ok(Self::with_database(config, db, runner))
    }

    /// Build state over an existing database and command runner.
    pub fn with_database(config: &DaemonConfig, db: Database, runner: Arc<dyn CommandRunner>) -> Self {
        let stores = Stores::new(&db);

        let (repo, command): (Arc<dyn Repository>, Option<Arc<CommandRepository>>) = match config.backend {
            BackendKind::Command => {
                let command = Arc::new(CommandRepository::new(runner, config.firewall.clone()));
                let repo: Arc<dyn Repository> = command.clone();
                (repo, Some(command))
            }
            BackendKind::Simulation => {
                let repo: Arc<dyn Repository> = Arc::new(SimulationRepository::new(
                    stores.interfaces.clone(),
                    stores.peers.clone(),
                ));
                (repo, None)
            }
        };
        info!("Using {} backend", repo.backend());

        Self {
            config: config.clone(),
            db,
            stores,
            repo,
            command,
            locks: InterfaceLocks::new(),
        }
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn repo(&self) -> &Arc<dyn Repository> {
        &self.repo
    }

    pub fn command_repo(&self) -> Option<&Arc<CommandRepository>> {
        self.command.as_ref()
    }

    pub fn locks(&self) -> &InterfaceLocks {
        &self.locks
    }

    pub fn admin(&self) -> AdminService {
        AdminService::new(self.repo.clone(), self.stores.clone(), self.locks.clone())
    }
}
