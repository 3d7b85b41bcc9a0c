use crate::client_pool::ClientPool;
use crate::config::MigrationConfig;
use crate::convert::{Az, AzMapping, Converter, MappedCompute, MappedDatastore, MappedNetwork};
use crate::duration;
use crate::host_pool::{HostPool, HostPoolConfig};
use crate::progress::UpdatableStdout;
use crate::relocate::VmRelocator;
use crate::thumbprint::Thumbprinter;
use crate::vim::VimConnector;
use crate::vm_migrator::VmMigrator;
use crate::vm_source::{OrchestratorClient, VmSource};
use crate::worker::WorkerPool;
use crate::{log_debug, log_info, MigrateError, Result};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

struct MigrationResult {
    id: usize,
    vm_name: String,
    err: Option<MigrateError>,
}

impl MigrationResult {
    fn success(&self) -> bool {
        self.err.is_none()
    }
}

/// Drives the whole deployment migration: fans VMs out to a fixed worker
/// pool and aggregates per-VM outcomes into a final summary.
pub struct FoundationMigrator {
    pub worker_count: usize,

    clients: Arc<ClientPool>,
    host_pool: Arc<HostPool>,
    vm_source: VmSource,
    vm_migrator: Arc<VmMigrator>,
    out: Arc<UpdatableStdout>,
}

impl FoundationMigrator {
    /// Wires every subsystem from config. The client pool is fully populated
    /// here, before any worker runs; workers treat it as read-only.
    pub fn from_config(
        config: &MigrationConfig,
        connector: Arc<dyn VimConnector>,
        thumbprinter: Arc<dyn Thumbprinter>,
        orchestrator: Box<dyn OrchestratorClient>,
    ) -> Result<Self> {
        log_info!(
            "Preparing deployment migration at {}",
            chrono::Local::now().to_rfc2822()
        );

        log_debug!("Creating vCenter client pool");
        let mut pool = ClientPool::new(connector, thumbprinter);
        for az in &config.compute.source {
            pool.add_source(
                &az.name,
                &az.vcenter.host,
                &az.vcenter.username,
                &az.vcenter.password,
                &az.vcenter.datacenter,
                az.vcenter.insecure,
            );
        }
        for az in &config.compute.target {
            pool.add_target(
                &az.name,
                &az.vcenter.host,
                &az.vcenter.username,
                &az.vcenter.password,
                &az.vcenter.datacenter,
                az.vcenter.insecure,
            );
        }
        let clients = Arc::new(pool);

        // one mapping per source AZ x source cluster x target cluster combo
        log_debug!("Creating AZ cluster mappings");
        let mut compute_map = Vec::new();
        for az in &config.compute.source {
            let target_az = config.compute.target_by_az(&az.name).ok_or_else(|| {
                MigrateError::ConfigError(format!(
                    "could not find a corresponding compute az target named {}",
                    az.name
                ))
            })?;
            for source_cluster in &az.clusters {
                for target_cluster in &target_az.clusters {
                    compute_map.push(AzMapping {
                        source: Az {
                            name: az.name.clone(),
                            datacenter: az.vcenter.datacenter.clone(),
                            cluster: source_cluster.name.clone(),
                            resource_pool: source_cluster.resource_pool.clone(),
                        },
                        target: Az {
                            name: target_az.name.clone(),
                            datacenter: target_az.vcenter.datacenter.clone(),
                            cluster: target_cluster.name.clone(),
                            resource_pool: target_cluster.resource_pool.clone(),
                        },
                    });
                }
            }
        }

        let converter = Converter::new(
            Box::new(MappedNetwork::new(config.networks.clone())),
            Box::new(MappedDatastore::new(config.datastores.clone())),
            Box::new(MappedCompute::new(compute_map)),
        );

        log_debug!("Creating vCenter host pool");
        let hp_config = HostPoolConfig {
            azs: config
                .compute
                .target
                .iter()
                .map(|t| {
                    (
                        t.name.clone(),
                        t.clusters.iter().map(|c| c.name.clone()).collect(),
                    )
                })
                .collect(),
        };
        let host_pool = Arc::new(HostPool::new(Arc::clone(&clients), hp_config));

        let out = Arc::new(UpdatableStdout::new());
        let relocator = VmRelocator::new(
            Arc::clone(&clients),
            Arc::clone(&host_pool),
            Arc::clone(&out),
        )
        .with_dry_run(config.dry_run);
        let vm_migrator = Arc::new(VmMigrator::new(
            Arc::clone(&clients),
            converter,
            relocator,
            Arc::clone(&out),
        ));
        let vm_source = VmSource::from_config(config, orchestrator);

        Ok(FoundationMigrator {
            worker_count: config.worker_pool_size,
            clients,
            host_pool,
            vm_source,
            vm_migrator,
            out,
        })
    }

    /// Runs the migration to completion. The client pool is logged out on
    /// every exit path.
    pub async fn migrate(&self) -> Result<()> {
        let start = Instant::now();
        log_info!(
            "Starting deployment migration at {}",
            chrono::Local::now().to_rfc2822()
        );

        let result = self.run(start).await;
        self.clients.close().await;
        result
    }

    async fn run(&self, start: Instant) -> Result<()> {
        let vms = self.vm_source.vms_to_migrate().await?;
        self.host_pool.initialize().await?;

        let vm_count = vms.len();
        let (tx, mut rx) = mpsc::unbounded_channel::<MigrationResult>();

        let workers = WorkerPool::new(self.worker_count);
        workers.start();

        for (i, vm) in vms.into_iter().enumerate() {
            let tx = tx.clone();
            let migrator = Arc::clone(&self.vm_migrator);
            workers.add_task(async move {
                let err = migrator.migrate(&vm).await.err();
                let _ = tx.send(MigrationResult {
                    id: i + 1,
                    vm_name: vm.name,
                    err,
                });
            });
        }
        drop(tx);

        let mut fail_count = 0;
        while let Some(result) = rx.recv().await {
            log_debug!("Task {} for VM {} completed", result.id, result.vm_name);
            if !result.success() {
                fail_count += 1;
            }
        }

        self.out.println_blank();
        self.out
            .print(&format!("Migrated {} out of {} VMs", vm_count - fail_count, vm_count));
        self.out.print(&format!(
            "Total runtime: {}",
            duration::human_readable(start.elapsed())
        ));

        if fail_count > 0 {
            return Err(MigrateError::FailedVms(fail_count));
        }
        Ok(())
    }
}
