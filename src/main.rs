use clap::{Args, Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use vmshift::client_pool::ClientPool;
use vmshift::convert::{ClusterCompute, Converter, MappedDatastore, MappedNetwork};
use vmshift::host_pool::{HostPool, HostPoolConfig};
use vmshift::progress::UpdatableStdout;
use vmshift::relocate::VmRelocator;
use vmshift::thumbprint::{NullThumbprinter, Thumbprinter};
use vmshift::vim::{DisconnectedConnector, VimConnector};
use vmshift::vm_migrator::VmMigrator;
use vmshift::vm_source::{NullOrchestratorClient, OrchestratorClient, SourceVm};
use vmshift::{log_debug, logger, FoundationMigrator, MigrateError, MigrationConfig, Result};

#[derive(Parser)]
#[command(name = "vmshift")]
#[command(about = "Cross-vCenter VM fleet migration tool")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate all deployment VMs from the source clusters to the target clusters
    Migrate(MigrateArgs),
    /// Run the migration in reverse, moving VMs back to the source clusters
    Revert(MigrateArgs),
    /// Migrate a single VM with all mappings and endpoints given as flags
    MigrateVm(MigrateVmArgs),
    /// Show version information
    Version,
}

#[derive(Args)]
struct MigrateArgs {
    /// Path to the migration config file
    #[arg(long, default_value = "migrate.toml")]
    config: PathBuf,

    /// Orchestrator client secret
    #[arg(long, env = "ORCHESTRATOR_CLIENT_SECRET")]
    orchestrator_client_secret: Option<String>,

    /// Password for every source vcenter
    #[arg(long, env = "SOURCE_PASSWORD")]
    source_password: Option<String>,

    /// Password for every target vcenter, defaults to the source password
    #[arg(long, env = "TARGET_PASSWORD")]
    target_password: Option<String>,

    /// Do not perform any migration operations
    #[arg(long)]
    dry_run: bool,

    /// Set log level to debug
    #[arg(long)]
    debug: bool,

    /// Do not redact sensitive information when printing debug logs
    #[arg(long)]
    no_redact: bool,
}

#[derive(Args)]
struct MigrateVmArgs {
    /// Source vcenter hostname
    #[arg(long, env = "SOURCE_VCENTER_HOST")]
    source_vcenter_host: String,

    /// Source datacenter name (where the VM is now)
    #[arg(long)]
    source_datacenter: String,

    /// Username for the source vcenter
    #[arg(long, env = "SOURCE_USERNAME")]
    source_username: String,

    /// Password for the source vcenter
    #[arg(long, env = "SOURCE_PASSWORD")]
    source_password: String,

    /// Source virtual machine name
    #[arg(long)]
    source_vmname: String,

    /// True if the source vcenter uses a self-signed cert
    #[arg(long, env = "SOURCE_INSECURE")]
    source_insecure: bool,

    /// Target vcenter hostname
    #[arg(long, env = "TARGET_VCENTER_HOST")]
    target_vcenter_host: String,

    /// Target datacenter name (where you want the VM to go)
    #[arg(long)]
    target_datacenter: String,

    /// Target resource pool name
    #[arg(long, default_value = "")]
    target_resource_pool: String,

    /// Username for the target vcenter
    #[arg(long, env = "TARGET_USERNAME")]
    target_username: String,

    /// Password for the target vcenter
    #[arg(long, env = "TARGET_PASSWORD")]
    target_password: String,

    /// True if the target vcenter uses a self-signed cert
    #[arg(long, env = "TARGET_INSECURE")]
    target_insecure: bool,

    /// Source to target network name mapping, e.g. --network-mapping 'Net-A=Net-B'
    #[arg(long = "network-mapping")]
    network_mapping: Vec<String>,

    /// Source to target datastore name mapping, e.g. --datastore-mapping 'DS-A=DS-B'
    #[arg(long = "datastore-mapping", required = true)]
    datastore_mapping: Vec<String>,

    /// Source to target cluster name mapping, e.g. --cluster-mapping 'C-A=C-B'
    #[arg(long = "cluster-mapping", required = true)]
    cluster_mapping: Vec<String>,

    /// Do not perform any migration operations
    #[arg(long)]
    dry_run: bool,

    /// Set log level to debug
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Migrate(args) => run_migrate(args, false).await,
        Commands::Revert(args) => run_migrate(args, true).await,
        Commands::MigrateVm(args) => run_migrate_vm(args).await,
        Commands::Version => {
            println!("vmshift {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run_migrate(args: MigrateArgs, reverse: bool) -> Result<()> {
    logger::init(args.debug);

    let mut config = MigrationConfig::from_file(&args.config)?;
    apply_overrides(&mut config, &args)?;
    if reverse {
        config = config.reversed();
    }
    log_debug!("Combined config:\n{}", config.to_debug_string(!args.no_redact));

    let connector: Arc<dyn VimConnector> = Arc::new(DisconnectedConnector);
    let thumbprinter: Arc<dyn Thumbprinter> = Arc::new(NullThumbprinter);
    let orchestrator: Box<dyn OrchestratorClient> = Box::new(NullOrchestratorClient);

    let migrator = FoundationMigrator::from_config(&config, connector, thumbprinter, orchestrator)?;
    migrator.migrate().await
}

fn apply_overrides(config: &mut MigrationConfig, args: &MigrateArgs) -> Result<()> {
    if let Some(secret) = &args.orchestrator_client_secret {
        match config.orchestrator.as_mut() {
            Some(orchestrator) => orchestrator.client_secret = secret.clone(),
            None => {
                return Err(MigrateError::ConfigError(
                    "orchestrator client secret provided on command line but no orchestrator \
                     configuration section was found in the config file"
                        .to_string(),
                ))
            }
        }
    }

    if let Some(password) = &args.source_password {
        for az in &mut config.compute.source {
            az.vcenter.password = password.clone();
        }
    }
    // in case source and target vcenter are the same
    let target_password = args
        .target_password
        .as_ref()
        .or(args.source_password.as_ref());
    if let Some(password) = target_password {
        for az in &mut config.compute.target {
            az.vcenter.password = password.clone();
        }
    }

    config.dry_run = config.dry_run || args.dry_run;
    Ok(())
}

async fn run_migrate_vm(args: MigrateVmArgs) -> Result<()> {
    logger::init(args.debug);

    let networks = parse_mappings(&args.network_mapping)?;
    let datastores = parse_mappings(&args.datastore_mapping)?;
    let clusters = parse_mappings(&args.cluster_mapping)?;

    let connector: Arc<dyn VimConnector> = Arc::new(DisconnectedConnector);
    let thumbprinter: Arc<dyn Thumbprinter> = Arc::new(NullThumbprinter);

    // a single synthetic AZ keys the one source/target endpoint pair
    let az = "default";
    let mut pool = ClientPool::new(connector, thumbprinter);
    pool.add_source(
        az,
        &args.source_vcenter_host,
        &args.source_username,
        &args.source_password,
        &args.source_datacenter,
        args.source_insecure,
    );
    pool.add_target(
        az,
        &args.target_vcenter_host,
        &args.target_username,
        &args.target_password,
        &args.target_datacenter,
        args.target_insecure,
    );
    let clients = Arc::new(pool);

    let hp_config = HostPoolConfig {
        azs: HashMap::from([(az.to_string(), clusters.values().cloned().collect())]),
    };
    let host_pool = Arc::new(HostPool::new(Arc::clone(&clients), hp_config));

    let out = Arc::new(UpdatableStdout::new());
    let relocator = VmRelocator::new(
        Arc::clone(&clients),
        Arc::clone(&host_pool),
        Arc::clone(&out),
    )
    .with_dry_run(args.dry_run);

    let converter = Converter::new(
        Box::new(MappedNetwork::new(networks)),
        Box::new(MappedDatastore::new(datastores)),
        Box::new(ClusterCompute::new(
            clusters.clone(),
            &args.target_datacenter,
            &args.target_resource_pool,
        )),
    );

    let migrator = VmMigrator::new(Arc::clone(&clients), converter, relocator, out);
    let vm = SourceVm {
        name: args.source_vmname.clone(),
        az: az.to_string(),
        clusters: clusters.keys().cloned().collect(),
    };

    let result = migrator.migrate(&vm).await;
    clients.close().await;
    result
}

fn parse_mappings(raw: &[String]) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();
    for entry in raw {
        let (src, dst) = entry.split_once('=').ok_or_else(|| {
            MigrateError::ConfigError(format!(
                "expected mapping in SOURCE=TARGET form, but got '{}'",
                entry
            ))
        })?;
        map.insert(src.to_string(), dst.to_string());
    }
    Ok(map)
}
