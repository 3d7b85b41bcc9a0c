use crate::thumbprint::Thumbprinter;
use crate::vim::{ManagedRef, VimBackend, VimConnector};
use crate::{log_debug, log_info, log_warn, MigrateError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OnceCell;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// A source VM as discovered in its vCenter inventory. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vm {
    pub name: String,
    pub az: String,
    pub datacenter: String,
    pub cluster: String,
    pub resource_pool: String,
    pub folder: String,
    pub disks: Vec<crate::vim::Disk>,
    pub networks: Vec<String>,
}

/// The migration plan for one VM.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TargetSpec {
    pub name: String,
    pub datacenter: String,
    pub cluster: String,
    pub resource_pool: String,
    pub folder: String,
    pub datastores: HashMap<String, String>,
    pub networks: HashMap<String, String>,
}

impl TargetSpec {
    /// Fully qualified pool path, avoids "multiple found" errors on short
    /// names. An empty or default pool resolves to the cluster root pool.
    pub fn fully_qualified_resource_pool(&self) -> String {
        if self.resource_pool.contains('/') {
            return self.resource_pool.clone();
        }
        let mut rp = format!("/{}/host/{}/Resources", self.datacenter, self.cluster);
        if !self.resource_pool.is_empty() && self.resource_pool != "Resources" {
            rp.push('/');
            rp.push_str(&self.resource_pool);
        }
        rp
    }
}

/// A lazily-authenticated vCenter client.
///
/// The first caller performs the login; later callers observe the memoized
/// session or the memoized failure. A keep-alive loop issues a current-time
/// call every five minutes once the session exists.
pub struct Client {
    host: String,
    username: String,
    password: String,
    datacenter: String,
    insecure: bool,

    connector: Arc<dyn VimConnector>,
    thumbprinter: Arc<dyn Thumbprinter>,
    session: OnceCell<std::result::Result<Arc<dyn VimBackend>, MigrateError>>,
    thumb: OnceCell<std::result::Result<String, MigrateError>>,
    keepalive: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Client {
    pub fn new(
        host: &str,
        username: &str,
        password: &str,
        datacenter: &str,
        insecure: bool,
        connector: Arc<dyn VimConnector>,
        thumbprinter: Arc<dyn Thumbprinter>,
    ) -> Self {
        Client {
            host: host.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            datacenter: datacenter.to_string(),
            insecure,
            connector,
            thumbprinter,
            session: OnceCell::new(),
            thumb: OnceCell::new(),
            keepalive: Mutex::new(None),
        }
    }

    pub fn host_name(&self) -> &str {
        &self.host
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn datacenter(&self) -> &str {
        &self.datacenter
    }

    pub fn insecure(&self) -> bool {
        self.insecure
    }

    pub fn url(&self) -> String {
        format!("https://{}/sdk", self.host)
    }

    pub fn is_same_vcenter(&self, host: &str, username: &str, password: &str, insecure: bool) -> bool {
        self.host == host
            && self.username == username
            && self.password == password
            && self.insecure == insecure
    }

    /// The memoized session, created on first use.
    pub async fn session(&self) -> Result<Arc<dyn VimBackend>> {
        let res = self
            .session
            .get_or_init(|| async {
                log_debug!("Creating vCenter session for {}", self.host);
                match self
                    .connector
                    .connect(&self.host, &self.username, &self.password, self.insecure)
                    .await
                {
                    Ok(backend) => {
                        self.spawn_keepalive(Arc::clone(&backend));
                        Ok(backend)
                    }
                    Err(e) => Err(e),
                }
            })
            .await;
        res.clone()
    }

    fn spawn_keepalive(&self, backend: Arc<dyn VimBackend>) {
        let host = self.host.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(KEEPALIVE_INTERVAL);
            ticker.tick().await; // first tick is immediate, skip it
            loop {
                ticker.tick().await;
                log_info!("Executing session keep-alive for {}", host);
                match backend.current_time().await {
                    Ok(t) => log_debug!("vCenter {} current time: {}", host, t),
                    Err(e) => log_warn!("Keep-alive for {} failed: {}", host, e),
                }
            }
        });
        *self.keepalive.lock().unwrap() = Some(handle);
    }

    /// The destination endpoint's certificate thumbprint, fetched once and
    /// memoized.
    pub async fn thumbprint(&self) -> Result<String> {
        let res = self
            .thumb
            .get_or_init(|| async {
                match self.thumbprinter.retrieve_sha1(&self.host, 443).await {
                    Ok(thumb) => {
                        log_debug!("{}:443 cert thumbprint is: {}", self.host, thumb);
                        Ok(thumb)
                    }
                    Err(e) => Err(MigrateError::TransportError(format!(
                        "failed to get {}:443 cert thumbprint: {}",
                        self.host, e
                    ))),
                }
            })
            .await;
        res.clone()
    }

    /// Finds a VM by name, requiring it to reside in one of the candidate
    /// clusters. A VM that exists elsewhere reports as not found so that
    /// already-migrated VMs are not re-discovered in target clusters.
    pub async fn find_vm_in_clusters(
        &self,
        az_name: &str,
        vm_name: &str,
        clusters: &[String],
    ) -> Result<Vm> {
        let vm = self.find_vm(az_name, vm_name).await?;

        let found = clusters
            .iter()
            .any(|c| c.eq_ignore_ascii_case(&vm.cluster));
        if !found {
            return Err(MigrateError::VmNotFound {
                name: vm_name.to_string(),
                reason: format!("VM exists, but not in clusters {}", clusters.join(", ")),
            });
        }

        Ok(vm)
    }

    pub async fn find_vm(&self, az_name: &str, vm_name: &str) -> Result<Vm> {
        let backend = self.session().await?;

        let handle = backend
            .find_vm(&self.datacenter, vm_name)
            .await?
            .ok_or_else(|| MigrateError::VmNotFound {
                name: vm_name.to_string(),
                reason: format!("failed to find virtual machine {}", vm_name),
            })?;

        log_debug!("Getting VM {} placement details", vm_name);
        let cluster = backend.vm_cluster(&handle).await?;
        let resource_pool = backend.vm_resource_pool(&handle).await?;
        let networks = backend.vm_networks(&handle).await?;
        let disks = backend.vm_disks(&handle).await?;

        let folder = match handle.inventory_path.rsplit_once('/') {
            Some((dir, _)) => dir.to_string(),
            None => String::new(),
        };

        Ok(Vm {
            name: handle.name.clone(),
            az: az_name.to_string(),
            datacenter: self.datacenter.clone(),
            cluster,
            resource_pool,
            folder,
            disks,
            networks,
        })
    }

    /// Creates the folder path level by level, including missing parents.
    /// Races with sibling workers creating the same level are tolerated by
    /// re-reading. Returns the reference of the final folder.
    pub async fn create_folder(&self, folder_path: &str) -> Result<ManagedRef> {
        log_debug!("Creating folder {}", folder_path);
        let backend = self.session().await?;

        let parts: Vec<&str> = folder_path.split('/').filter(|p| !p.is_empty()).collect();
        if parts.len() < 2 {
            return Err(MigrateError::LookupError(format!(
                "expected a folder path with at least 2 base parts, but got '{}'",
                folder_path
            )));
        }

        // the base /<dc>/<vm|host|storage|network> level must pre-exist
        let mut cur_path = format!("/{}/{}", parts[0], parts[1]);
        let mut cur_ref = backend
            .folder(&self.datacenter, &cur_path)
            .await?
            .ok_or_else(|| {
                MigrateError::LookupError(format!("could not find base folder '{}'", cur_path))
            })?;

        for part in &parts[2..] {
            let next_path = format!("{}/{}", cur_path, part);
            let next_ref = match backend.folder(&self.datacenter, &next_path).await? {
                Some(r) => r,
                None => match backend.create_folder(&self.datacenter, &cur_path, part).await {
                    Ok(r) => r,
                    Err(e) if e.to_string().contains("already exists") => {
                        // a sibling worker just created it, re-read
                        log_debug!("Another worker already created '{}', continuing", next_path);
                        backend
                            .folder(&self.datacenter, &next_path)
                            .await?
                            .ok_or_else(|| {
                                MigrateError::LookupError(format!(
                                    "folder '{}' already exists, but can't find it",
                                    next_path
                                ))
                            })?
                    }
                    Err(e) => {
                        return Err(MigrateError::LookupError(format!(
                            "could not create new sub-folder '{}': {}",
                            next_path, e
                        )))
                    }
                },
            };
            cur_path = next_path;
            cur_ref = next_ref;
        }

        Ok(cur_ref)
    }

    /// Logs out the underlying session if one was ever created.
    pub async fn logout(&self) {
        if let Some(handle) = self.keepalive.lock().unwrap().take() {
            handle.abort();
        }
        if let Some(Ok(backend)) = self.session.get() {
            if let Err(e) = backend.logout().await {
                log_warn!("vSphere logout failed: {}", e);
            }
        }
    }
}
