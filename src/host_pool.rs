use crate::client_pool::ClientPool;
use crate::vim::HostInfo;
use crate::{log_debug, log_warn, MigrateError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;

/// Destination clusters per target AZ, taken from config.
#[derive(Debug, Clone, Default)]
pub struct HostPoolConfig {
    pub azs: HashMap<String, Vec<String>>,
}

struct HostRef {
    host: HostInfo,
    lease_count: u32,
    leased_at: Option<Instant>,
    released_at: Option<Instant>,
}

/// Enforces the per-destination-host in-flight relocate cap.
///
/// Hosts are indexed by target AZ; a single mutex serializes every lease and
/// release. Lease counts never exceed `max_lease_per_host`.
pub struct HostPool {
    pub max_lease_per_host: u32,
    pub lease_wait_timeout: Duration,
    pub lease_check_interval: Duration,

    clients: Arc<ClientPool>,
    config: HostPoolConfig,
    init: OnceCell<()>,
    hosts_by_az: Mutex<HashMap<String, Vec<HostRef>>>,
}

impl HostPool {
    pub fn new(clients: Arc<ClientPool>, config: HostPoolConfig) -> Self {
        HostPool {
            // a hypervisor concurrency limit; could be higher without
            // storage vmotion
            max_lease_per_host: 1,
            lease_wait_timeout: Duration::from_secs(30 * 60),
            lease_check_interval: Duration::from_secs(30),
            clients,
            config,
            init: OnceCell::new(),
            hosts_by_az: Mutex::new(HashMap::new()),
        }
    }

    /// Builds the AZ-indexed host table, skipping hosts in maintenance mode.
    /// Idempotent; concurrent callers share one initialization.
    pub async fn initialize(&self) -> Result<()> {
        self.init
            .get_or_try_init(|| async {
                let mut table: HashMap<String, Vec<HostRef>> = HashMap::new();

                for (az, clusters) in &self.config.azs {
                    let client = self.clients.target_client_by_az(az).ok_or_else(|| {
                        MigrateError::LookupError(format!(
                            "no target vcenter client for AZ {}",
                            az
                        ))
                    })?;
                    let backend = client.session().await?;

                    let mut refs = Vec::new();
                    for cluster in clusters {
                        log_debug!("Listing hosts in AZ {} cluster {}", az, cluster);
                        let hosts = backend.cluster_hosts(client.datacenter(), cluster).await?;
                        for host in hosts {
                            if host.in_maintenance {
                                log_debug!(
                                    "Found host {} in maintenance mode, ignoring",
                                    host.name
                                );
                                continue;
                            }
                            log_debug!("Adding host {} to host pool", host.name);
                            refs.push(HostRef {
                                host,
                                lease_count: 0,
                                leased_at: None,
                                released_at: None,
                            });
                        }
                    }
                    table.insert(az.clone(), refs);
                }

                *self.hosts_by_az.lock().unwrap() = table;
                Ok(())
            })
            .await
            .map(|_| ())
    }

    /// Leases the best available host in the AZ, or `Ok(None)` when every
    /// host is at the cap; callers should wait and retry. Release must be
    /// called once the relocate finishes.
    pub fn lease_available_host(&self, az: &str) -> Result<Option<HostInfo>> {
        let mut table = self.hosts_by_az.lock().unwrap();
        let refs = table.get_mut(az).ok_or_else(|| {
            MigrateError::LookupError(format!("found no hosts in AZ {}", az))
        })?;

        // hosts at the lowest lease count are candidates; if none are at
        // zero try one, and so on up to the cap
        let mut candidates: Vec<usize> = Vec::new();
        for optimal in 0..self.max_lease_per_host {
            for (i, r) in refs.iter().enumerate() {
                if r.lease_count == optimal {
                    candidates.push(i);
                }
            }
            if !candidates.is_empty() {
                break;
            }
        }

        if candidates.is_empty() {
            log_debug!(
                "Found no hosts in AZ {} with fewer than {} leases",
                az,
                self.max_lease_per_host
            );
            return Ok(None);
        }

        // spread load away from the most recently busy host: the candidate
        // whose latest release is oldest wins, never-released hosts first
        let chosen = candidates
            .into_iter()
            .min_by_key(|&i| refs[i].released_at)
            .unwrap();

        let r = &mut refs[chosen];
        r.lease_count += 1;
        r.leased_at = Some(Instant::now());
        log_debug!(
            "Leased host {} in AZ {} ({} leases)",
            r.host.name,
            az,
            r.lease_count
        );
        Ok(Some(r.host.clone()))
    }

    /// Polls for a lease until one is acquired or the timeout expires.
    pub async fn wait_for_lease_available_host(&self, az: &str) -> Result<HostInfo> {
        let deadline = Instant::now() + self.lease_wait_timeout;
        let mut ticker = tokio::time::interval(self.lease_check_interval);

        loop {
            ticker.tick().await;
            if let Some(host) = self.lease_available_host(az)? {
                return Ok(host);
            }
            if Instant::now() >= deadline {
                return Err(MigrateError::HostLeaseTimeout {
                    az: az.to_string(),
                    minutes: self.lease_wait_timeout.as_secs() / 60,
                });
            }
        }
    }

    /// Returns a leased host to the pool. An unknown host is logged as a
    /// potential leak but is not fatal.
    pub fn release(&self, host: &HostInfo) {
        let mut table = self.hosts_by_az.lock().unwrap();
        for refs in table.values_mut() {
            for r in refs.iter_mut() {
                if r.host.moref == host.moref {
                    if let Some(leased_at) = r.leased_at {
                        log_debug!(
                            "Releasing lease on host {} held for {:?}",
                            host.name,
                            leased_at.elapsed()
                        );
                    }
                    r.lease_count = r.lease_count.saturating_sub(1);
                    r.released_at = Some(Instant::now());
                    return;
                }
            }
        }
        log_warn!("Could not find lease on host {}, is there a ref leak?", host.name);
    }

    /// Current lease count for a host, for probes in tests.
    pub fn lease_count(&self, az: &str, host_name: &str) -> Option<u32> {
        let table = self.hosts_by_az.lock().unwrap();
        table
            .get(az)?
            .iter()
            .find(|r| r.host.name == host_name)
            .map(|r| r.lease_count)
    }
}
