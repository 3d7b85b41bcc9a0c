use crate::thumbprint::Thumbprinter;
use crate::vcenter::Client;
use crate::vim::VimConnector;
use std::collections::HashMap;
use std::sync::Arc;

/// A pool of vCenter clients keyed by AZ role.
///
/// Clients are de-duplicated on the (host, username, password, insecure)
/// tuple: two AZs pointing at the same endpoint share one client, and an AZ
/// whose source and target endpoints match shares one client for both roles.
/// Populated before workers start; read-only afterwards.
pub struct ClientPool {
    connector: Arc<dyn VimConnector>,
    thumbprinter: Arc<dyn Thumbprinter>,
    source_clients_by_az: HashMap<String, Arc<Client>>,
    target_clients_by_az: HashMap<String, Arc<Client>>,
    clients: Vec<Arc<Client>>,
}

impl ClientPool {
    pub fn new(connector: Arc<dyn VimConnector>, thumbprinter: Arc<dyn Thumbprinter>) -> Self {
        ClientPool {
            connector,
            thumbprinter,
            source_clients_by_az: HashMap::new(),
            target_clients_by_az: HashMap::new(),
            clients: Vec::new(),
        }
    }

    /// Adds a source AZ/client pair, reusing any client with a matching
    /// endpoint tuple. A no-op when the AZ already has a source client.
    pub fn add_source(
        &mut self,
        az: &str,
        host: &str,
        username: &str,
        password: &str,
        datacenter: &str,
        insecure: bool,
    ) {
        if self.source_clients_by_az.contains_key(az) {
            return;
        }
        let client = self.get_or_create(host, username, password, datacenter, insecure);
        self.source_clients_by_az.insert(az.to_string(), client);
    }

    /// Adds a target AZ/client pair, reusing any client with a matching
    /// endpoint tuple. A no-op when the AZ already has a target client.
    pub fn add_target(
        &mut self,
        az: &str,
        host: &str,
        username: &str,
        password: &str,
        datacenter: &str,
        insecure: bool,
    ) {
        if self.target_clients_by_az.contains_key(az) {
            return;
        }
        let client = self.get_or_create(host, username, password, datacenter, insecure);
        self.target_clients_by_az.insert(az.to_string(), client);
    }

    pub fn source_client_by_az(&self, az: &str) -> Option<Arc<Client>> {
        self.source_clients_by_az.get(az).cloned()
    }

    pub fn target_client_by_az(&self, az: &str) -> Option<Arc<Client>> {
        self.target_clients_by_az.get(az).cloned()
    }

    /// All distinct underlying clients.
    pub fn clients(&self) -> &[Arc<Client>] {
        &self.clients
    }

    pub fn source_azs(&self) -> Vec<String> {
        self.source_clients_by_az.keys().cloned().collect()
    }

    pub fn target_azs(&self) -> Vec<String> {
        self.target_clients_by_az.keys().cloned().collect()
    }

    /// Logs out every distinct client.
    pub async fn close(&self) {
        for client in &self.clients {
            client.logout().await;
        }
    }

    fn get_or_create(
        &mut self,
        host: &str,
        username: &str,
        password: &str,
        datacenter: &str,
        insecure: bool,
    ) -> Arc<Client> {
        if let Some(existing) = self
            .clients
            .iter()
            .find(|c| c.is_same_vcenter(host, username, password, insecure))
        {
            return Arc::clone(existing);
        }

        let client = Arc::new(Client::new(
            host,
            username,
            password,
            datacenter,
            insecure,
            Arc::clone(&self.connector),
            Arc::clone(&self.thumbprinter),
        ));
        self.clients.push(Arc::clone(&client));
        client
    }
}
