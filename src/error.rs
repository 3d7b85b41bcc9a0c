use std::fmt;

#[derive(Debug, Clone)]
pub enum MigrateError {
    ConfigError(String),
    VmNotFound { name: String, reason: String },
    AdapterNotFound { vm: String, network: String },
    MissingMapping(String),
    LookupError(String),
    HostLeaseTimeout { az: String, minutes: u64 },
    TaskError(String),
    AuthError(String),
    TransportError(String),
    FailedVms(usize),
    Internal(String),
    IoError(String),
    ParseError(String),
}

impl fmt::Display for MigrateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrateError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            MigrateError::VmNotFound { name, reason } => {
                write!(f, "{} VM not found: {}", name, reason)
            }
            MigrateError::AdapterNotFound { vm, network } => {
                write!(f, "no network interface found for VM {} on network {}", vm, network)
            }
            MigrateError::MissingMapping(msg) => write!(f, "{}", msg),
            MigrateError::LookupError(msg) => write!(f, "{}", msg),
            MigrateError::HostLeaseTimeout { az, minutes } => write!(
                f,
                "unable to find a target host in AZ {} after {} minutes, giving up",
                az, minutes
            ),
            MigrateError::TaskError(msg) => write!(f, "{}", msg),
            MigrateError::AuthError(msg) => write!(f, "Authentication error: {}", msg),
            MigrateError::TransportError(msg) => write!(f, "Transport error: {}", msg),
            MigrateError::FailedVms(count) => write!(
                f,
                "failed to migrate {} VMs, see run output for more details",
                count
            ),
            MigrateError::Internal(msg) => write!(f, "{}", msg),
            MigrateError::IoError(msg) => write!(f, "IO error: {}", msg),
            MigrateError::ParseError(msg) => write!(f, "Configuration parse error: {}", msg),
        }
    }
}

impl std::error::Error for MigrateError {}

impl MigrateError {
    /// True for the recoverable not-found case the VM migrator turns into a skip.
    pub fn is_vm_not_found(&self) -> bool {
        matches!(self, MigrateError::VmNotFound { .. })
    }

    /// Builds a task error from a hypervisor task's nested fault messages.
    pub fn task_from_faults(vm_name: &str, messages: &[String]) -> Self {
        if messages.is_empty() {
            MigrateError::TaskError(format!("error migrating VM {}", vm_name))
        } else {
            MigrateError::TaskError(format!(
                "error migrating VM {}: {}",
                vm_name,
                messages.join(", ")
            ))
        }
    }
}

impl From<std::io::Error> for MigrateError {
    fn from(err: std::io::Error) -> Self {
        MigrateError::IoError(err.to_string())
    }
}

impl From<toml::de::Error> for MigrateError {
    fn from(err: toml::de::Error) -> Self {
        MigrateError::ParseError(err.to_string())
    }
}

impl From<toml::ser::Error> for MigrateError {
    fn from(err: toml::ser::Error) -> Self {
        MigrateError::ParseError(err.to_string())
    }
}
