use tessera_core::DeviceType;
use thiserror::Error;

/// Result type local to tessera-mem.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors fall in two disjoint classes: contract violations (caller bugs,
/// never worth retrying) and resource failures (the request may succeed if
/// retried smaller or against another allocator).
#[derive(Debug, Error)]
pub enum Error {
    #[error("allocation failed for {bytes} bytes on {device}")]
    AllocFailed { device: DeviceType, bytes: usize },

    #[error("memory cap exceeded: requested {requested} bytes, capacity {capacity}, used {used}")]
    BudgetExceeded {
        requested: usize,
        capacity: usize,
        used: usize,
    },

    #[error("allocator for {device} does not exist")]
    NotRegistered { device: DeviceType },

    #[error("storage must be uniquely owned, but use_count is {use_count}")]
    NotUnique { use_count: usize },

    #[error("precondition violated: {0}")]
    Precondition(String),

    #[error(transparent)]
    Core(#[from] tessera_core::Error),
}

impl Error {
    pub fn is_resource_failure(&self) -> bool {
        matches!(self, Error::AllocFailed { .. } | Error::BudgetExceeded { .. })
    }

    pub fn is_contract_violation(&self) -> bool {
        !self.is_resource_failure()
    }
}
