use crate::backend::Backend;

/// Who a `ModelState` belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Owner {
    /// A slot that has trained locally since the last broadcast.
    Worker(usize),
    /// The merged state, or a slot still holding it untouched.
    Consensus,
}

/// A versioned snapshot of every trainable parameter and the optimizer state.
///
/// Versions only grow: a slot's state carries the version of the consensus it
/// was derived from, and each merge produces version + 1.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelState {
    version: u64,
    owner: Owner,
    params: Vec<f32>,
    updater: Vec<f32>,
}

impl ModelState {
    /// Creates a consensus state.
    pub fn consensus(version: u64, params: Vec<f32>, updater: Vec<f32>) -> Self {
        Self {
            version,
            owner: Owner::Consensus,
            params,
            updater,
        }
    }

    /// Snapshots a backend's parameters and optimizer state.
    ///
    /// # Arguments
    /// * `backend` - The replica to read.
    /// * `owner` - Who the snapshot is attributed to.
    /// * `version` - The consensus version the replica derives from.
    pub fn capture<B: Backend>(backend: &B, owner: Owner, version: u64) -> Self {
        Self {
            version,
            owner,
            params: backend.params(),
            updater: backend.updater_state(),
        }
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[inline]
    pub fn owner(&self) -> Owner {
        self.owner
    }

    #[inline]
    pub fn is_consensus(&self) -> bool {
        self.owner == Owner::Consensus
    }

    #[inline]
    pub fn params(&self) -> &[f32] {
        &self.params
    }

    #[inline]
    pub fn updater(&self) -> &[f32] {
        &self.updater
    }
}
