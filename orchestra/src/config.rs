use std::{collections::HashSet, fmt, num::NonZeroUsize};

use serde::{Deserialize, Serialize};

use crate::{
    averaging::Transport,
    error::{OrchestraErr, Result},
};

/// A compute device a worker slot is pinned to.
///
/// `Cpu(n)` names the n-th CPU compute lane; `Gpu(n)` a device index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    Cpu(usize),
    Gpu(usize),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu(i) => write!(f, "cpu:{i}"),
            Device::Gpu(i) => write!(f, "gpu:{i}"),
        }
    }
}

/// Immutable configuration of a training run.
///
/// Counts are `NonZeroUsize`, so a zero worker count or averaging frequency
/// is rejected when the value is built or deserialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub num_workers: NonZeroUsize,
    pub prefetch_buffer_capacity: NonZeroUsize,
    pub averaging_frequency: NonZeroUsize,
    pub use_legacy_averaging: bool,
    pub report_score_after_averaging: bool,
    pub epochs: NonZeroUsize,
    pub average_updaters: bool,
    pub abort_on_degraded: bool,
    pub devices: Option<Vec<Device>>,
}

const DEFAULT_WORKERS: NonZeroUsize = NonZeroUsize::new(2).unwrap();
const DEFAULT_PREFETCH: NonZeroUsize = NonZeroUsize::new(24).unwrap();
const DEFAULT_FREQUENCY: NonZeroUsize = NonZeroUsize::new(3).unwrap();
const DEFAULT_EPOCHS: NonZeroUsize = NonZeroUsize::new(2).unwrap();

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            num_workers: DEFAULT_WORKERS,
            prefetch_buffer_capacity: DEFAULT_PREFETCH,
            averaging_frequency: DEFAULT_FREQUENCY,
            use_legacy_averaging: true,
            report_score_after_averaging: true,
            epochs: DEFAULT_EPOCHS,
            average_updaters: true,
            abort_on_degraded: false,
            devices: None,
        }
    }
}

impl TrainingConfig {
    /// Checks the cross-field constraints the types can't express.
    ///
    /// # Returns
    /// `InvalidConfig` if an explicit device list doesn't hold exactly one
    /// distinct device per worker.
    pub fn validate(&self) -> Result<()> {
        let Some(devices) = &self.devices else {
            return Ok(());
        };

        if devices.len() != self.num_workers.get() {
            return Err(OrchestraErr::InvalidConfig(format!(
                "{} devices given for {} workers",
                devices.len(),
                self.num_workers
            )));
        }

        let mut seen = HashSet::with_capacity(devices.len());
        if let Some(dup) = devices.iter().find(|d| !seen.insert(**d)) {
            return Err(OrchestraErr::InvalidConfig(format!(
                "device {dup} assigned to more than one worker"
            )));
        }

        Ok(())
    }

    /// Returns the averaging transport selected by `use_legacy_averaging`.
    pub fn transport(&self) -> Transport {
        if self.use_legacy_averaging {
            Transport::Legacy
        } else {
            Transport::PeerToPeer
        }
    }

    /// Returns the device each worker slot is bound to.
    ///
    /// # Returns
    /// The explicit device list, or one `Cpu` lane per worker.
    pub fn devices(&self) -> Vec<Device> {
        match &self.devices {
            Some(devices) => devices.clone(),
            None => (0..self.num_workers.get()).map(Device::Cpu).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nz(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn defaults_are_valid_and_use_one_cpu_lane_per_worker() {
        let cfg = TrainingConfig::default();
        cfg.validate().unwrap();

        assert_eq!(cfg.prefetch_buffer_capacity.get(), 24);
        assert_eq!(cfg.transport(), Transport::Legacy);
        assert_eq!(cfg.devices(), vec![Device::Cpu(0), Device::Cpu(1)]);
    }

    #[test]
    fn device_list_must_match_worker_count() {
        let cfg = TrainingConfig {
            num_workers: nz(3),
            devices: Some(vec![Device::Gpu(0), Device::Gpu(1)]),
            ..Default::default()
        };

        assert!(matches!(cfg.validate(), Err(OrchestraErr::InvalidConfig(_))));
    }

    #[test]
    fn duplicate_devices_are_rejected() {
        let cfg = TrainingConfig {
            num_workers: nz(2),
            devices: Some(vec![Device::Gpu(1), Device::Gpu(1)]),
            ..Default::default()
        };

        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("gpu:1"));
    }

    #[test]
    fn peer_to_peer_is_selected_when_legacy_is_off() {
        let cfg = TrainingConfig {
            use_legacy_averaging: false,
            ..Default::default()
        };

        assert_eq!(cfg.transport(), Transport::PeerToPeer);
    }

    #[test]
    fn json_config_keeps_the_device_list() {
        let cfg = TrainingConfig {
            num_workers: nz(2),
            devices: Some(vec![Device::Gpu(0), Device::Cpu(1)]),
            ..Default::default()
        };

        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains(r#"[{"gpu":0},{"cpu":1}]"#));
        assert_eq!(serde_json::from_str::<TrainingConfig>(&json).unwrap(), cfg);
    }

    #[test]
    fn partial_json_config_falls_back_to_defaults() {
        let cfg: TrainingConfig =
            serde_json::from_str(r#"{"averaging_frequency": 7, "devices": [{"gpu": 3}]}"#)
                .unwrap();

        assert_eq!(cfg.averaging_frequency.get(), 7);
        assert_eq!(cfg.num_workers, TrainingConfig::default().num_workers);
        assert_eq!(cfg.devices, Some(vec![Device::Gpu(3)]));

        assert!(serde_json::from_str::<TrainingConfig>(r#"{"epochs": 0}"#).is_err());
    }
}
