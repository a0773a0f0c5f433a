use std::{
    env, fs, io,
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use machine_learning::NetworkSpec;
use orchestra::TrainingConfig;
use serde::de::DeserializeOwned;

const DEFAULT_MNIST_DIR: &str = "data/mnist";
const DEFAULT_BATCH_SIZE: NonZeroUsize = NonZeroUsize::new(128).unwrap();
const DEFAULT_SEED: u64 = 123;
const DEFAULT_LOG_EVERY: NonZeroUsize = NonZeroUsize::new(10).unwrap();
const DEFAULT_HIDDEN: usize = 500;

/// Everything the node reads from its environment.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub training: TrainingConfig,
    pub model: NetworkSpec,
    pub mnist_dir: PathBuf,
    pub batch_size: NonZeroUsize,
    pub seed: u64,
    pub log_every: NonZeroUsize,
}

impl NodeConfig {
    /// Reads the configuration from the environment.
    ///
    /// * `ORCHESTRA_CONFIG` - Optional JSON file with the `TrainingConfig`.
    /// * `MODEL_CONFIG` - Optional JSON file with the `NetworkSpec`.
    /// * `MNIST_DIR` - The directory holding the four IDX files.
    /// * `BATCH_SIZE`, `SEED`, `LOG_EVERY` - Plain numbers.
    ///
    /// # Returns
    /// The configuration, or an `InvalidInput` error naming the bad variable.
    pub fn from_env() -> io::Result<Self> {
        let training = match env::var("ORCHESTRA_CONFIG") {
            Ok(path) => load_json(Path::new(&path))?,
            Err(_) => TrainingConfig::default(),
        };

        let model = match env::var("MODEL_CONFIG") {
            Ok(path) => load_json(Path::new(&path))?,
            Err(_) => NetworkSpec::mnist(&[DEFAULT_HIDDEN]),
        };

        let mnist_dir = env::var("MNIST_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_MNIST_DIR));

        Ok(Self {
            training,
            model,
            mnist_dir,
            batch_size: parse_var("BATCH_SIZE")?.unwrap_or(DEFAULT_BATCH_SIZE),
            seed: parse_var("SEED")?.unwrap_or(DEFAULT_SEED),
            log_every: parse_var("LOG_EVERY")?.unwrap_or(DEFAULT_LOG_EVERY),
        })
    }
}

fn invalid(detail: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, detail)
}

/// Parses an optional environment variable.
fn parse_var<T>(key: &str) -> io::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| invalid(format!("{key}={raw}: {e}"))),
        Err(_) => Ok(None),
    }
}

/// Loads a JSON document from `path`.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> io::Result<T> {
    let content = fs::read_to_string(path).map_err(|e| {
        io::Error::new(e.kind(), format!("cannot read '{}': {e}", path.display()))
    })?;

    serde_json::from_str(&content)
        .map_err(|e| invalid(format!("invalid JSON in '{}': {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn training_config_loads_with_defaults_for_missing_keys() {
        let path = env::temp_dir().join(format!("orchestra-config-{}.json", std::process::id()));
        fs::write(
            &path,
            r#"{ "num_workers": 4, "averaging_frequency": 5, "use_legacy_averaging": false }"#,
        )
        .unwrap();

        let config: TrainingConfig = load_json(&path).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(config.num_workers.get(), 4);
        assert_eq!(config.averaging_frequency.get(), 5);
        assert!(!config.use_legacy_averaging);
        assert_eq!(config.prefetch_buffer_capacity.get(), 24);
    }

    #[test]
    fn zero_workers_is_rejected_when_loading() {
        let path = env::temp_dir().join(format!("orchestra-zero-{}.json", std::process::id()));
        fs::write(&path, r#"{ "num_workers": 0 }"#).unwrap();

        let err = load_json::<TrainingConfig>(&path).unwrap_err();
        fs::remove_file(&path).unwrap();

        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn a_missing_file_keeps_its_io_kind() {
        let err = load_json::<TrainingConfig>(Path::new("/nonexistent/config.json")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
