//! Injection templates and the snapshot store requests read them from.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, PoisonError, RwLock},
};

use k8s_openapi::api::core::v1::{Container, EnvVar, HostAlias, Volume, VolumeMount};
use serde::{Deserialize, Serialize};
use tracing::*;

use crate::{annotations::AnnotationKeys, error::ConfigError};

/// An environment variable destined for one named container of the pod.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ContainerEnvVar {
    pub container: String,
    #[serde(flatten)]
    pub env: EnvVar,
}

/// A volume mount destined for one named container of the pod.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ContainerVolumeMount {
    pub container: String,
    #[serde(flatten)]
    pub mount: VolumeMount,
}

/// A named template of everything merged into a pod that requests it.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectionConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default)]
    pub volumes: Vec<Volume>,
    #[serde(default)]
    pub volume_mounts: Vec<ContainerVolumeMount>,
    #[serde(default)]
    pub env: Vec<ContainerEnvVar>,
    #[serde(default)]
    pub host_aliases: Vec<HostAlias>,
    #[serde(default)]
    pub init_containers: Vec<Container>,
}

/// The full set of templates together with the annotation keys they are requested by.
#[derive(Clone, Debug, Default)]
pub struct Config {
    pub annotations: AnnotationKeys,
    pub injections: HashMap<String, InjectionConfig>,
}

impl Config {
    pub fn from_injections(
        annotation_namespace: &str,
        injections: impl IntoIterator<Item = InjectionConfig>,
    ) -> Result<Self, ConfigError> {
        let mut by_name = HashMap::new();
        for injection in injections {
            if by_name.contains_key(&injection.name) {
                return Err(ConfigError::DuplicateName(injection.name));
            }
            by_name.insert(injection.name.clone(), injection);
        }
        Ok(Self {
            annotations: AnnotationKeys::new(annotation_namespace),
            injections: by_name,
        })
    }

    /// Load one template per `*.yaml`/`*.yml` file found directly in `dir`.
    pub fn load_directory(dir: &Path, annotation_namespace: &str) -> Result<Self, ConfigError> {
        let mut paths = fs::read_dir(dir)
            .map_err(|source| io_error(dir, source))?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<Vec<PathBuf>, _>>()
            .map_err(|source| io_error(dir, source))?;
        paths.retain(|p| {
            p.is_file()
                && matches!(
                    p.extension().and_then(|ext| ext.to_str()),
                    Some("yaml" | "yml")
                )
        });
        paths.sort();

        let mut injections = Vec::with_capacity(paths.len());
        for path in paths {
            let data = fs::read_to_string(&path).map_err(|source| io_error(&path, source))?;
            let injection: InjectionConfig =
                serde_yaml::from_str(&data).map_err(|source| ConfigError::Parse {
                    path: path.clone(),
                    source,
                })?;
            if injection.name.is_empty() {
                return Err(ConfigError::MissingName(path));
            }
            debug!("loaded injection config {} from {}", injection.name, path.display());
            injections.push(injection);
        }

        Self::from_injections(annotation_namespace, injections)
    }

    pub fn get(&self, name: &str) -> Option<&InjectionConfig> {
        self.injections.get(name)
    }
}

fn io_error(path: &Path, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Holds the current [`Config`]; readers get an immutable snapshot, reloads swap it whole.
#[derive(Debug)]
pub struct ConfigStore {
    current: RwLock<Arc<Config>>,
}

impl ConfigStore {
    pub fn new(config: Config) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
        }
    }

    pub fn snapshot(&self) -> Arc<Config> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn replace(&self, config: Config) {
        let config = Arc::new(config);
        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = config;
    }
}
