//! Builds the JSON Patch that merges an injection template into a pod.

use std::collections::{BTreeMap, HashSet};

use json_patch::{AddOperation, Patch, PatchOperation};
use k8s_openapi::api::core::v1::{Pod, PodSpec};
use serde::Serialize;
use serde_json::Value;

use crate::{
    annotations::{pointer_token, AnnotationKeys, STATUS_INJECTED},
    config::InjectionConfig,
    error::PatchError,
};

/// Build the patch for `injection` and encode it as a JSON array.
///
/// `applied_annotations` are written with `add`, so a key the pod already carries is
/// overwritten. Callers pass only keys the pod does not have.
pub fn build_patch(
    pod: &Pod,
    injection: &InjectionConfig,
    keys: &AnnotationKeys,
    applied_annotations: &BTreeMap<String, String>,
) -> Result<Vec<u8>, PatchError> {
    let patch = build_operations(pod, injection, keys, applied_annotations)?;
    Ok(serde_json::to_vec(&patch)?)
}

/// Build the `add` operations that merge `injection` into `pod` and mark it injected.
///
/// Operations come out in a fixed order: containers, volumes, volume mounts, env,
/// host aliases, init containers, then annotations. Either the whole patch is
/// returned or an error, never a partial patch.
pub fn build_operations(
    pod: &Pod,
    injection: &InjectionConfig,
    keys: &AnnotationKeys,
    applied_annotations: &BTreeMap<String, String>,
) -> Result<Patch, PatchError> {
    let spec = pod.spec.as_ref().ok_or(PatchError::MissingPodSpec)?;
    check_name_conflicts(spec, injection)?;

    let mut builder = PatchBuilder::new(pod)?;

    builder.add_all("/spec/containers", &injection.containers)?;
    builder.add_all("/spec/volumes", &injection.volumes)?;

    let mounts = injection
        .volume_mounts
        .iter()
        .map(|m| (m.container.as_str(), &m.mount));
    for (container, mounts) in group_by_container(mounts) {
        let index = container_index(spec, container)?;
        builder.add_all(&format!("/spec/containers/{index}/volumeMounts"), &mounts)?;
    }

    let env = injection.env.iter().map(|e| (e.container.as_str(), &e.env));
    for (container, env) in group_by_container(env) {
        let index = container_index(spec, container)?;
        builder.add_all(&format!("/spec/containers/{index}/env"), &env)?;
    }

    builder.add_all("/spec/hostAliases", &injection.host_aliases)?;
    builder.add_all("/spec/initContainers", &injection.init_containers)?;

    let mut annotations = applied_annotations.clone();
    annotations.remove(&keys.status);
    builder.annotate(annotations, (keys.status.as_str(), STATUS_INJECTED))?;

    Ok(builder.finish())
}

/// Fail on the first injected container or init container whose name is already taken,
/// either by the pod or by an earlier injected container.
fn check_name_conflicts(spec: &PodSpec, injection: &InjectionConfig) -> Result<(), PatchError> {
    let mut names: HashSet<&str> = spec
        .containers
        .iter()
        .chain(spec.init_containers.iter().flatten())
        .map(|c| c.name.as_str())
        .collect();
    let injected = injection.containers.iter().chain(&injection.init_containers);
    for container in injected {
        if !names.insert(container.name.as_str()) {
            return Err(PatchError::ContainerNameConflict(container.name.clone()));
        }
    }
    Ok(())
}

fn container_index(spec: &PodSpec, name: &str) -> Result<usize, PatchError> {
    spec.containers
        .iter()
        .position(|c| c.name == name)
        .ok_or_else(|| PatchError::ContainerNotFound(name.to_owned()))
}

/// Group entries by target container, keeping first-appearance order of containers
/// and template order within each group.
fn group_by_container<'a, T>(
    entries: impl Iterator<Item = (&'a str, &'a T)>,
) -> Vec<(&'a str, Vec<&'a T>)> {
    let mut groups: Vec<(&str, Vec<&T>)> = Vec::new();
    for (container, entry) in entries {
        match groups.iter_mut().find(|(name, _)| *name == container) {
            Some((_, group)) => group.push(entry),
            None => groups.push((container, vec![entry])),
        }
    }
    groups
}

/// Accumulates operations while keeping a shadow copy of the pod with every
/// operation applied, so existence checks see what earlier operations created.
struct PatchBuilder {
    document: Value,
    operations: Vec<PatchOperation>,
}

impl PatchBuilder {
    fn new(pod: &Pod) -> Result<Self, PatchError> {
        Ok(Self {
            document: serde_json::to_value(pod)?,
            operations: Vec::new(),
        })
    }

    /// Element count of the array at `path`, `None` when there is no array there.
    fn array_len(&self, path: &str) -> Option<usize> {
        self.document
            .pointer(path)
            .and_then(Value::as_array)
            .map(Vec::len)
    }

    fn has_object(&self, path: &str) -> bool {
        self.document.pointer(path).map_or(false, Value::is_object)
    }

    /// Add `items` to the array at `path`: one operation creating the array when it is
    /// absent or empty, otherwise one append per item.
    fn add_all<T: Serialize>(&mut self, path: &str, items: &[T]) -> Result<(), PatchError> {
        if items.is_empty() {
            return Ok(());
        }
        match self.array_len(path) {
            Some(len) if len > 0 => {
                for item in items {
                    self.append(path, serde_json::to_value(item)?)?;
                }
                Ok(())
            }
            _ => self.add(path.to_owned(), serde_json::to_value(items)?),
        }
    }

    fn append(&mut self, path: &str, value: Value) -> Result<(), PatchError> {
        if self.array_len(path).is_none() {
            return Err(PatchError::MissingArray(path.to_owned()));
        }
        self.add(format!("{path}/-"), value)
    }

    /// Set annotations, `last` after all of `annotations`.
    fn annotate(
        &mut self,
        annotations: BTreeMap<String, String>,
        last: (&str, &str),
    ) -> Result<(), PatchError> {
        const PATH: &str = "/metadata/annotations";

        if !self.has_object(PATH) {
            let mut map = serde_json::Map::new();
            for (key, value) in annotations {
                map.insert(key, Value::String(value));
            }
            map.insert(last.0.to_owned(), Value::String(last.1.to_owned()));
            return self.add(PATH.to_owned(), Value::Object(map));
        }

        for (key, value) in annotations {
            self.add(format!("{PATH}/{}", pointer_token(&key)), Value::String(value))?;
        }
        self.add(
            format!("{PATH}/{}", pointer_token(last.0)),
            Value::String(last.1.to_owned()),
        )
    }

    fn add(&mut self, path: String, value: Value) -> Result<(), PatchError> {
        let operation = PatchOperation::Add(AddOperation {
            path: path.clone(),
            value,
        });
        json_patch::patch(&mut self.document, &Patch(vec![operation.clone()])).map_err(|e| {
            PatchError::Apply {
                path,
                reason: e.to_string(),
            }
        })?;
        self.operations.push(operation);
        Ok(())
    }

    fn finish(self) -> Patch {
        Patch(self.operations)
    }
}
