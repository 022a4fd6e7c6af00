use std::{
    collections::{BTreeMap, HashSet},
    convert::Infallible,
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::ValueEnum;
use k8s_openapi::api::core::v1::Pod;
use kube::core::{
    admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation},
    DynamicObject,
};
use tracing::*;
use warp::{reply, Reply};

use crate::{
    config::ConfigStore,
    decision::decide,
    error::DecisionError,
    patch::build_operations,
};

/// What to do with a pod whose injection is misconfigured.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum FailurePolicy {
    /// Admit the pod unmodified and return the problem as a warning.
    Allow,
    /// Reject the pod.
    Deny,
}

/// Outcome of looking at one admitted object.
enum Mutation {
    Patched(AdmissionResponse, String),
    Skipped(DecisionError),
    Untouched,
}

/// Normalize `--ignore-namespaces` values: trimmed, blanks dropped.
pub fn ignored_namespaces<S: AsRef<str>>(values: &[S]) -> HashSet<String> {
    values
        .iter()
        .map(|ns| ns.as_ref().trim())
        .filter(|ns| !ns.is_empty())
        .map(str::to_owned)
        .collect()
}

pub struct Injector {
    store: Arc<ConfigStore>,
    ignored_namespaces: HashSet<String>,
    policy: FailurePolicy,
}

impl Injector {
    pub fn new(
        store: Arc<ConfigStore>,
        ignored_namespaces: HashSet<String>,
        policy: FailurePolicy,
    ) -> Self {
        Self {
            store,
            ignored_namespaces,
            policy,
        }
    }

    /// Produce the response for an admission request.
    pub fn review(&self, req: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
        let res = AdmissionResponse::from(req);
        // req.object is None for DELETE requests
        let obj = match req.object.as_ref() {
            Some(obj) => obj,
            None => return res,
        };
        let name = obj
            .metadata
            .name
            .as_ref()
            .or(obj.metadata.generate_name.as_ref())
            .cloned()
            .unwrap_or_else(|| "<NAME_MISSING>".to_owned());

        match self.mutate(res.clone(), req, obj) {
            Ok(Mutation::Patched(res, sidecar)) => {
                info!("injected: {sidecar} into {:?} on Pod {name}", req.operation);
                res
            }
            Ok(Mutation::Skipped(reason)) => {
                debug!("skipped: {:?} on {name} ({reason})", req.operation);
                res
            }
            Ok(Mutation::Untouched) => res,
            Err(err) => match self.policy {
                FailurePolicy::Allow => {
                    warn!("allowed unmodified: {:?} on {name} ({err:#})", req.operation);
                    let mut res = res;
                    res.warnings = Some(vec![format!("sidecar injection skipped: {err:#}")]);
                    res
                }
                FailurePolicy::Deny => {
                    warn!("denied: {:?} on {name} ({err:#})", req.operation);
                    res.deny(format!("{err:#}"))
                }
            },
        }
    }

    fn mutate(
        &self,
        res: AdmissionResponse,
        req: &AdmissionRequest<DynamicObject>,
        obj: &DynamicObject,
    ) -> Result<Mutation> {
        // Only pod creations are injected, everything else passes through
        let is_pod = obj.types.as_ref().map_or(false, |t| t.kind == "Pod");
        if !is_pod || req.operation != Operation::Create {
            return Ok(Mutation::Untouched);
        }

        let mut pod: Pod = serde_json::to_value(obj)
            .and_then(serde_json::from_value)
            .context("could not deserialize pod object")?;
        // The apiserver may leave the namespace off pods it has not stored yet
        if pod.metadata.namespace.is_none() {
            pod.metadata.namespace = req.namespace.clone();
        }

        let config = self.store.snapshot();
        let injection = match decide(&config, &self.ignored_namespaces, &pod.metadata) {
            Ok(injection) => injection,
            Err(reason) if reason.is_skip() => return Ok(Mutation::Skipped(reason)),
            Err(err) => return Err(err.into()),
        };

        let patch = build_operations(&pod, injection, &config.annotations, &BTreeMap::new())
            .with_context(|| format!("could not build patch for sidecar {}", injection.name))?;
        let res = res
            .with_patch(patch)
            .context("could not serialize patch")?;
        Ok(Mutation::Patched(res, injection.name.clone()))
    }
}

// A general /mutate handler, wrapping the review in the AdmissionReview envelope
pub async fn mutate_handler(
    body: AdmissionReview<DynamicObject>,
    injector: Arc<Injector>,
) -> Result<impl Reply, Infallible> {
    // Parse incoming webhook AdmissionRequest first
    let req: AdmissionRequest<_> = match body.try_into() {
        Ok(req) => req,
        Err(err) => {
            error!("invalid request: {}", err.to_string());
            return Ok(reply::json(
                &AdmissionResponse::invalid(err.to_string()).into_review(),
            ));
        }
    };

    let res = injector.review(&req);
    Ok(reply::json(&res.into_review()))
}
