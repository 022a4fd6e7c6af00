//! Picks the injection template an object asks for, or says why it gets none.

use std::collections::HashSet;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::{
    annotations::STATUS_INJECTED,
    config::{Config, InjectionConfig},
    error::DecisionError,
};

/// Select the template requested by `meta`.
///
/// Checks run in a fixed order: ignored namespace, already injected, missing request,
/// unknown template. The namespace policy therefore wins over anything the object's
/// annotations say.
pub fn decide<'a>(
    config: &'a Config,
    ignored_namespaces: &HashSet<String>,
    meta: &ObjectMeta,
) -> Result<&'a InjectionConfig, DecisionError> {
    if let Some(namespace) = meta.namespace.as_deref() {
        if ignored_namespaces.contains(namespace) {
            return Err(DecisionError::IgnoredNamespace(namespace.to_owned()));
        }
    }

    let annotations = meta.annotations.as_ref();
    let status = annotations.and_then(|a| a.get(&config.annotations.status));
    if status.map(String::as_str) == Some(STATUS_INJECTED) {
        return Err(DecisionError::AlreadyInjected);
    }

    let requested = annotations
        .and_then(|a| a.get(&config.annotations.request))
        .filter(|name| !name.is_empty())
        .ok_or(DecisionError::MissingRequestAnnotation)?;

    config
        .get(requested)
        .ok_or_else(|| DecisionError::RequestedSidecarNotFound(requested.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    const NS: &str = "injector.unittest.com";

    fn config() -> Config {
        let injections = ["sidecar-test", "complex-sidecar", "env1", "init-containers"]
            .into_iter()
            .map(|name| InjectionConfig {
                name: name.to_owned(),
                ..Default::default()
            });
        Config::from_injections(NS, injections).unwrap()
    }

    fn ignored() -> HashSet<String> {
        HashSet::from(["ignore-me".to_owned()])
    }

    fn meta(namespace: &str, annotations: Option<&[(&str, &str)]>) -> ObjectMeta {
        ObjectMeta {
            name: Some("object".into()),
            namespace: Some(namespace.into()),
            annotations: annotations.map(|pairs| {
                pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect::<BTreeMap<_, _>>()
            }),
            ..Default::default()
        }
    }

    fn annotated(namespace: &str, pairs: &[(&str, &str)]) -> ObjectMeta {
        meta(namespace, Some(pairs))
    }

    #[test]
    fn selects_requested_template() {
        let config = config();
        for name in ["sidecar-test", "complex-sidecar", "env1", "init-containers"] {
            let meta = annotated("default", &[("injector.unittest.com/request", name)]);
            let selected = decide(&config, &ignored(), &meta).unwrap();
            assert_eq!(selected.name, name);
        }
    }

    #[test]
    fn ignored_namespace_wins_over_annotations() {
        let config = config();
        for annotations in [
            None,
            Some(&[("injector.unittest.com/request", "sidecar-test")][..]),
            Some(&[("injector.unittest.com/status", "injected")][..]),
            Some(&[("injector.unittest.com/request", "this-doesnt-exist")][..]),
        ] {
            let err = decide(&config, &ignored(), &meta("ignore-me", annotations)).unwrap_err();
            assert_eq!(err, DecisionError::IgnoredNamespace("ignore-me".into()));
        }
    }

    #[test]
    fn already_injected_wins_over_request() {
        let meta = annotated(
            "default",
            &[
                ("injector.unittest.com/request", "sidecar-test"),
                ("injector.unittest.com/status", "injected"),
            ],
        );
        assert_eq!(
            decide(&config(), &ignored(), &meta).unwrap_err(),
            DecisionError::AlreadyInjected
        );
    }

    #[test]
    fn other_status_values_do_not_block_injection() {
        let meta = annotated(
            "default",
            &[
                ("injector.unittest.com/request", "env1"),
                ("injector.unittest.com/status", "pending"),
            ],
        );
        assert_eq!(decide(&config(), &ignored(), &meta).unwrap().name, "env1");
    }

    #[test]
    fn missing_or_empty_request_is_reported() {
        let config = config();
        for annotations in [
            None,
            Some(&[][..]),
            Some(&[("unrelated.io/thing", "sidecar-test")][..]),
            Some(&[("injector.unittest.com/request", "")][..]),
        ] {
            let err = decide(&config, &ignored(), &meta("default", annotations)).unwrap_err();
            assert_eq!(err, DecisionError::MissingRequestAnnotation);
        }
    }

    #[test]
    fn unknown_template_is_reported() {
        let request = ("injector.unittest.com/request", "this-doesnt-exist");
        let meta = annotated("default", &[request]);
        assert_eq!(
            decide(&config(), &ignored(), &meta).unwrap_err(),
            DecisionError::RequestedSidecarNotFound("this-doesnt-exist".into())
        );
    }

    #[test]
    fn object_without_namespace_is_not_ignored() {
        let mut meta = annotated("unused", &[("injector.unittest.com/request", "env1")]);
        meta.namespace = None;
        assert_eq!(decide(&config(), &ignored(), &meta).unwrap().name, "env1");
    }

    #[test]
    fn keys_follow_configured_namespace() {
        let meta = annotated("default", &[("injector.example.com/request", "env1")]);
        assert_eq!(
            decide(&config(), &ignored(), &meta).unwrap_err(),
            DecisionError::MissingRequestAnnotation
        );
    }
}
