use anyhow::{Context, Result};
use clap::Parser;
use std::{path::PathBuf, sync::Arc};
use tokio::signal::unix::{signal, SignalKind};
use tracing::*;
use warp::Filter;

use sidecar_injector::{
    annotations::DEFAULT_ANNOTATION_NAMESPACE,
    config::{Config, ConfigStore},
    webhook::{ignored_namespaces, mutate_handler, FailurePolicy, Injector},
};

#[derive(Parser, Debug, Clone)]
#[command(name = "sidecar-injector")]
#[command(version, about = "Mutating admission webhook injecting sidecars into pods")]
struct Args {
    /// Directory holding one injection template per YAML file.
    #[arg(long, default_value = "/conf")]
    config_directory: PathBuf,
    /// Prefix of the request and status annotations.
    #[arg(long, default_value = DEFAULT_ANNOTATION_NAMESPACE)]
    annotation_namespace: String,
    /// Namespaces whose pods are never injected.
    #[arg(long, value_delimiter = ',', default_value = "kube-system,kube-public")]
    ignore_namespaces: Vec<String>,
    #[arg(long, default_value = "/tls/tls.crt")]
    tls_cert_file: PathBuf,
    #[arg(long, default_value = "/tls/tls.key")]
    tls_key_file: PathBuf,
    #[arg(long, default_value = "9443")]
    tls_port: u16,
    /// Port of the plain HTTP health endpoint.
    #[arg(long, default_value = "9000")]
    lifecycle_port: u16,
    /// How to answer when a requested sidecar is unknown or cannot be applied.
    #[arg(long, value_enum, default_value = "deny")]
    failure_policy: FailurePolicy,
}

fn load_config(args: &Args) -> Result<Config> {
    let dir = &args.config_directory;
    Config::load_directory(dir, &args.annotation_namespace)
        .with_context(|| format!("could not load injection configs from {}", dir.display()))
}

// Re-read the template directory on every SIGHUP, keeping the old set on failure
async fn reload_on_hangup(args: Args, store: Arc<ConfigStore>) -> Result<()> {
    let mut hangups = signal(SignalKind::hangup()).context("could not listen for SIGHUP")?;
    while hangups.recv().await.is_some() {
        match load_config(&args) {
            Ok(config) => {
                info!("reloaded {} injection configs", config.injections.len());
                store.replace(config);
            }
            Err(err) => error!("keeping previous injection configs: {err:#}"),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    info!("Starting sidecar injector with {:?}", args);

    let config = load_config(&args)?;
    info!(
        "loaded {} injection configs: {:?}",
        config.injections.len(),
        config.injections.keys().collect::<Vec<_>>()
    );
    let store = Arc::new(ConfigStore::new(config));
    let ignored = ignored_namespaces(args.ignore_namespaces.as_slice());
    let injector = Arc::new(Injector::new(store.clone(), ignored, args.failure_policy));

    let with_injector = warp::any().map(move || injector.clone());
    let routes = warp::path("mutate")
        .and(warp::body::json())
        .and(with_injector)
        .and_then(mutate_handler)
        .with(warp::trace::request());

    // The CA of this certificate goes into the MutatingWebhookConfiguration
    let webhook = warp::serve(warp::post().and(routes))
        .tls()
        .cert_path(&args.tls_cert_file)
        .key_path(&args.tls_key_file)
        .run(([0, 0, 0, 0], args.tls_port));

    let health = warp::path("health")
        .and(warp::get())
        .map(|| "ok")
        .with(warp::trace::request());
    let lifecycle = warp::serve(health).run(([0, 0, 0, 0], args.lifecycle_port));

    info!(
        "serving /mutate on :{} and /health on :{}",
        args.tls_port, args.lifecycle_port
    );
    let reload = async {
        if let Err(err) = reload_on_hangup(args.clone(), store).await {
            error!("config reload disabled: {err:#}");
        }
    };
    futures::join!(webhook, lifecycle, reload);
    Ok(())
}
