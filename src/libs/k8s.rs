//! Thin wrappers around the Kubernetes api

use kube::config::{KubeConfigOptions, Kubeconfig};
use tracing::{event, Level};

mod budgets;
mod nodes;
mod pods;

pub use budgets::Budgets;
pub use nodes::Nodes;
pub use pods::Pods;

use crate::args::Args;
use crate::error::Error;

/// Build a client from the service account this controller runs under
async fn from_service_account() -> Result<kube::Client, Error> {
    let client = kube::Client::try_default().await?;
    Ok(client)
}

/// Build a client from a kubeconfig on disk
///
/// # Arguments
///
/// * `path` - An explicit kubeconfig path if one was given
async fn from_kubeconfig(path: Option<&str>) -> Result<kube::Client, Error> {
    // load the kubeconfig from the given path or the standard locations
    let kube_conf = match path {
        Some(path) => Kubeconfig::read_from(path)?,
        None => Kubeconfig::read()?,
    };
    // get this clusters config
    let cluster_conf =
        kube::Config::from_custom_kubeconfig(kube_conf, &KubeConfigOptions::default()).await?;
    // create a client based on this config
    let client = kube::Client::try_from(cluster_conf)?;
    Ok(client)
}

/// Build the client used to talk to the cluster
///
/// # Arguments
///
/// * `args` - The command line args passed to the rescheduler
pub async fn client(args: &Args) -> Result<kube::Client, Error> {
    // the client library always speaks json on the wire
    if args.kube_api_content_type != "application/json" {
        event!(
            Level::WARN,
            content_type = args.kube_api_content_type,
            msg = "Unsupported api content type, requests will use application/json"
        );
    }
    if args.running_in_cluster {
        from_service_account().await
    } else {
        from_kubeconfig(args.kubeconfig.as_deref()).await
    }
}
