use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::api::{Api, ListParams};
use tracing::instrument;

use crate::error::Error;

/// Wrapper for pod disruption budget api routes
pub struct Budgets {
    /// API client for disruption budgets in all namespaces
    api: Api<PodDisruptionBudget>,
}

impl Budgets {
    /// Build a new wrapper for disruption budget functions
    ///
    /// # Arguments
    ///
    /// * `client` - Kubernetes client
    pub fn new(client: &kube::Client) -> Self {
        Budgets {
            api: Api::all(client.clone()),
        }
    }

    /// List every disruption budget in the cluster
    #[instrument(name = "k8s::Budgets::list", skip_all, err(Debug))]
    pub async fn list(&self) -> Result<Vec<PodDisruptionBudget>, Error> {
        let budgets = self.api.list(&ListParams::default()).await?;
        Ok(budgets.items)
    }
}
