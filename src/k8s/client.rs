use anyhow::Result;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::config::Kubeconfig;
use kube::{Api, Client, Config};

fn infer_cluster_name() -> Option<String> {
    let kubeconfig = Kubeconfig::read().ok()?;
    let current = kubeconfig.current_context.as_ref()?;
    let named = kubeconfig.contexts.iter().find(|nc| nc.name == *current)?;
    let ctx = named.context.as_ref()?;
    Some(ctx.cluster.clone())
}

#[derive(Clone)]
pub struct K8sClient {
    client: Client,
    cluster_name: Option<String>,
}

impl K8sClient {
    pub async fn new(config_file: Option<&str>) -> Result<Self> {
        if let Some(path) = config_file {
            std::env::set_var("KUBECONFIG", path);
        }
        let cluster_name = infer_cluster_name();
        let config = Config::infer().await?;
        let client = Client::try_from(config)?;
        Ok(Self {
            client,
            cluster_name,
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Cluster name from kubeconfig current context, or None if in-cluster or unset.
    pub fn cluster_name(&self) -> Option<&str> {
        self.cluster_name.as_deref()
    }

    pub fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }

    pub fn pods(&self, namespace: Option<&str>) -> Api<Pod> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    /// Returns the Kubernetes API server version (e.g. "v1.28.0") if available.
    pub async fn server_version(&self) -> Result<Option<String>> {
        let info = self.client.apiserver_version().await?;
        Ok(Some(info.git_version))
    }
}
