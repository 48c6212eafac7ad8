//! Provisioning profile answering like the real cloud for dry runs.
//!
//! Generated names and credentials are random per process; addresses are
//! fixed so that endpoints stay recognisable.

use strata_common::error::{Result, StrataError};
use strata_common::types::{ResourceKind, Value};
use strata_core::backend::OutputMap;
use strata_core::backend::memory::MemoryBackend;

/// Cluster IP reported for the orchestration frontend service.
pub const FRONTEND_IP: &str = "10.0.184.21";

/// Load balancer IP reported for the orchestration web service.
pub const WEB_IP: &str = "20.62.145.7";

/// Builds a [`MemoryBackend`] answering every resource kind of the stack.
pub fn simulated_backend() -> MemoryBackend {
    MemoryBackend::new()
        .on_create(ResourceKind::RandomString, |_, config| {
            Ok(single("result", random_chars(length(config, 6))))
        })
        .on_create(ResourceKind::RandomPassword, |_, config| {
            Ok(single("result", random_chars(length(config, 16))))
        })
        .on_create(ResourceKind::ResourceGroup, |_, config| {
            Ok(single("name", field(config, "resourceGroupName")?))
        })
        .on_create(ResourceKind::DirectoryApplication, |_, _| {
            Ok(single("applicationId", uuid::Uuid::new_v4().to_string()))
        })
        .on_create(ResourceKind::ServicePrincipalPassword, |_, config| {
            Ok(single("value", field(config, "value")?))
        })
        .on_create(ResourceKind::PrivateKey, |name, _| {
            Ok(single("publicKeyOpenssh", format!("ssh-rsa {} {name}", random_chars(64))))
        })
        .on_create(ResourceKind::LogWorkspace, |_, config| {
            Ok(single("name", field(config, "workspaceName")?))
        })
        .on_create(ResourceKind::ManagedCluster, |_, _| {
            Ok(single("kubeletPrincipalId", uuid::Uuid::new_v4().to_string()))
        })
        .on_read(ResourceKind::ManagedCluster, |_, config| {
            let prefix = field(config, "dnsPrefix")?;
            Ok(single("kubeconfig", kubeconfig(&prefix)))
        })
        .on_create(ResourceKind::ContainerRegistry, |_, config| {
            let name = field(config, "registryName")?;
            Ok(single("loginServer", format!("{name}.azurecr.io")))
        })
        .on_read(ResourceKind::ContainerRegistry, |_, config| {
            let mut outputs = single("adminUsername", field(config, "registryName")?);
            let _ = outputs.insert("adminPassword".into(), Value::from(random_chars(32)));
            Ok(outputs)
        })
        .on_create(ResourceKind::ContainerImage, |_, config| {
            let name = field(config, "imageName")?;
            Ok(single("imageName", format!("{name}:latest")))
        })
        .on_create(ResourceKind::ChartRelease, |_, _| Ok(single("frontendIp", FRONTEND_IP)))
        .on_read(ResourceKind::ChartRelease, |_, _| Ok(single("webIp", WEB_IP)))
}

fn single(key: &str, value: impl Into<Value>) -> OutputMap {
    OutputMap::from([(key.to_owned(), value.into())])
}

fn field(config: &Value, key: &str) -> Result<String> {
    config
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| StrataError::backend(format!("config has no string field \"{key}\"")))
}

fn length(config: &Value, default: usize) -> usize {
    config
        .get("length")
        .and_then(Value::as_u64)
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(default)
}

fn random_chars(len: usize) -> String {
    let mut out = String::with_capacity(len);
    while out.len() < len {
        out.push_str(&uuid::Uuid::new_v4().simple().to_string());
    }
    out.truncate(len);
    out
}

fn kubeconfig(dns_prefix: &str) -> String {
    format!(
        "apiVersion: v1\nkind: Config\nclusters:\n- name: {dns_prefix}\n  cluster:\n    server: https://{dns_prefix}.hcp.westeurope.azmk8s.io:443\ncurrent-context: {dns_prefix}\n"
    )
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use strata_core::backend::ProvisioningBackend;

    use super::*;

    #[test]
    fn random_chars_honours_length() {
        assert_eq!(random_chars(6).len(), 6);
        assert_eq!(random_chars(70).len(), 70);
        assert!(random_chars(12).chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn registry_reports_login_server_and_credentials() {
        let backend = simulated_backend();
        let created = backend
            .create(
                ResourceKind::ContainerRegistry,
                "registry",
                &json!({ "registryName": "tabc123" }),
            )
            .await
            .expect("create");
        assert_eq!(created.outputs["loginServer"], json!("tabc123.azurecr.io"));

        let read = backend.read(&created.handle).await.expect("read");
        assert_eq!(read["adminUsername"], json!("tabc123"));
        assert_eq!(read["adminPassword"].as_str().map(str::len), Some(32));
    }

    #[tokio::test]
    async fn principal_password_echoes_its_value() {
        let backend = simulated_backend();
        let created = backend
            .create(
                ResourceKind::ServicePrincipalPassword,
                "aks-sp-password",
                &json!({ "servicePrincipalId": "sp", "value": "generated" }),
            )
            .await
            .expect("create");
        assert_eq!(created.outputs["value"], json!("generated"));
    }

    #[tokio::test]
    async fn missing_config_field_is_a_backend_error() {
        let backend = simulated_backend();
        let err = backend
            .create(ResourceKind::ResourceGroup, "resource-group", &json!({}))
            .await
            .expect_err("no name");
        assert!(matches!(err, StrataError::Backend { .. }));
    }
}
