//! Container lifecycle calls: create, start, stop, unpause, remove, inspect.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use bollard::models::{
    ContainerCreateBody, ContainerInspectResponse, HostConfig, PortBinding, PortMap,
};
use bollard::query_parameters::{
    CreateContainerOptions, InspectContainerOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use tracing::{debug, info, instrument};

use super::{Classified, DockerRuntime};
use crate::error::Result;
use crate::{ContainerRuntime, ContainerSpec, ContainerState, ExecOutput, Observation, Transition};

/// Build the host configuration: bind mount, resource limits, ephemeral port publication.
pub(super) fn build_host_config(spec: &ContainerSpec) -> HostConfig {
    let port_bindings = spec.published_port.map(|port| {
        let mut bindings: PortMap = HashMap::new();
        // HostPort "0" asks the daemon for any free port.
        bindings.insert(
            format!("{}/tcp", port),
            Some(vec![PortBinding {
                host_ip: None,
                host_port: Some("0".to_string()),
            }]),
        );
        bindings
    });

    HostConfig {
        binds: Some(vec![format!("{}:{}", spec.bind_source, spec.working_dir)]),
        port_bindings,
        cpu_quota: spec.cpu_quota,
        memory: spec.memory_bytes,
        auto_remove: Some(false),
        ..Default::default()
    }
}

pub(super) fn build_create_body(spec: &ContainerSpec) -> ContainerCreateBody {
    let labels: HashMap<String, String> = spec
        .labels
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    ContainerCreateBody {
        image: Some(spec.image.clone()),
        hostname: Some(spec.name.clone()),
        entrypoint: if spec.entrypoint.is_empty() {
            None
        } else {
            Some(spec.entrypoint.clone())
        },
        cmd: if spec.cmd.is_empty() {
            None
        } else {
            Some(spec.cmd.clone())
        },
        working_dir: Some(spec.working_dir.clone()),
        labels: if labels.is_empty() { None } else { Some(labels) },
        exposed_ports: spec
            .published_port
            .map(|port| vec![format!("{}/tcp", port)]),
        host_config: Some(build_host_config(spec)),
        ..Default::default()
    }
}

/// Extract `container port -> host port` pairs from an inspect response.
pub(super) fn parse_port_bindings(ports: Option<&PortMap>) -> BTreeMap<u16, u16> {
    let mut parsed = BTreeMap::new();
    let Some(ports) = ports else {
        return parsed;
    };

    for (key, bindings) in ports {
        let Some((port, proto)) = key.split_once('/') else {
            continue;
        };
        if proto != "tcp" {
            continue;
        }
        let Ok(container_port) = port.parse::<u16>() else {
            continue;
        };
        let host_port = bindings
            .as_ref()
            .and_then(|b| b.iter().find_map(|binding| binding.host_port.as_deref()))
            .and_then(|p| p.parse::<u16>().ok())
            .filter(|p| *p != 0);

        if let Some(host_port) = host_port {
            parsed.insert(container_port, host_port);
        }
    }

    parsed
}

fn observed_state(inspect: &ContainerInspectResponse) -> ContainerState {
    let state = inspect.state.as_ref();
    ContainerState {
        running: state.and_then(|s| s.running).unwrap_or(false),
        paused: state.and_then(|s| s.paused).unwrap_or(false),
        port_bindings: parse_port_bindings(
            inspect
                .network_settings
                .as_ref()
                .and_then(|settings| settings.ports.as_ref()),
        ),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn ensure_image(&self, image: &str) -> Result<()> {
        self.pull_if_absent(image).await
    }

    #[instrument(skip(self, spec), fields(container = %spec.name, image = %spec.image))]
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let options = CreateContainerOptions {
            name: Some(spec.name.clone()),
            platform: String::new(),
        };

        info!("Creating container");

        let created = self
            .docker
            .create_container(Some(options), build_create_body(spec))
            .await
            .map_err(|e| self.failure(e, "create", &spec.name))?;

        for warning in &created.warnings {
            debug!(warning = %warning, "Daemon warning on create");
        }

        info!(container_id = %created.id, "Container created");
        Ok(created.id)
    }

    #[instrument(skip(self))]
    async fn start(&self, container: &str) -> Result<Transition> {
        let result = self
            .docker
            .start_container(container, None::<StartContainerOptions>)
            .await;
        self.transition(result, "start", container)
    }

    #[instrument(skip(self))]
    async fn stop(&self, container: &str, grace: Duration) -> Result<Transition> {
        let options = StopContainerOptions {
            t: Some(grace.as_secs() as i32),
            signal: None,
        };
        let result = self.docker.stop_container(container, Some(options)).await;
        self.transition(result, "stop", container)
    }

    #[instrument(skip(self))]
    async fn unpause(&self, container: &str) -> Result<Transition> {
        let result = self.docker.unpause_container(container).await;
        self.transition(result, "unpause", container)
    }

    #[instrument(skip(self))]
    async fn remove(&self, container: &str) -> Result<Transition> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        let result = self
            .docker
            .remove_container(container, Some(options))
            .await;
        self.transition(result, "remove", container)
    }

    #[instrument(skip(self))]
    async fn inspect(&self, container: &str) -> Result<Observation> {
        match self
            .docker
            .inspect_container(container, None::<InspectContainerOptions>)
            .await
        {
            Ok(response) => {
                let state = observed_state(&response);
                debug!(
                    running = state.running,
                    paused = state.paused,
                    ports = ?state.port_bindings,
                    "Inspected container"
                );
                Ok(Observation::Present(state))
            }
            Err(e) => match self.classify(e, "inspect", container) {
                Classified::Missing => Ok(Observation::Missing),
                Classified::AlreadyInState => Ok(Observation::Missing),
                Classified::Failed(err) => Err(err),
            },
        }
    }

    async fn exec(&self, container: &str, cmd: &[String]) -> Result<ExecOutput> {
        self.exec_attached(container, cmd).await
    }

    async fn exec_detached(&self, container: &str, cmd: &[String]) -> Result<()> {
        self.exec_background(container, cmd).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_spec() -> ContainerSpec {
        let mut labels = BTreeMap::new();
        labels.insert("devbox.workspace".to_string(), "ws-1".to_string());

        ContainerSpec {
            name: "devbox-abc12345-k3x".to_string(),
            image: "node:20-alpine".to_string(),
            entrypoint: vec!["sh".to_string()],
            cmd: vec!["-c".to_string(), "tail -f /dev/null".to_string()],
            working_dir: "/workspace".to_string(),
            bind_source: "/srv/workspaces/alice/ws-1".to_string(),
            published_port: Some(3000),
            cpu_quota: Some(200_000),
            memory_bytes: Some(2 * 1024 * 1024 * 1024),
            labels,
        }
    }

    #[test]
    fn test_host_config_requests_ephemeral_port() {
        let host_config = build_host_config(&node_spec());

        let port_bindings = host_config.port_bindings.unwrap();
        let bindings = port_bindings.get("3000/tcp").unwrap().as_ref().unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].host_port.as_deref(), Some("0"));
    }

    #[test]
    fn test_host_config_bind_mount_and_limits() {
        let host_config = build_host_config(&node_spec());

        assert_eq!(
            host_config.binds,
            Some(vec!["/srv/workspaces/alice/ws-1:/workspace".to_string()])
        );
        assert_eq!(host_config.cpu_quota, Some(200_000));
        assert_eq!(host_config.memory, Some(2 * 1024 * 1024 * 1024));
    }

    #[test]
    fn test_portless_spec_publishes_nothing() {
        let mut spec = node_spec();
        spec.published_port = None;

        let body = build_create_body(&spec);
        assert!(body.exposed_ports.is_none());
        assert!(body.host_config.unwrap().port_bindings.is_none());
    }

    #[test]
    fn test_parse_port_bindings() {
        let mut ports: PortMap = HashMap::new();
        ports.insert(
            "3000/tcp".to_string(),
            Some(vec![
                PortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some("49153".to_string()),
                },
                PortBinding {
                    host_ip: Some("::".to_string()),
                    host_port: Some("49153".to_string()),
                },
            ]),
        );
        ports.insert("5173/tcp".to_string(), None);
        ports.insert("53/udp".to_string(), None);

        let parsed = parse_port_bindings(Some(&ports));
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed.get(&3000), Some(&49153));
    }

    #[test]
    fn test_parse_port_bindings_none() {
        assert!(parse_port_bindings(None).is_empty());
    }
}
