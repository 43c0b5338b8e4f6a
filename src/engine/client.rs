//! Engine client
//!
//! Owns the daemon connection and the supervisor's own identity: its
//! container id, inspect record, and cgroup path. Discovered once at
//! startup; every later operation reads from this cache.

use std::collections::HashMap;

use bollard::models::ContainerInspectResponse;
use bollard::Docker;
use regex::Regex;
use tracing::{debug, info};

use super::error::{EngineError, EngineResult};

const CGROUP_FILE: &str = "/proc/self/cgroup";

/// Connection to the container daemon plus the cached identity of the
/// container this process runs in
pub struct Client {
    docker: Docker,
    container_id: String,
    container_name: String,
    cgroup: String,
    labels: HashMap<String, String>,
    container: ContainerInspectResponse,
}

impl Client {
    /// Discover the supervisor's own container and open the daemon
    /// connection. Fails with `Environment` when not running inside a
    /// container and `DaemonUnreachable` when the daemon cannot be
    /// contacted.
    pub async fn connect() -> EngineResult<Self> {
        let contents = std::fs::read_to_string(CGROUP_FILE).map_err(|e| {
            EngineError::Environment(format!("cannot read {}: {}", CGROUP_FILE, e))
        })?;

        let (container_id, cgroup) = parse_cgroup(&contents).ok_or_else(|| {
            EngineError::Environment(
                "no container id in the process cgroup; not running inside a container".into(),
            )
        })?;

        debug!("Discovered own container {} in cgroup {}", container_id, cgroup);

        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| EngineError::DaemonUnreachable(e.to_string()))?;

        docker
            .ping()
            .await
            .map_err(|e| EngineError::DaemonUnreachable(e.to_string()))?;

        let container = docker
            .inspect_container(&container_id, None)
            .await
            .map_err(|e| match e {
                bollard::errors::Error::DockerResponseServerError {
                    status_code: 404, ..
                } => EngineError::Environment(format!(
                    "container {} from the cgroup is unknown to the daemon",
                    container_id
                )),
                _ => EngineError::DaemonUnreachable(e.to_string()),
            })?;

        let container_name = container
            .name
            .as_deref()
            .map(|name| name.trim_start_matches('/').to_string())
            .unwrap_or_else(|| container_id.clone());

        let labels = container
            .config
            .as_ref()
            .and_then(|config| config.labels.clone())
            .unwrap_or_default();

        info!("Supervising from container {} ({})", container_name, container_id);

        Ok(Self {
            docker,
            container_id,
            container_name,
            cgroup,
            labels,
            container,
        })
    }

    pub fn docker(&self) -> &Docker {
        &self.docker
    }

    /// Full id of the supervisor's own container
    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// Supervisor container name with the daemon's leading slash removed
    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    /// Cgroup path components must be nested under
    pub fn cgroup(&self) -> &str {
        &self.cgroup
    }

    /// Labels on the supervisor container
    pub fn labels(&self) -> &HashMap<String, String> {
        &self.labels
    }

    /// Cached inspect record of the supervisor container
    pub fn container(&self) -> &ContainerInspectResponse {
        &self.container
    }
}

/// Extract the container id and cgroup path from `/proc/self/cgroup`
/// contents. Handles both cgroup v1 paths (`.../docker/<id>`) and
/// cgroup v2 systemd scopes (`.../docker-<id>.scope`).
fn parse_cgroup(contents: &str) -> Option<(String, String)> {
    let id_pattern = Regex::new(r"([0-9a-f]{64})").expect("static pattern compiles");

    for line in contents.lines() {
        // hierarchy-id:controllers:path
        let Some(path) = line.splitn(3, ':').nth(2) else {
            continue;
        };
        if let Some(found) = id_pattern.captures(path) {
            return Some((found[1].to_string(), path.to_string()));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    #[test]
    fn parses_cgroup_v1_docker_path() {
        let contents = format!("12:memory:/docker/{}\n11:cpu,cpuacct:/docker/{}\n", ID, ID);
        let (id, cgroup) = parse_cgroup(&contents).unwrap();
        assert_eq!(id, ID);
        assert_eq!(cgroup, format!("/docker/{}", ID));
    }

    #[test]
    fn parses_cgroup_v2_systemd_scope() {
        let contents = format!("0::/system.slice/docker-{}.scope\n", ID);
        let (id, cgroup) = parse_cgroup(&contents).unwrap();
        assert_eq!(id, ID);
        assert_eq!(cgroup, format!("/system.slice/docker-{}.scope", ID));
    }

    #[test]
    fn rejects_host_cgroup() {
        let contents = "0::/init.scope\n1:name=systemd:/\n";
        assert!(parse_cgroup(contents).is_none());
    }

    #[test]
    fn rejects_short_hex_segments() {
        let contents = "0::/system.slice/run-deadbeef.scope\n";
        assert!(parse_cgroup(contents).is_none());
    }
}
