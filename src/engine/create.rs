//! Container factory
//!
//! Translates a `Component` into daemon create requests wired into the
//! supervisor's namespaces, pulls images on demand, and copies seed
//! files declared through `pod.copy.*` labels before start.

use std::collections::HashMap;
use std::time::Duration;

use bollard::container::{Config, CreateContainerOptions, UploadToContainerOptions};
use bollard::image::CreateImageOptions;
use bollard::models::{HealthConfig, HostConfig};
use bytes::Bytes;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Configuration;
use super::client::Client;
use super::component::{ArgList, Component, HealthCheck};
use super::error::{EngineError, EngineResult};

/// Deadline for a single create RPC
const CREATE_DEADLINE: Duration = Duration::from_secs(15);

/// Label prefix carrying seed file instructions on the supervisor
const COPY_LABEL_PREFIX: &str = "pod.copy.";

/// Create the component's container. Records the assigned container id
/// on the component and returns it.
pub(crate) async fn create_container(
    client: &Client,
    configuration: &Configuration,
    component: &mut Component,
    cancel: &CancellationToken,
) -> EngineResult<String> {
    let request = build_create_request(
        client.container_id(),
        client.container_name(),
        client.cgroup(),
        configuration,
        component,
    )?;

    if configuration.always_pull {
        pull_image(client, &component.image, cancel).await?;
    }

    let created = match issue_create(client, &request, cancel).await {
        Ok(created) => created,
        Err(EngineError::Timeout(op)) => {
            // One retry before concluding the daemon is wedged
            warn!("Create timed out for {}, retrying once", component.name);
            match issue_create(client, &request, cancel).await {
                Ok(created) => created,
                Err(EngineError::Timeout(_)) => {
                    return Err(EngineError::DaemonUnreachable(format!(
                        "{} deadline exceeded twice",
                        op
                    )))
                }
                Err(e) => return Err(e),
            }
        }
        Err(e) if e.is_not_found() => {
            // Image missing locally: pull and retry the create once
            info!("Image {} not found, pulling", component.image);
            pull_image(client, &component.image, cancel).await?;
            issue_create(client, &request, cancel).await?
        }
        Err(e) => return Err(e),
    };

    for warning in &created.warnings {
        warn!("[{}] create warning: {}", component.name, warning);
    }

    info!("Created container {} for {}", created.id, component.name);
    component.container_id = Some(created.id.clone());
    Ok(created.id)
}

/// One create RPC under the bounded deadline, cancellable
async fn issue_create(
    client: &Client,
    request: &CreateRequest,
    cancel: &CancellationToken,
) -> EngineResult<bollard::models::ContainerCreateResponse> {
    let options = CreateContainerOptions {
        name: request.name.clone(),
        platform: None,
    };

    let create = client
        .docker()
        .create_container(Some(options), request.config.clone());

    tokio::select! {
        _ = cancel.cancelled() => Err(EngineError::Cancelled),
        result = tokio::time::timeout(CREATE_DEADLINE, create) => match result {
            Ok(inner) => inner.map_err(EngineError::Docker),
            Err(_) => Err(EngineError::Timeout("container create")),
        }
    }
}

/// Pull the component's image, draining the progress stream
pub(crate) async fn pull_image(
    client: &Client,
    image: &str,
    cancel: &CancellationToken,
) -> EngineResult<()> {
    info!("Pulling image {}", image);

    let options = CreateImageOptions {
        from_image: image,
        ..Default::default()
    };

    let mut stream = client.docker().create_image(Some(options), None, None);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            next = stream.next() => match next {
                Some(Ok(progress)) => {
                    if let Some(status) = progress.status {
                        debug!("Pull {}: {}", image, status);
                    }
                }
                Some(Err(e)) => return Err(EngineError::ImagePull(e.to_string())),
                None => break,
            }
        }
    }

    info!("Pulled image {}", image);
    Ok(())
}

/// The fully-built create request for one component
pub(crate) struct CreateRequest {
    pub name: String,
    pub config: Config<String>,
}

/// Build the create request for a component. Pure so the namespace
/// wiring invariants can be checked without a daemon.
pub(crate) fn build_create_request(
    supervisor_id: &str,
    supervisor_name: &str,
    cgroup: &str,
    configuration: &Configuration,
    component: &Component,
) -> EngineResult<CreateRequest> {
    if component.image.is_empty() {
        return Err(EngineError::Config(format!(
            "component {} has no image",
            component.name
        )));
    }

    let entrypoint = component.entrypoint.normalize()?;
    let command = component.command.normalize()?;

    let shared_namespace = format!("container:{}", supervisor_id);

    let host_config = HostConfig {
        auto_remove: Some(true),
        cgroup_parent: Some(cgroup.to_string()),
        cgroup: Some(shared_namespace.clone()),
        ipc_mode: Some(shared_namespace.clone()),
        network_mode: Some(shared_namespace.clone()),
        pid_mode: configuration.share_pids.then(|| shared_namespace.clone()),
        volumes_from: configuration
            .share_volumes
            .then(|| vec![supervisor_id.to_string()]),
        ..Default::default()
    };

    let stop_timeout = match component.effective_grace(Duration::ZERO) {
        grace if grace.is_zero() => None,
        grace => Some(grace.as_secs() as i64),
    };

    let config = Config {
        image: Some(component.image.clone()),
        entrypoint: (!entrypoint.is_empty()).then_some(entrypoint),
        cmd: (!command.is_empty()).then_some(command),
        working_dir: component.working_dir.clone(),
        env: (!component.environment.is_empty()).then(|| component.environment.clone()),
        labels: (!component.labels.is_empty()).then(|| component.labels.clone()),
        tty: Some(component.tty),
        stop_signal: component.stop_signal.clone(),
        stop_timeout,
        healthcheck: component
            .healthcheck
            .as_ref()
            .map(build_health_config)
            .transpose()?,
        host_config: Some(host_config),
        ..Default::default()
    };

    Ok(CreateRequest {
        name: format!("{}.podlike.{}", supervisor_name, component.name),
        config,
    })
}

fn build_health_config(health: &HealthCheck) -> EngineResult<HealthConfig> {
    // The daemon dispatches on the first element (NONE/CMD/CMD-SHELL),
    // so a string-style test becomes a CMD-SHELL probe verbatim while a
    // list-style test is passed through as given.
    let test = match &health.test {
        ArgList::Absent => Vec::new(),
        ArgList::Line(line) => vec!["CMD-SHELL".to_string(), line.clone()],
        ArgList::Argv(args) => args.clone(),
    };
    let nanos = |d: Duration| d.as_nanos() as i64;

    Ok(HealthConfig {
        test: (!test.is_empty()).then_some(test),
        interval: health.interval.map(nanos),
        timeout: health.timeout.map(nanos),
        start_period: health.start_period.map(nanos),
        retries: health.retries.map(i64::from),
        ..Default::default()
    })
}

/// Copy seed files named by the supervisor's `pod.copy.<component>`
/// labels into the component's container. Every matching label is
/// processed, in label key order.
pub(crate) async fn copy_seed_files(
    client: &Client,
    component: &Component,
    cancel: &CancellationToken,
) -> EngineResult<()> {
    let container_id = component
        .container_id
        .as_deref()
        .ok_or_else(|| EngineError::Other(format!("{} has no container", component.name)))?;

    for (source, target) in seed_copies_for(client.labels(), &component.name)? {
        let contents = tokio::fs::read(&source).await.map_err(EngineError::Io)?;
        let (target_dir, target_filename) = split_target(&target)?;
        let archive = build_seed_archive(target_filename, &contents)?;

        info!(
            "Copying {} to {} @ {} ({} bytes)",
            source,
            component.name,
            target,
            contents.len()
        );

        let options = UploadToContainerOptions {
            path: target_dir.to_string(),
            ..Default::default()
        };

        let upload = client.docker().upload_to_container(
            container_id,
            Some(options),
            Bytes::from(archive),
        );

        tokio::select! {
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            result = upload => result.map_err(EngineError::Docker)?,
        }
    }

    Ok(())
}

/// Scan supervisor labels for seed instructions targeting `name`.
/// Returns `(host_source, container_target)` pairs sorted by label key.
pub(crate) fn seed_copies_for(
    labels: &HashMap<String, String>,
    name: &str,
) -> EngineResult<Vec<(String, String)>> {
    let mut copies: Vec<(&String, &String)> = labels
        .iter()
        .filter(|(key, _)| key.strip_prefix(COPY_LABEL_PREFIX) == Some(name))
        .collect();
    copies.sort_by(|a, b| a.0.cmp(b.0));

    copies
        .into_iter()
        .map(|(_, value)| {
            let mut parts = value.splitn(3, ':');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(source), Some(target), None) if !source.is_empty() && !target.is_empty() => {
                    Ok((source.to_string(), target.to_string()))
                }
                _ => Err(EngineError::Config(format!(
                    "invalid pod.copy configuration: {}",
                    value
                ))),
            }
        })
        .collect()
}

/// Split a container target path into its directory portion (the copy
/// destination) and the file name the archive entry takes.
fn split_target(target: &str) -> EngineResult<(&str, &str)> {
    match target.rfind('/') {
        Some(idx) if idx + 1 < target.len() => Ok((&target[..idx + 1], &target[idx + 1..])),
        _ => Err(EngineError::Config(format!(
            "seed target must be an absolute file path: {}",
            target
        ))),
    }
}

/// Build the single-entry tar stream carrying one seed file
fn build_seed_archive(filename: &str, contents: &[u8]) -> EngineResult<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());

    let mut header = tar::Header::new_gnu();
    header.set_mode(0o644);
    header.set_size(contents.len() as u64);
    builder.append_data(&mut header, filename, contents)?;

    builder.into_inner().map_err(EngineError::Io)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_component(name: &str) -> Component {
        Component {
            image: "alpine".into(),
            name: name.into(),
            ..Default::default()
        }
    }

    const SUP_ID: &str = "abc123";

    #[test]
    fn create_request_wires_shared_namespaces() {
        let request = build_create_request(
            SUP_ID,
            "sup1",
            "/docker/abc123",
            &Configuration::default(),
            &test_component("app"),
        )
        .unwrap();

        let host = request.config.host_config.unwrap();
        let expected = format!("container:{}", SUP_ID);
        assert_eq!(host.cgroup.as_deref(), Some(expected.as_str()));
        assert_eq!(host.ipc_mode.as_deref(), Some(expected.as_str()));
        assert_eq!(host.network_mode.as_deref(), Some(expected.as_str()));
        assert_eq!(host.cgroup_parent.as_deref(), Some("/docker/abc123"));
        assert_eq!(host.auto_remove, Some(true));
        assert_eq!(host.pid_mode, None);
        assert_eq!(host.volumes_from, None);
    }

    #[test]
    fn create_request_derives_container_name() {
        let request = build_create_request(
            SUP_ID,
            "sup1",
            "/docker/abc123",
            &Configuration::default(),
            &test_component("app"),
        )
        .unwrap();
        assert_eq!(request.name, "sup1.podlike.app");
    }

    #[test]
    fn create_request_honors_share_toggles() {
        let configuration = Configuration {
            share_pids: true,
            share_volumes: true,
            ..Default::default()
        };
        let request = build_create_request(
            SUP_ID,
            "sup1",
            "/docker/abc123",
            &configuration,
            &test_component("app"),
        )
        .unwrap();

        let host = request.config.host_config.unwrap();
        assert_eq!(host.pid_mode.as_deref(), Some("container:abc123"));
        assert_eq!(host.volumes_from, Some(vec![SUP_ID.to_string()]));
    }

    #[test]
    fn create_request_floors_stop_grace_to_seconds() {
        let mut component = test_component("app");
        component.stop_grace_period = Some(Duration::from_millis(2500));
        let request = build_create_request(
            SUP_ID,
            "sup1",
            "/docker/abc123",
            &Configuration::default(),
            &component,
        )
        .unwrap();
        assert_eq!(request.config.stop_timeout, Some(2));

        component.stop_grace_period = None;
        let request = build_create_request(
            SUP_ID,
            "sup1",
            "/docker/abc123",
            &Configuration::default(),
            &component,
        )
        .unwrap();
        assert_eq!(request.config.stop_timeout, None);
    }

    #[test]
    fn create_request_normalizes_both_arg_lists() {
        let mut component = test_component("app");
        component.entrypoint = ArgList::Line("sh -c".into());
        component.command = ArgList::Line("'echo hi'".into());
        let request = build_create_request(
            SUP_ID,
            "sup1",
            "/docker/abc123",
            &Configuration::default(),
            &component,
        )
        .unwrap();
        assert_eq!(
            request.config.entrypoint,
            Some(vec!["sh".to_string(), "-c".to_string()])
        );
        assert_eq!(request.config.cmd, Some(vec!["echo hi".to_string()]));
    }

    #[test]
    fn create_request_propagates_entrypoint_errors() {
        let mut component = test_component("app");
        component.entrypoint = ArgList::Line("sh 'broken".into());
        let result = build_create_request(
            SUP_ID,
            "sup1",
            "/docker/abc123",
            &Configuration::default(),
            &component,
        );
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn create_request_maps_healthcheck_durations() {
        let mut component = test_component("app");
        component.healthcheck = Some(HealthCheck {
            test: ArgList::Argv(vec!["CMD".into(), "true".into()]),
            interval: Some(Duration::from_secs(10)),
            timeout: Some(Duration::from_secs(5)),
            start_period: None,
            retries: Some(3),
        });
        let request = build_create_request(
            SUP_ID,
            "sup1",
            "/docker/abc123",
            &Configuration::default(),
            &component,
        )
        .unwrap();

        let health = request.config.healthcheck.unwrap();
        assert_eq!(health.test, Some(vec!["CMD".to_string(), "true".to_string()]));
        assert_eq!(health.interval, Some(10_000_000_000));
        assert_eq!(health.timeout, Some(5_000_000_000));
        assert_eq!(health.retries, Some(3));
    }

    #[test]
    fn string_healthcheck_becomes_a_shell_probe() {
        let mut component = test_component("app");
        component.healthcheck = Some(HealthCheck {
            test: ArgList::Line("wget -q -O /dev/null http://localhost/".into()),
            ..Default::default()
        });
        let request = build_create_request(
            SUP_ID,
            "sup1",
            "/docker/abc123",
            &Configuration::default(),
            &component,
        )
        .unwrap();

        let health = request.config.healthcheck.unwrap();
        assert_eq!(
            health.test,
            Some(vec![
                "CMD-SHELL".to_string(),
                "wget -q -O /dev/null http://localhost/".to_string(),
            ])
        );
    }

    #[test]
    fn absent_healthcheck_test_maps_to_none() {
        let mut component = test_component("app");
        component.healthcheck = Some(HealthCheck {
            interval: Some(Duration::from_secs(30)),
            ..Default::default()
        });
        let request = build_create_request(
            SUP_ID,
            "sup1",
            "/docker/abc123",
            &Configuration::default(),
            &component,
        )
        .unwrap();

        let health = request.config.healthcheck.unwrap();
        assert_eq!(health.test, None);
        assert_eq!(health.interval, Some(30_000_000_000));
    }

    #[test]
    fn seed_scan_matches_exact_component_suffix() {
        let mut labels = HashMap::new();
        labels.insert(
            "pod.copy.app".to_string(),
            "/host/cfg.yml:/etc/app/config.yml".to_string(),
        );
        labels.insert(
            "pod.copy.apprentice".to_string(),
            "/host/other:/etc/other".to_string(),
        );
        labels.insert("unrelated".to_string(), "x:y".to_string());

        let copies = seed_copies_for(&labels, "app").unwrap();
        assert_eq!(
            copies,
            vec![("/host/cfg.yml".to_string(), "/etc/app/config.yml".to_string())]
        );
    }

    #[test]
    fn seed_scan_rejects_malformed_values() {
        let mut labels = HashMap::new();
        labels.insert("pod.copy.app".to_string(), "/host/only-source".to_string());
        assert!(matches!(
            seed_copies_for(&labels, "app"),
            Err(EngineError::Config(_))
        ));

        labels.insert("pod.copy.app".to_string(), "a:b:c".to_string());
        assert!(matches!(
            seed_copies_for(&labels, "app"),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn seed_archive_has_single_well_formed_entry() {
        let contents = b"key: value\n";
        let archive = build_seed_archive("config.yml", contents).unwrap();

        let mut reader = tar::Archive::new(&archive[..]);
        let mut entries = reader.entries().unwrap();

        let entry = entries.next().unwrap().unwrap();
        assert_eq!(entry.path().unwrap().to_str(), Some("config.yml"));
        assert_eq!(entry.header().mode().unwrap(), 0o644);
        assert_eq!(entry.header().size().unwrap(), contents.len() as u64);

        assert!(entries.next().is_none());
    }

    #[test]
    fn target_splits_into_directory_and_basename() {
        assert_eq!(
            split_target("/etc/app/config.yml").unwrap(),
            ("/etc/app/", "config.yml")
        );
        assert!(split_target("config.yml").is_err());
        assert!(split_target("/etc/app/").is_err());
    }
}
