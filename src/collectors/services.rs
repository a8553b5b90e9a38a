use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use super::{CollectionError, Collector, PartialSnapshot};
use crate::ServiceState;

const NAME: &str = "services";

/// Service states read from systemd via `systemctl show`
#[derive(Debug, Clone)]
pub struct SystemdServiceCollector {
    services: Vec<String>,
    program: String,
}

impl SystemdServiceCollector {
    pub fn new(services: impl IntoIterator<Item = String>) -> Self {
        Self {
            services: services.into_iter().collect(),
            program: "systemctl".to_string(),
        }
    }

    /// Use a different `systemctl` binary
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    async fn query(&self, service: &str) -> Result<ServiceState, std::io::Error> {
        let output = Command::new(&self.program)
            .arg("show")
            .arg(service)
            .arg("--property=LoadState,ActiveState,SubState")
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            warn!(
                "systemctl show {} exited with {}: {}",
                service,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Ok(ServiceState::Error);
        }
        Ok(parse_systemctl_show(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Map the `LoadState`/`ActiveState`/`SubState` properties to a state.
pub fn parse_systemctl_show(output: &str) -> ServiceState {
    let properties: BTreeMap<&str, &str> = output
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim(), value.trim()))
        .collect();

    if properties.get("LoadState") == Some(&"not-found") {
        return ServiceState::NotFound;
    }

    match properties.get("ActiveState").copied() {
        Some("active") | Some("reloading") => ServiceState::Running,
        Some("inactive") | Some("failed") => ServiceState::Stopped,
        Some("activating") => ServiceState::StartPending,
        Some("deactivating") => ServiceState::StopPending,
        Some("maintenance") => ServiceState::Paused,
        _ => ServiceState::Error,
    }
}

#[async_trait]
impl Collector for SystemdServiceCollector {
    fn name(&self) -> &str {
        NAME
    }

    #[instrument(skip_all, fields(services = self.services.len()))]
    async fn collect(&self) -> Result<PartialSnapshot, CollectionError> {
        let results = join_all(self.services.iter().map(|service| self.query(service))).await;

        let mut service_states = BTreeMap::new();
        for (service, result) in self.services.iter().zip(results) {
            match result {
                Ok(state) => {
                    debug!("{service}: {state}");
                    service_states.insert(service.clone(), state);
                }
                // the service manager itself is unusable, not just this one service
                Err(e) => {
                    return Err(CollectionError::failed(
                        NAME,
                        format!("failed to run {}: {}", self.program, e),
                    ));
                }
            }
        }

        Ok(PartialSnapshot {
            service_states,
            ..Default::default()
        })
    }
}
