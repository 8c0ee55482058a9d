// ShellAccess: local development implementation of the Access facade.
//
// Commands run through the local shell and file copies go through the
// local filesystem; the inventory lives in memory and power outlets are
// simulated. The production remote transport (SSH to the lab network)
// plugs in behind the same trait and is configured elsewhere.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use super::{
    Access, AccessError, CommandResult, Dut, PowerAction, PowerStatus, ServodResponse,
    POWER_CYCLE_INTERVAL,
};

/// Access implementation backed by the local machine.
pub struct ShellAccess {
    inventory: RwLock<HashMap<String, Dut>>,
    /// Simulated outlet state per resource: true = powered.
    outlets: Mutex<HashMap<String, bool>>,
}

impl ShellAccess {
    pub fn new() -> Self {
        Self {
            inventory: RwLock::new(HashMap::new()),
            outlets: Mutex::new(HashMap::new()),
        }
    }

    /// Seeds the in-memory inventory.
    pub fn with_inventory(duts: Vec<Dut>) -> Self {
        let inventory = duts.into_iter().map(|d| (d.name.clone(), d)).collect();
        Self {
            inventory: RwLock::new(inventory),
            outlets: Mutex::new(HashMap::new()),
        }
    }

    async fn shell(
        &self,
        resource: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandResult, AccessError> {
        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();

        let output = tokio::time::timeout(timeout, child)
            .await
            .map_err(|_| AccessError::Command {
                resource: resource.to_string(),
                reason: format!("command timed out after {:?}", timeout),
            })?
            .map_err(|e| AccessError::Command {
                resource: resource.to_string(),
                reason: e.to_string(),
            })?;

        Ok(CommandResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

impl Default for ShellAccess {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Access for ShellAccess {
    async fn ping(&self, resource: &str, attempts: u32) -> Result<(), AccessError> {
        let attempts = attempts.max(1);
        for attempt in 1..=attempts {
            let command = format!("ping -c 1 -W 2 {}", resource);
            match self.shell(resource, &command, Duration::from_secs(5)).await {
                Ok(result) if result.success() => return Ok(()),
                Ok(_) | Err(_) => {
                    debug!(resource = %resource, attempt = attempt, "ping attempt failed");
                }
            }
        }
        Err(AccessError::Ping {
            resource: resource.to_string(),
            attempts,
        })
    }

    async fn run(
        &self,
        resource: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandResult, AccessError> {
        debug!(resource = %resource, command = %command, "running command");
        self.shell(resource, command, timeout).await
    }

    async fn call_servod(
        &self,
        resource: &str,
        method: &str,
        _args: &[String],
        _timeout: Duration,
    ) -> Result<ServodResponse, AccessError> {
        // No servod transport on a developer machine.
        Err(AccessError::Servod {
            resource: resource.to_string(),
            method: method.to_string(),
            reason: "no servod transport configured for shell access".to_string(),
        })
    }

    async fn copy_to(
        &self,
        resource: &str,
        src: &str,
        dst: &str,
        recursive: bool,
    ) -> Result<(), AccessError> {
        let flag = if recursive { "-r " } else { "" };
        let command = format!("cp {}{} {}", flag, src, dst);
        let result = self.shell(resource, &command, Duration::from_secs(60)).await?;
        if result.success() {
            Ok(())
        } else {
            Err(AccessError::Copy {
                resource: resource.to_string(),
                direction: "to",
                reason: result.stderr.trim().to_string(),
            })
        }
    }

    async fn copy_from(
        &self,
        resource: &str,
        src: &str,
        dst: &str,
        recursive: bool,
    ) -> Result<(), AccessError> {
        let flag = if recursive { "-r " } else { "" };
        let command = format!("cp {}{} {}", flag, src, dst);
        let result = self.shell(resource, &command, Duration::from_secs(60)).await?;
        if result.success() {
            Ok(())
        } else {
            Err(AccessError::Copy {
                resource: resource.to_string(),
                direction: "from",
                reason: result.stderr.trim().to_string(),
            })
        }
    }

    async fn set_power_supply(
        &self,
        resource: &str,
        action: PowerAction,
    ) -> Result<PowerStatus, AccessError> {
        match action {
            PowerAction::On => {
                self.outlets.lock().await.insert(resource.to_string(), true);
            }
            PowerAction::Off => {
                self.outlets.lock().await.insert(resource.to_string(), false);
            }
            PowerAction::Cycle => {
                self.outlets.lock().await.insert(resource.to_string(), false);
                tokio::time::sleep(POWER_CYCLE_INTERVAL).await;
                self.outlets.lock().await.insert(resource.to_string(), true);
            }
        }
        warn!(resource = %resource, action = %action, "simulated power outlet change");
        Ok(PowerStatus::ok())
    }

    async fn list_resources_for_unit(&self, unit: &str) -> Result<Vec<String>, AccessError> {
        let inventory = self.inventory.read().await;
        let mut resources: Vec<String> = inventory
            .keys()
            .filter(|name| name.as_str() == unit || name.starts_with(unit))
            .cloned()
            .collect();
        resources.sort();
        Ok(resources)
    }

    async fn get_dut(&self, resource: &str) -> Result<Dut, AccessError> {
        self.inventory
            .read()
            .await
            .get(resource)
            .cloned()
            .ok_or_else(|| AccessError::Inventory {
                resource: resource.to_string(),
                reason: "resource not present in inventory".to_string(),
            })
    }

    async fn update_dut(&self, dut: &Dut) -> Result<(), AccessError> {
        if dut.name.is_empty() {
            return Err(AccessError::Inventory {
                resource: String::new(),
                reason: "dut record without a name".to_string(),
            });
        }
        self.inventory
            .write()
            .await
            .insert(dut.name.clone(), dut.clone());
        Ok(())
    }
}
