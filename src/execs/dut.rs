// Execs that talk to the device under test itself: reachability, SSH
// health, reboot and scheduler-state updates.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use super::{Exec, ExecError, ExecRegistry, ExecRunArgs};
use crate::retry;

/// Interval between reachability probes while waiting for a device to
/// come back.
const PING_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Pause between individual ping attempts.
const PING_ATTEMPT_INTERVAL: Duration = Duration::from_secs(1);

/// Reachability probe of the DUT. First extra-arg overrides the number
/// of attempts (default 2).
pub struct DutPing;

#[async_trait]
impl Exec for DutPing {
    async fn run(&self, args: &ExecRunArgs) -> Result<(), ExecError> {
        let attempts = args.arg_u32(0, 2);
        let access = args.access.clone();
        let resource = args.resource.clone();
        retry::with_attempts("dut_ping", attempts, PING_ATTEMPT_INTERVAL, move || {
            let access = access.clone();
            let resource = resource.clone();
            async move { access.ping(&resource, 1).await.map_err(ExecError::from) }
        })
        .await
    }
}

/// Verifies the DUT accepts commands by running a no-op on it.
pub struct DutSsh;

#[async_trait]
impl Exec for DutSsh {
    async fn run(&self, args: &ExecRunArgs) -> Result<(), ExecError> {
        let result = args
            .access
            .run(&args.resource, "true", args.timeout)
            .await?;
        if result.success() {
            Ok(())
        } else {
            Err(ExecError::failure(format!(
                "ssh check on '{}' exited with {}: {}",
                args.resource,
                result.exit_code,
                result.stderr.trim()
            )))
        }
    }
}

/// Reboots the DUT and waits for it to answer pings again. The whole
/// wait counts against the action's exec timeout.
pub struct DutReboot;

#[async_trait]
impl Exec for DutReboot {
    async fn run(&self, args: &ExecRunArgs) -> Result<(), ExecError> {
        info!(resource = %args.resource, "rebooting dut");
        let result = args
            .access
            .run(&args.resource, "reboot", Duration::from_secs(30))
            .await?;
        if !result.success() {
            return Err(ExecError::failure(format!(
                "reboot command exited with {}",
                result.exit_code
            )));
        }

        let access = args.access.clone();
        let resource = args.resource.clone();
        retry::with_deadline(
            "dut_reboot_wait",
            args.timeout,
            PING_RETRY_INTERVAL,
            &args.cancel,
            move || {
                let access = access.clone();
                let resource = resource.clone();
                async move { access.ping(&resource, 1).await.map_err(ExecError::from) }
            },
        )
        .await
    }
}

/// Writes the scheduler state from the first extra-arg into the
/// inventory record of the DUT.
pub struct DutStateUpdate;

#[async_trait]
impl Exec for DutStateUpdate {
    async fn run(&self, args: &ExecRunArgs) -> Result<(), ExecError> {
        let state = args
            .arg(0)
            .ok_or_else(|| ExecError::abort("dut_state_update requires a state argument"))?;
        let mut dut = args.access.get_dut(&args.resource).await?;
        dut.state = state.to_string();
        args.access.update_dut(&dut).await?;
        info!(resource = %args.resource, state = %state, "dut state updated");
        Ok(())
    }
}

pub(super) fn register(registry: &mut ExecRegistry) {
    registry.register("dut_ping", Arc::new(DutPing));
    registry.register("dut_ssh", Arc::new(DutSsh));
    registry.register("dut_reboot", Arc::new(DutReboot));
    registry.register("dut_state_update", Arc::new(DutStateUpdate));
}
