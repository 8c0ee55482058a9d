// Execs that drive the RPM outlet feeding the DUT.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{Exec, ExecError, ExecRegistry, ExecRunArgs};
use crate::access::PowerAction;

async fn set_power(args: &ExecRunArgs, action: PowerAction) -> Result<(), ExecError> {
    let status = args
        .access
        .set_power_supply(&args.resource, action)
        .await?;
    if status.ok {
        info!(resource = %args.resource, action = %action, "power supply changed");
        Ok(())
    } else {
        Err(ExecError::failure(format!(
            "power supply {} on '{}' failed: {}",
            action,
            args.resource,
            status.reason.unwrap_or_else(|| "unknown reason".to_string())
        )))
    }
}

/// OFF, wait, ON. The heavy hammer of lab recovery.
pub struct RpmPowerCycle;

#[async_trait]
impl Exec for RpmPowerCycle {
    async fn run(&self, args: &ExecRunArgs) -> Result<(), ExecError> {
        set_power(args, PowerAction::Cycle).await
    }
}

pub struct RpmPowerOff;

#[async_trait]
impl Exec for RpmPowerOff {
    async fn run(&self, args: &ExecRunArgs) -> Result<(), ExecError> {
        set_power(args, PowerAction::Off).await
    }
}

pub struct RpmPowerOn;

#[async_trait]
impl Exec for RpmPowerOn {
    async fn run(&self, args: &ExecRunArgs) -> Result<(), ExecError> {
        set_power(args, PowerAction::On).await
    }
}

pub(super) fn register(registry: &mut ExecRegistry) {
    registry.register("rpm_power_cycle", Arc::new(RpmPowerCycle));
    registry.register("rpm_power_off", Arc::new(RpmPowerOff));
    registry.register("rpm_power_on", Arc::new(RpmPowerOn));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::stub::StubAccess;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn args_with(access: StubAccess) -> (Arc<StubAccess>, ExecRunArgs) {
        let access = Arc::new(access);
        let args = ExecRunArgs {
            access: access.clone(),
            resource: "dut-1".to_string(),
            dut: None,
            extra_args: Vec::new(),
            timeout: Duration::from_secs(5),
            cancel: CancellationToken::new(),
        };
        (access, args)
    }

    #[tokio::test]
    async fn test_power_cycle() {
        let (access, args) = args_with(StubAccess::ok());
        assert!(RpmPowerCycle.run(&args).await.is_ok());
        assert_eq!(access.journal(), vec!["power:dut-1:CYCLE"]);
    }

    #[tokio::test]
    async fn test_power_off_then_on() {
        let (access, args) = args_with(StubAccess::ok());
        assert!(RpmPowerOff.run(&args).await.is_ok());
        assert!(RpmPowerOn.run(&args).await.is_ok());
        assert_eq!(access.journal(), vec!["power:dut-1:OFF", "power:dut-1:ON"]);
    }
}
