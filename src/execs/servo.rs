//! # Execs de Servo
//!
//! Execs que falam com o servo host e com o daemon `servod` que roda
//! nele. O servo é o braço físico do laboratório: abre tampa, aperta
//! reset, mede sinais. Tudo passa pela fachada de acesso; estes execs
//! só decidem *o que* pedir e *como* interpretar a resposta.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use super::{Exec, ExecError, ExecRegistry, ExecRunArgs};
use crate::access::ServodValue;
use crate::retry;

/// Intervalo entre sondas esperando o DUT voltar após um reset.
const RESET_PING_INTERVAL: Duration = Duration::from_secs(5);

/// Pausa entre tentativas individuais de ping.
const PING_ATTEMPT_INTERVAL: Duration = Duration::from_secs(1);

/// Ping do servo host. Primeiro extra-arg define as tentativas.
pub struct ServoHostPing;

#[async_trait]
impl Exec for ServoHostPing {
    async fn run(&self, args: &ExecRunArgs) -> Result<(), ExecError> {
        let attempts = args.arg_u32(0, 2);
        let access = args.access.clone();
        let host = args.servo_host();
        retry::with_attempts("servo_host_ping", attempts, PING_ATTEMPT_INTERVAL, move || {
            let access = access.clone();
            let host = host.clone();
            async move { access.ping(&host, 1).await.map_err(ExecError::from) }
        })
        .await
    }
}

/// Verifica que o servo host aceita comandos.
pub struct ServoHostSsh;

#[async_trait]
impl Exec for ServoHostSsh {
    async fn run(&self, args: &ExecRunArgs) -> Result<(), ExecError> {
        let host = args.servo_host();
        let result = args.access.run(&host, "true", args.timeout).await?;
        if result.success() {
            Ok(())
        } else {
            Err(ExecError::failure(format!(
                "ssh check on servo host '{}' exited with {}",
                host, result.exit_code
            )))
        }
    }
}

/// Eco no servod: prova que o daemon responde chamadas.
pub struct ServodEcho;

#[async_trait]
impl Exec for ServodEcho {
    async fn run(&self, args: &ExecRunArgs) -> Result<(), ExecError> {
        let response = args
            .access
            .call_servod(&args.resource, "echo", &["ping".to_string()], args.timeout)
            .await?;
        if response.fault {
            return Err(ExecError::failure("servod echo respondeu com falha"));
        }
        info!(resource = %args.resource, value = %response.value.as_text(), "servod echo");
        Ok(())
    }
}

/// Lê o estado da tampa e exige que esteja aberta.
///
/// O servod responde "yes"/"no" (ou booleano, dependendo da versão).
pub struct ServodLidOpen;

#[async_trait]
impl Exec for ServodLidOpen {
    async fn run(&self, args: &ExecRunArgs) -> Result<(), ExecError> {
        let response = args
            .access
            .call_servod(&args.resource, "lid_open", &[], args.timeout)
            .await?;
        if response.fault {
            return Err(ExecError::failure("servod lid_open respondeu com falha"));
        }
        let open = match &response.value {
            ServodValue::String(s) => s == "yes",
            ServodValue::Bool(b) => *b,
            other => {
                return Err(ExecError::failure(format!(
                    "resposta inesperada de lid_open: {}",
                    other.as_text()
                )))
            }
        };
        if open {
            Ok(())
        } else {
            Err(ExecError::failure("tampa do DUT está fechada"))
        }
    }
}

/// Força a tampa aberta e confere o resultado. Usada como recuperação
/// de `servod_lid_open`.
pub struct ServodLidOpenRecover;

#[async_trait]
impl Exec for ServodLidOpenRecover {
    async fn run(&self, args: &ExecRunArgs) -> Result<(), ExecError> {
        let set = args
            .access
            .call_servod(
                &args.resource,
                "lid_open",
                &["yes".to_string()],
                args.timeout,
            )
            .await?;
        if set.fault {
            return Err(ExecError::failure("servod recusou abrir a tampa"));
        }
        // Releitura confirma que o set pegou.
        ServodLidOpen.run(args).await
    }
}

/// Cold reset do DUT via servo e espera pelo retorno do ping.
pub struct ServodDutColdReset;

#[async_trait]
impl Exec for ServodDutColdReset {
    async fn run(&self, args: &ExecRunArgs) -> Result<(), ExecError> {
        let response = args
            .access
            .call_servod(
                &args.resource,
                "power_state",
                &["cold_reset".to_string()],
                args.timeout,
            )
            .await?;
        if response.fault {
            return Err(ExecError::failure("servod recusou o cold reset"));
        }
        info!(resource = %args.resource, "cold reset disparado, esperando o DUT voltar");

        let access = args.access.clone();
        let resource = args.resource.clone();
        retry::with_deadline(
            "cold_reset_wait",
            args.timeout,
            RESET_PING_INTERVAL,
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

pub(super) fn register(registry: &mut ExecRegistry) {
    registry.register("servo_host_ping", Arc::new(ServoHostPing));
    registry.register("servo_host_ssh", Arc::new(ServoHostSsh));
    registry.register("servod_echo", Arc::new(ServodEcho));
    registry.register("servod_lid_open", Arc::new(ServodLidOpen));
    registry.register("servod_lid_open_recover", Arc::new(ServodLidOpenRecover));
    registry.register("servod_dut_cold_reset", Arc::new(ServodDutColdReset));
}
