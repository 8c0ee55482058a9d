//! Execs de exemplo, usados em smoke tests de planos e para validar o
//! caminho completo do motor sem tocar em hardware.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use super::{Exec, ExecError, ExecRegistry, ExecRunArgs};

/// Sempre passa.
pub struct SamplePass;

#[async_trait]
impl Exec for SamplePass {
    async fn run(&self, _args: &ExecRunArgs) -> Result<(), ExecError> {
        Ok(())
    }
}

/// Sempre falha. O primeiro extra-arg, se presente, vira a mensagem.
pub struct SampleFail;

#[async_trait]
impl Exec for SampleFail {
    async fn run(&self, args: &ExecRunArgs) -> Result<(), ExecError> {
        let message = args.arg(0).unwrap_or("falha de exemplo");
        Err(ExecError::failure(message))
    }
}

/// Sempre falha com o marcador de aborto.
pub struct SampleAbort;

#[async_trait]
impl Exec for SampleAbort {
    async fn run(&self, args: &ExecRunArgs) -> Result<(), ExecError> {
        let message = args.arg(0).unwrap_or("aborto de exemplo");
        Err(ExecError::abort(message))
    }
}

/// Dorme pelo tempo pedido no primeiro extra-arg (em milissegundos,
/// padrão 1000). Respeita cancelamento do escopo.
pub struct SampleSleep;

#[async_trait]
impl Exec for SampleSleep {
    async fn run(&self, args: &ExecRunArgs) -> Result<(), ExecError> {
        let duration_ms = u64::from(args.arg_u32(0, 1000));
        info!(resource = %args.resource, duration_ms = duration_ms, "sample_sleep");
        tokio::select! {
            _ = args.cancel.cancelled() => Err(ExecError::abort("sleep cancelado")),
            _ = tokio::time::sleep(Duration::from_millis(duration_ms)) => Ok(()),
        }
    }
}

pub(super) fn register(registry: &mut ExecRegistry) {
    registry.register("sample_pass", Arc::new(SamplePass));
    registry.register("sample_fail", Arc::new(SampleFail));
    registry.register("sample_abort", Arc::new(SampleAbort));
    registry.register("sample_sleep", Arc::new(SampleSleep));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::stub::StubAccess;
    use tokio_util::sync::CancellationToken;

    fn args() -> ExecRunArgs {
        ExecRunArgs {
            access: Arc::new(StubAccess::ok()),
            resource: "dut-1".to_string(),
            dut: None,
            extra_args: Vec::new(),
            timeout: Duration::from_secs(5),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_sample_pass() {
        assert!(SamplePass.run(&args()).await.is_ok());
    }

    #[tokio::test]
    async fn test_sample_fail_uses_message_arg() {
        let mut args = args();
        args.extra_args = vec!["bateria fraca".to_string()];
        let err = SampleFail.run(&args).await.unwrap_err();
        assert!(err.to_string().contains("bateria fraca"));
        assert!(!err.is_abort());
    }

    #[tokio::test]
    async fn test_sample_abort_carries_marker() {
        let err = SampleAbort.run(&args()).await.unwrap_err();
        assert!(err.is_abort());
    }

    #[tokio::test]
    async fn test_sample_sleep_respects_cancellation() {
        let mut args = args();
        args.extra_args = vec!["60000".to_string()];
        args.cancel.cancel();
        let err = SampleSleep.run(&args).await.unwrap_err();
        assert!(err.is_abort());
    }

    #[tokio::test]
    async fn test_sample_sleep_completes() {
        let mut args = args();
        args.extra_args = vec!["10".to_string()];
        assert!(SampleSleep.run(&args).await.is_ok());
    }
}
