//! # Módulo de Retry
//!
//! Implementa os dois laços de repetição que os execs usam para falar
//! com hardware instável: repetição **por contagem** e repetição **por
//! orçamento de tempo**.
//!
//! ## Para todos entenderem:
//!
//! Às vezes uma operação de laboratório falha por motivos temporários:
//! - O DUT ainda está bootando
//! - O servo host teve um soluço de rede
//! - O servod ainda não abriu a porta
//!
//! Estes helpers permitem "tentar de novo" de forma disciplinada, com
//! um limite claro de tentativas ou de tempo.
//!
//! ## Marcador de aborto
//!
//! Um erro pode carregar um marcador de **aborto**
//! ([`ExecError::Abort`]): quando o callback retorna um erro abortado,
//! o laço termina imediatamente, sem novas tentativas. É assim que um
//! exec sinaliza "não adianta insistir" (por exemplo, credencial
//! inválida) ou que o escopo da execução foi cancelado.
//!
//! ## Exemplo de uso:
//!
//! ```ignore
//! retry::with_attempts("dut_ping", 3, Duration::from_secs(1), || async {
//!     args.access.ping(&args.resource, 1).await.map_err(ExecError::from)
//! })
//! .await?;
//! ```

use std::time::{Duration, Instant};

use rand::Rng;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::execs::ExecError;

// ============================================================================
// JITTER
// ============================================================================

/// Acrescenta até 10% de variação aleatória a um intervalo de espera.
///
/// Evita que vários runners batendo no mesmo periférico acordem em
/// sincronia.
fn jittered(interval: Duration) -> Duration {
    if interval.is_zero() {
        return interval;
    }
    let factor: f64 = rand::thread_rng().gen_range(0.0..0.1);
    interval + interval.mul_f64(factor)
}

// ============================================================================
// RETRY POR CONTAGEM
// ============================================================================

/// Repete a operação até `attempts` vezes com espera fixa entre elas.
///
/// ## Comportamento:
/// - Sucesso retorna na primeira tentativa que der `Ok`.
/// - Erro com marcador de aborto termina o laço na hora.
/// - Esgotadas as tentativas, o último erro volta anotado com o número
///   de tentativas e o tempo decorrido.
///
/// `attempts` é tratado como no mínimo 1.
pub async fn with_attempts<T, F, Fut>(
    tag: &str,
    attempts: u32,
    interval: Duration,
    mut op: F,
) -> Result<T, ExecError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ExecError>>,
{
    let started = Instant::now();
    let attempts = attempts.max(1);
    let mut last_error: Option<ExecError> = None;

    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(tag = %tag, attempt = attempt, "retry bem sucedido");
                }
                return Ok(value);
            }
            Err(err) if err.is_abort() => {
                warn!(tag = %tag, attempt = attempt, error = %err, "retry abortado");
                return Err(err);
            }
            Err(err) => {
                warn!(
                    tag = %tag,
                    attempt = attempt,
                    max_attempts = attempts,
                    error = %err,
                    "tentativa falhou"
                );
                last_error = Some(err);
                if attempt < attempts {
                    sleep(jittered(interval)).await;
                }
            }
        }
    }

    // attempts >= 1 garante que houve pelo menos um erro aqui.
    let err = last_error.expect("at least one attempt ran");
    Err(ExecError::failure(format!(
        "{}: falhou após {} tentativa(s) em {:?}: {}",
        tag,
        attempts,
        started.elapsed(),
        err
    )))
}

// ============================================================================
// RETRY POR ORÇAMENTO DE TEMPO
// ============================================================================

/// Repete a operação até o orçamento `budget` expirar.
///
/// ## Comportamento:
/// - Sucesso retorna na primeira tentativa que der `Ok`.
/// - Erro com marcador de aborto termina o laço na hora.
/// - Cancelamento do token termina o laço na hora com um erro
///   abortado, inclusive durante a espera entre tentativas.
/// - Uma nova tentativa só começa se ainda couber a espera dentro do
///   orçamento; senão o último erro volta anotado.
pub async fn with_deadline<T, F, Fut>(
    tag: &str,
    budget: Duration,
    interval: Duration,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, ExecError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ExecError>>,
{
    let started = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(ExecError::abort(format!("{}: escopo cancelado", tag)));
            }
            result = op() => result,
        };

        match result {
            Ok(value) => {
                if attempt > 1 {
                    info!(tag = %tag, attempt = attempt, "retry bem sucedido");
                }
                return Ok(value);
            }
            Err(err) if err.is_abort() => {
                warn!(tag = %tag, attempt = attempt, error = %err, "retry abortado");
                return Err(err);
            }
            Err(err) => {
                let elapsed = started.elapsed();
                if elapsed + interval >= budget {
                    warn!(
                        tag = %tag,
                        attempt = attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        error = %err,
                        "orçamento de tempo esgotado"
                    );
                    return Err(ExecError::failure(format!(
                        "{}: falhou após {} tentativa(s) em {:?}: {}",
                        tag, attempt, elapsed, err
                    )));
                }
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(ExecError::abort(format!("{}: escopo cancelado", tag)));
                    }
                    _ = sleep(jittered(interval)) => {}
                }
            }
        }
    }
}

// ============================================================================
// TESTES
// ============================================================================
