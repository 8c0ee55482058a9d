//! # Módulo de Limites de Execução
//!
//! Define os guarda-corpos que protegem o runner contra planos
//! patológicos.
//!
//! ## Para todos entenderem:
//!
//! Um plano é um grafo escrito à mão. Duas coisas podem dar errado:
//!
//! 1. **Reinícios demais**: cada recuperação bem sucedida reinicia as
//!    critical actions. O cache de uso de recuperação já garante que
//!    isso termina, mas um teto explícito transforma um plano doente
//!    em erro claro em vez de uma execução interminável.
//! 2. **Travessia profunda demais**: ciclos entre actions *distintas*
//!    são estruturalmente permitidos e normalmente quebrados pelos
//!    caches. Quando o grafo consegue escapar dos caches, o limite de
//!    profundidade converte a recursão infinita em falha tipada.
//!
//! ## Limites configuráveis:
//!
//! | Limite        | Padrão | Variável de ambiente    |
//! |---------------|--------|-------------------------|
//! | max_restarts  | 100    | RUNNER_MAX_RESTARTS     |
//! | max_depth     | 64     | RUNNER_MAX_DEPTH        |
//! | plan_deadline | nenhum | RUNNER_PLAN_TIMEOUT     |

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::protocol::DurationSpec;

// ============================================================================
// PADRÕES
// ============================================================================

/// Teto de reinícios (start-over) por execução de plano.
pub const DEFAULT_MAX_RESTARTS: u32 = 100;

/// Teto de profundidade da travessia recursiva.
pub const DEFAULT_MAX_DEPTH: u32 = 64;

// ============================================================================
// ESTRUTURA DE LIMITES
// ============================================================================

/// Guarda-corpos de uma execução de plano.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLimits {
    /// Máximo de reinícios por execução de plano.
    pub max_restarts: u32,

    /// Máximo de actions empilhadas na travessia recursiva.
    pub max_depth: u32,

    /// Orçamento total opcional da execução do plano. O deadline de
    /// cada exec é o mínimo entre o timeout da action e o que sobra
    /// deste orçamento.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_deadline: Option<Duration>,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_restarts: DEFAULT_MAX_RESTARTS,
            max_depth: DEFAULT_MAX_DEPTH,
            plan_deadline: None,
        }
    }
}

impl ExecutionLimits {
    /// Carrega limites das variáveis de ambiente, caindo nos padrões
    /// para valores ausentes ou malformados.
    pub fn from_env() -> Self {
        let mut limits = Self::default();

        if let Ok(raw) = std::env::var("RUNNER_MAX_RESTARTS") {
            match raw.parse() {
                Ok(value) => limits.max_restarts = value,
                Err(_) => warn!(raw = %raw, "RUNNER_MAX_RESTARTS inválido, usando padrão"),
            }
        }

        if let Ok(raw) = std::env::var("RUNNER_MAX_DEPTH") {
            match raw.parse() {
                Ok(value) => limits.max_depth = value,
                Err(_) => warn!(raw = %raw, "RUNNER_MAX_DEPTH inválido, usando padrão"),
            }
        }

        if let Ok(raw) = std::env::var("RUNNER_PLAN_TIMEOUT") {
            match DurationSpec::parse(&raw) {
                Some(value) => limits.plan_deadline = Some(value),
                None => warn!(raw = %raw, "RUNNER_PLAN_TIMEOUT inválido, ignorando"),
            }
        }

        limits
    }
}

// ============================================================================
// TESTES
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let limits = ExecutionLimits::default();
        assert_eq!(limits.max_restarts, DEFAULT_MAX_RESTARTS);
        assert_eq!(limits.max_depth, DEFAULT_MAX_DEPTH);
        assert!(limits.plan_deadline.is_none());
    }

    #[test]
    fn test_serde_round_trip() {
        let limits = ExecutionLimits {
            max_restarts: 5,
            max_depth: 16,
            plan_deadline: Some(Duration::from_secs(600)),
        };
        let text = serde_json::to_string(&limits).unwrap();
        let back: ExecutionLimits = serde_json::from_str(&text).unwrap();
        assert_eq!(back.max_restarts, 5);
        assert_eq!(back.max_depth, 16);
        assert_eq!(back.plan_deadline, Some(Duration::from_secs(600)));
    }
}
