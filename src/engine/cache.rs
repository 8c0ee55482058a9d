//! # Caches de uma Execução de Plano
//!
//! O único estado mutável de uma execução vive aqui: o cache de
//! resultados de action e o cache de uso de recuperação. Ambos nascem
//! com a execução e morrem com ela; nunca são compartilhados entre
//! execuções.
//!
//! ## Cache de resultados
//!
//! Memoriza `nome → última-falha-ou-sucesso`. É consultado no começo
//! de toda invocação de action e é o que quebra ciclos e evita
//! reexecutar diagnósticos caros. A política `run_control` da action
//! decide se o resultado entra no cache e se sobrevive a um reinício.
//!
//! ## Cache de uso de recuperação
//!
//! Memoriza `(action, recuperação) → última-falha-ou-sucesso`. Garante
//! que cada recuperação roda no máximo uma vez por action-pai dentro
//! de uma execução, mesmo atravessando reinícios.
//!
//! Uma recuperação conta como "usada" se aparece em **qualquer um**
//! dos dois caches; os dois lados da união são necessários.

use std::collections::HashMap;

use crate::protocol::RunControl;

/// Resultado memorizado: `None` = sucesso, `Some(mensagem)` = falha.
pub type CachedResult = Option<String>;

// ============================================================================
// CACHE DE RESULTADOS
// ============================================================================

#[derive(Debug, Clone)]
struct CacheEntry {
    result: CachedResult,
    run_control: RunControl,
}

/// Cache `nome → resultado` de uma execução de plano.
#[derive(Debug, Default)]
pub struct ActionResultCache {
    entries: HashMap<String, CacheEntry>,
}

impl ActionResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resultado memorizado da action, se houver.
    pub fn get(&self, name: &str) -> Option<&CachedResult> {
        self.entries.get(name).map(|entry| &entry.result)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Grava um resultado respeitando a política da action:
    /// `ALWAYS_RUN` nunca entra no cache.
    pub fn put(&mut self, name: &str, run_control: RunControl, result: CachedResult) {
        if run_control == RunControl::AlwaysRun {
            return;
        }
        self.entries.insert(
            name.to_string(),
            CacheEntry {
                result,
                run_control,
            },
        );
    }

    /// Despejo executado a cada reinício (start-over): remove as
    /// entradas `RERUN_AFTER_RECOVERY` e mantém as `RUN_ONCE`.
    pub fn reset_for_start_over(&mut self) {
        self.entries
            .retain(|_, entry| entry.run_control == RunControl::RunOnce);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// CACHE DE USO DE RECUPERAÇÃO
// ============================================================================

/// Cache `(action, recuperação) → resultado` de uma execução de plano.
#[derive(Debug, Default)]
pub struct RecoveryUsageCache {
    entries: HashMap<(String, String), CachedResult>,
}

impl RecoveryUsageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra o uso de uma recuperação pelo seu action-pai.
    pub fn register(&mut self, action: &str, recovery: &str, result: CachedResult) {
        self.entries
            .insert((action.to_string(), recovery.to_string()), result);
    }

    pub fn contains(&self, action: &str, recovery: &str) -> bool {
        self.entries
            .contains_key(&(action.to_string(), recovery.to_string()))
    }

    /// Semântica de união: a recuperação conta como usada se este
    /// cache registrou o par `(action, recovery)` **ou** se a própria
    /// recuperação já tem resultado no cache de actions (rodou antes
    /// como action comum).
    pub fn is_used(&self, action: &str, recovery: &str, results: &ActionResultCache) -> bool {
        self.contains(action, recovery) || results.contains(recovery)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

// ============================================================================
// TESTES
// ============================================================================
