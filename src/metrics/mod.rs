//! # Módulo de Métricas
//!
//! Registra um evento em volta de cada plano e de cada action que o
//! motor executa: nome, tipo, horários, status e observações extras.
//!
//! ## Para todos entenderem:
//!
//! É o "diário de bordo" da recuperação. Cada entrada diz o que rodou,
//! quando começou, quando terminou e como terminou. Ferramentas de
//! análise de frota consomem esses eventos para responder perguntas
//! como "quantos reparos precisaram de power cycle esta semana?".
//!
//! ## O contrato
//!
//! O destino dos eventos é plugável ([`MetricSink`]): produção envia
//! para um serviço de coleta; desenvolvimento loga; testes acumulam em
//! memória; e o sink nulo descarta tudo. O motor não sabe a diferença.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

// ============================================================================
// TIPOS DO EVENTO
// ============================================================================

/// Tipo do escopo que o evento cobre.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    /// Uma execução completa de plano.
    Plan,
    /// Uma invocação de action.
    Action,
}

/// Desfecho do escopo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordStatus {
    /// Escopo ainda aberto (valor inicial).
    Unspecified,
    Success,
    Fail,
    /// A action foi pulada (condição falhou).
    Skip,
}

/// Observação chave/valor anexada a um evento.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub key: String,
    pub value: String,
}

impl Observation {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Observação numérica (contadores).
    pub fn count(key: impl Into<String>, value: u32) -> Self {
        Self::new(key, value.to_string())
    }
}

/// Evento emitido em volta de um plano ou de uma action.
#[derive(Debug, Clone, Serialize)]
pub struct ActionRecord {
    /// Nome do plano ou da action.
    pub name: String,

    /// Plano ou action.
    pub kind: RecordKind,

    /// Recurso alvo (nome do DUT).
    pub hostname: String,

    /// Início do escopo.
    pub start_time: DateTime<Utc>,

    /// Fim do escopo; preenchido no fechamento.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_time: Option<DateTime<Utc>>,

    /// Desfecho; Unspecified enquanto o escopo está aberto.
    pub status: RecordStatus,

    /// Causa da falha, quando status = Fail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fail_reason: Option<String>,

    /// Observações extras (contagem de reinícios, falhas perdoadas...).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub observations: Vec<Observation>,
}

impl ActionRecord {
    /// Abre um evento com o horário atual.
    pub fn start(kind: RecordKind, name: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            hostname: hostname.into(),
            start_time: Utc::now(),
            stop_time: None,
            status: RecordStatus::Unspecified,
            fail_reason: None,
            observations: Vec::new(),
        }
    }

    /// Fecha o evento com o desfecho e a causa.
    pub fn finish(&mut self, status: RecordStatus, fail_reason: Option<String>) {
        self.stop_time = Some(Utc::now());
        self.status = status;
        self.fail_reason = fail_reason;
    }

    pub fn observe(&mut self, observation: Observation) {
        self.observations.push(observation);
    }
}

// ============================================================================
// SINKS
// ============================================================================

/// Destino plugável dos eventos de métrica.
#[async_trait]
pub trait MetricSink: Send + Sync {
    async fn publish(&self, record: &ActionRecord) -> anyhow::Result<()>;
}

/// Sink que descarta tudo.
pub struct NoopSink;

#[async_trait]
impl MetricSink for NoopSink {
    async fn publish(&self, _record: &ActionRecord) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Sink que loga cada evento via tracing. Usado no modo dev da CLI.
pub struct LogSink;

#[async_trait]
impl MetricSink for LogSink {
    async fn publish(&self, record: &ActionRecord) -> anyhow::Result<()> {
        info!(
            name = %record.name,
            kind = ?record.kind,
            hostname = %record.hostname,
            status = ?record.status,
            fail_reason = record.fail_reason.as_deref().unwrap_or(""),
            observations = record.observations.len(),
            "metric"
        );
        Ok(())
    }
}

/// Sink que acumula eventos em memória. Feito para testes e para
/// embedders que querem inspecionar a execução depois.
#[derive(Default)]
pub struct CollectingSink {
    records: std::sync::Mutex<Vec<ActionRecord>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cópia de todos os eventos publicados até agora.
    pub fn records(&self) -> Vec<ActionRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetricSink for CollectingSink {
    async fn publish(&self, record: &ActionRecord) -> anyhow::Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

// ============================================================================
// TESTES
// ============================================================================
