//! # Módulo de Protocolo - Estruturas de Dados do Plano
//!
//! Este módulo define todas as **estruturas de dados** que representam
//! um plano de recuperação: o documento de configuração que o operador
//! escreve e o grafo interno que o motor executa.
//!
//! ## O que é um Plano?
//!
//! Um plano é uma árvore nomeada de *actions* com dependências,
//! condições, ações de recuperação e políticas de cache. O motor
//! percorre essa árvore contra um dispositivo de laboratório (DUT,
//! servo host, tomada RPM) tentando diagnosticar e reparar.
//!
//! ## Estrutura do documento de configuração:
//!
//! ```json
//! {
//!   "dut_repair": {
//!     "allow_fail": false,
//!     "critical_actions": ["dut_ssh"],
//!     "actions": {
//!       "dut_ssh": {
//!         "conditions": ["dut_ping"],
//!         "dependencies": ["servo_host_ssh"],
//!         "recovery_actions": ["servod_dut_cold_reset"],
//!         "exec_timeout": "30s",
//!         "run_control": "RERUN_AFTER_RECOVERY"
//!       }
//!     }
//!   }
//! }
//! ```
//!
//! ## Hierarquia de Tipos:
//!
//! ```text
//! documento (JSON)                 grafo interno
//! ┌──────────────┐   loader   ┌──────────────┐
//! │ PlanSpec     │ ─────────> │ Plan         │
//! │ └ ActionSpec │            │ └ Action     │
//! └──────────────┘            └──────────────┘
//! ```
//!
//! `PlanSpec`/`ActionSpec` são o formato serializável; `Plan`/`Action`
//! são o grafo completamente ligado (todo nome referenciado existe,
//! `exec_name` resolvido, timeout materializado). O grafo é imutável
//! durante uma execução.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

// ============================================================================
// CONSTANTES
// ============================================================================

/// Timeout padrão de um exec quando o documento não define `exec_timeout`.
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(60);

// ============================================================================
// RUN CONTROL
// ============================================================================

/// Política de cache de uma action dentro de uma execução de plano.
///
/// Controla se o resultado da action é memorizado e se sobrevive a um
/// reinício (start-over) disparado por uma recuperação bem sucedida.
///
/// | Valor               | Grava no cache? | Sobrevive ao reinício? |
/// |---------------------|-----------------|------------------------|
/// | RunOnce             | sim             | sim                    |
/// | RerunAfterRecovery  | sim             | não                    |
/// | AlwaysRun           | não             | n/a                    |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunControl {
    /// Executa no máximo uma vez por execução de plano.
    #[default]
    #[serde(rename = "RUN_ONCE", alias = "run_once")]
    RunOnce,

    /// Executa de novo após cada reinício por recuperação.
    #[serde(rename = "RERUN_AFTER_RECOVERY", alias = "rerun_after_recovery")]
    RerunAfterRecovery,

    /// Executa toda vez que for referenciada; nunca entra no cache.
    #[serde(rename = "ALWAYS_RUN", alias = "always_run")]
    AlwaysRun,
}

impl fmt::Display for RunControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RunOnce => "RUN_ONCE",
            Self::RerunAfterRecovery => "RERUN_AFTER_RECOVERY",
            Self::AlwaysRun => "ALWAYS_RUN",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// BOOLEANO TOLERANTE (TRUTHY)
// ============================================================================

/// Booleano tolerante usado nos documentos de configuração.
///
/// Documentos vêm de fontes variadas, então aceitamos:
/// - booleano `true`/`false`
/// - inteiro `1` (verdadeiro); qualquer outro inteiro é falso
/// - string `"true"` (qualquer capitalização); qualquer outra é falsa
///
/// Na serialização o valor volta como booleano puro.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Truthy(pub bool);

impl Truthy {
    pub fn value(self) -> bool {
        self.0
    }
}

impl Serialize for Truthy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bool(self.0)
    }
}

impl<'de> Deserialize<'de> for Truthy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        let value = match raw {
            serde_json::Value::Bool(b) => b,
            serde_json::Value::Number(n) => n.as_i64() == Some(1),
            serde_json::Value::String(s) => s.eq_ignore_ascii_case("true"),
            _ => false,
        };
        Ok(Self(value))
    }
}

// ============================================================================
// DURAÇÃO COM SUFIXO
// ============================================================================

/// Regex para durações com sufixo: "500ms", "60s", "5m", "1h".
static DURATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)\s*(ms|s|m|h)?$").expect("valid duration regex"));

/// Duração serializável usada em `exec_timeout`.
///
/// ## Formatos aceitos:
/// - número inteiro → segundos (`30` = 30 s)
/// - string com sufixo → `"500ms"`, `"30s"`, `"5m"`, `"1h"`
///
/// Serializa de volta na forma canônica em segundos (`"30s"`), ou em
/// milissegundos quando a duração não é um número inteiro de segundos.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationSpec(pub Duration);

impl DurationSpec {
    pub fn duration(self) -> Duration {
        self.0
    }

    /// Parseia a forma textual. Retorna `None` para entradas inválidas.
    pub fn parse(text: &str) -> Option<Duration> {
        let caps = DURATION_RE.captures(text.trim())?;
        let amount: u64 = caps.get(1)?.as_str().parse().ok()?;
        let unit = caps.get(2).map(|m| m.as_str()).unwrap_or("s");
        let duration = match unit {
            "ms" => Duration::from_millis(amount),
            "s" => Duration::from_secs(amount),
            "m" => Duration::from_secs(amount * 60),
            "h" => Duration::from_secs(amount * 3600),
            _ => return None,
        };
        Some(duration)
    }

    fn canonical(self) -> String {
        let d = self.0;
        if d.subsec_millis() == 0 && d.as_secs() > 0 {
            format!("{}s", d.as_secs())
        } else {
            format!("{}ms", d.as_millis())
        }
    }
}

impl Serialize for DurationSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.canonical())
    }
}

impl<'de> Deserialize<'de> for DurationSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        match raw {
            serde_json::Value::Number(n) => {
                let secs = n
                    .as_u64()
                    .ok_or_else(|| de::Error::custom("exec_timeout must be a positive integer"))?;
                Ok(Self(Duration::from_secs(secs)))
            }
            serde_json::Value::String(s) => DurationSpec::parse(&s)
                .map(Self)
                .ok_or_else(|| de::Error::custom(format!("invalid duration '{}'", s))),
            other => Err(de::Error::custom(format!(
                "exec_timeout must be a number or string, got {}",
                other
            ))),
        }
    }
}

// ============================================================================
// DOCUMENTO: ACTION SPEC
// ============================================================================

/// Uma action como aparece no documento de configuração.
///
/// Todos os campos são opcionais: uma action declarada como `{}` (ou
/// nem declarada, apenas referenciada) vira uma action padrão cujo
/// exec é o próprio nome.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionSpec {
    /// Chave no registro de execs. Ausente ⇒ usa o nome da action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec_name: Option<String>,

    /// Argumentos extras passados ao exec, em ordem.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exec_extra_args: Vec<String>,

    /// Tempo máximo de execução do exec. Ausente ⇒ 60 s.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec_timeout: Option<DurationSpec>,

    /// Actions que precisam passar (sem recuperação) para esta ser
    /// elegível. Falha de condição pula a action, nunca a falha.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<String>,

    /// Actions que precisam passar antes do exec rodar.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,

    /// Actions tentadas, em ordem, após falha do exec.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recovery_actions: Vec<String>,

    /// Se verdadeiro, falha final (após recuperações) é registrada e
    /// engolida; a execução continua.
    #[serde(default)]
    pub allow_fail_after_recovery: Truthy,

    /// Política de cache do resultado.
    #[serde(default)]
    pub run_control: RunControl,
}

// ============================================================================
// DOCUMENTO: PLAN SPEC
// ============================================================================

/// Um plano como aparece no documento de configuração.
///
/// O documento completo é um objeto JSON mapeando nome-do-plano para
/// `PlanSpec`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanSpec {
    /// Se verdadeiro, falha das critical actions é engolida e o plano
    /// é reportado como sucesso.
    #[serde(default)]
    pub allow_fail: Truthy,

    /// Pontos de entrada do plano, em ordem de execução.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub critical_actions: Vec<String>,

    /// Mapa nome → action.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub actions: HashMap<String, ActionSpec>,
}

/// Documento de configuração completo: nome-do-plano → plano.
pub type ConfigDoc = HashMap<String, PlanSpec>;

// ============================================================================
// GRAFO INTERNO: ACTION
// ============================================================================

/// Uma action completamente ligada, pronta para execução.
///
/// Difere de `ActionSpec` em dois pontos: `exec_name` está resolvido
/// (nunca vazio) e `exec_timeout` está materializado. O loader garante
/// que todo nome em `conditions`/`dependencies`/`recovery_actions`
/// existe no mapa de actions do plano.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    /// Nome único dentro do plano.
    pub name: String,

    /// Chave no registro de execs.
    pub exec_name: String,

    /// Argumentos extras passados ao exec.
    pub exec_extra_args: Vec<String>,

    /// Tempo máximo de execução do exec.
    pub exec_timeout: Duration,

    /// Condições de elegibilidade (rodam com recuperação desligada).
    pub conditions: Vec<String>,

    /// Pré-requisitos do exec.
    pub dependencies: Vec<String>,

    /// Cadeia de recuperação, em ordem.
    pub recovery_actions: Vec<String>,

    /// Engole a falha final desta action.
    pub allow_fail_after_recovery: bool,

    /// Política de cache.
    pub run_control: RunControl,
}

impl Action {
    /// Cria a action padrão para um nome apenas referenciado:
    /// exec = próprio nome, listas vazias, RUN_ONCE.
    pub fn default_for(name: &str) -> Self {
        Self {
            name: name.to_string(),
            exec_name: name.to_string(),
            exec_extra_args: Vec::new(),
            exec_timeout: DEFAULT_EXEC_TIMEOUT,
            conditions: Vec::new(),
            dependencies: Vec::new(),
            recovery_actions: Vec::new(),
            allow_fail_after_recovery: false,
            run_control: RunControl::RunOnce,
        }
    }

    /// Converte de volta para a forma do documento.
    ///
    /// A conversão preserva nomes, ordem das listas e flags; campos no
    /// valor padrão são omitidos na serialização.
    pub fn to_spec(&self) -> ActionSpec {
        ActionSpec {
            exec_name: if self.exec_name == self.name {
                None
            } else {
                Some(self.exec_name.clone())
            },
            exec_extra_args: self.exec_extra_args.clone(),
            exec_timeout: if self.exec_timeout == DEFAULT_EXEC_TIMEOUT {
                None
            } else {
                Some(DurationSpec(self.exec_timeout))
            },
            conditions: self.conditions.clone(),
            dependencies: self.dependencies.clone(),
            recovery_actions: self.recovery_actions.clone(),
            allow_fail_after_recovery: Truthy(self.allow_fail_after_recovery),
            run_control: self.run_control,
        }
    }
}

// ============================================================================
// GRAFO INTERNO: PLAN
// ============================================================================

/// Um plano completamente ligado.
///
/// Imutável durante a execução: o único estado mutável de uma execução
/// vive nos caches do motor.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    /// Nome do plano no documento.
    pub name: String,

    /// Pontos de entrada, em ordem.
    pub critical_actions: Vec<String>,

    /// Mapa nome → action. Toda referência resolve aqui.
    pub actions: HashMap<String, Action>,

    /// Engole a falha das critical actions.
    pub allow_fail: bool,
}

impl Plan {
    /// Busca uma action pelo nome.
    pub fn action(&self, name: &str) -> Option<&Action> {
        self.actions.get(name)
    }

    /// Converte de volta para a forma do documento.
    pub fn to_spec(&self) -> PlanSpec {
        let actions = self
            .actions
            .iter()
            .map(|(name, action)| (name.clone(), action.to_spec()))
            .collect();
        PlanSpec {
            allow_fail: Truthy(self.allow_fail),
            critical_actions: self.critical_actions.clone(),
            actions,
        }
    }
}

// ============================================================================
// RELATÓRIO DE EXECUÇÃO
// ============================================================================

/// Desfecho de um plano dentro de uma execução da CLI.
#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    /// Critical actions passaram (ou allow_fail engoliu a falha).
    Passed,
    /// O plano falhou.
    Failed,
}

/// Resultado de um plano individual no relatório final.
///
/// Contadores de reinício e de falhas perdoadas saem pelo sink de
/// métricas, como observações do evento de plano.
#[derive(Debug, Serialize)]
pub struct PlanOutcome {
    /// Nome do plano.
    pub plan: String,

    /// Desfecho.
    pub status: PlanStatus,

    /// Causa da falha, quando status = failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Duração da execução do plano em milissegundos.
    pub duration_ms: u64,
}

/// Relatório final de uma invocação da CLI.
#[derive(Debug, Serialize)]
pub struct RunReport {
    /// UUID desta execução.
    pub execution_id: String,

    /// Recurso alvo (nome do DUT).
    pub resource: String,

    /// Status geral: "passed" se todos os planos passaram.
    pub status: String,

    /// Início em ISO8601.
    pub start_time: String,

    /// Fim em ISO8601.
    pub end_time: String,

    /// Desfecho de cada plano, na ordem de execução.
    pub plans: Vec<PlanOutcome>,
}

// ============================================================================
// TESTES
// ============================================================================
