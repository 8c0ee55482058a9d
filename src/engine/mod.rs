//! # Módulo do Motor de Planos
//!
//! Este é o coração do runner: o executor recursivo que percorre um
//! plano de recuperação contra um dispositivo de laboratório.
//!
//! ## O algoritmo, de cima para baixo:
//!
//! ```text
//! run_plan
//!   └─ laço de reinício (start-over)
//!        └─ critical actions, em ordem
//!             └─ run_action (recursivo)
//!                  1. cache de resultados?  → responde sem executar
//!                  2. condições             → falha pula a action
//!                  3. dependências          → falha derruba a action
//!                  4. exec (task destacada sob timeout)
//!                  5. recuperações          → sucesso pede reinício
//! ```
//!
//! ## O protocolo de reinício (start-over)
//!
//! Quando uma recuperação passa, o estado do device mudou: o plano
//! inteiro merece uma nova chance. A recuperação devolve então um
//! *marcador* de reinício dentro do valor de erro, que sobe intacto
//! até o laço do plano. Só o laço consome o marcador; nenhum exec o
//! enxerga. A cada reinício o cache de resultados despeja as entradas
//! `RERUN_AFTER_RECOVERY` e mantém as `RUN_ONCE`.
//!
//! ## O que garante que isso termina?
//!
//! Cada reinício consome um par `(action, recuperação)` ainda não
//! usado, e o cache de uso nunca é despejado. O número de pares é
//! finito, então o número de reinícios também é. Os limites em
//! [`crate::limits`] são um segundo cinto de segurança.

pub mod cache;

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::access::{Access, Dut};
use crate::errors::ErrorCode;
use crate::execs::{ExecRegistry, ExecRunArgs};
use crate::limits::ExecutionLimits;
use crate::metrics::{ActionRecord, MetricSink, Observation, RecordKind, RecordStatus};
use crate::protocol::{Action, Plan};

use cache::{ActionResultCache, RecoveryUsageCache};

// ============================================================================
// ERROS DO MOTOR
// ============================================================================

/// Erros produzidos pela travessia de um plano.
///
/// `StartOver` não é um erro de verdade: é o marcador interno do
/// protocolo de reinício, consumido exclusivamente pelo laço do plano.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Marcador de reinício emitido por uma recuperação bem sucedida.
    #[error("reinício solicitado pela recuperação '{recovery}'")]
    StartOver { recovery: String },

    /// O exec da action retornou falha.
    #[error("action '{action}': exec '{exec}' falhou: {reason}")]
    Exec {
        action: String,
        exec: String,
        reason: String,
    },

    /// O exec não terminou dentro do prazo.
    #[error("action '{action}': exec '{exec}' excedeu o timeout de {timeout:?}")]
    Timeout {
        action: String,
        exec: String,
        timeout: Duration,
    },

    /// Nenhum exec registrado com o nome pedido.
    #[error("action '{action}': exec '{exec}' não está registrado")]
    Registry { action: String, exec: String },

    /// A falha veio do cache de resultados.
    #[error("action '{action}': falha memorizada: {message}")]
    Cached { action: String, message: String },

    /// O escopo da execução foi cancelado.
    #[error("execução cancelada no plano '{plan}', action '{action}'")]
    Cancelled { plan: String, action: String },

    /// Teto de reinícios do plano atingido.
    #[error("plano '{plan}': limite de {limit} reinício(s) atingido")]
    RestartLimit { plan: String, limit: u32 },

    /// Teto de profundidade da travessia atingido.
    #[error("action '{action}': limite de profundidade {limit} atingido")]
    DepthLimit { action: String, limit: u32 },

    /// A task do exec morreu em vez de retornar.
    #[error("action '{action}': task do exec morreu: {reason}")]
    ExecPanic { action: String, reason: String },

    /// Violação de invariante interna do motor.
    #[error("erro interno do motor: {0}")]
    Internal(String),

    /// Anotação final com o nome do plano que falhou.
    #[error("plano '{plan}' falhou: {source}")]
    Plan {
        plan: String,
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    /// Verdadeiro apenas para o marcador de reinício.
    pub fn is_start_over(&self) -> bool {
        matches!(self, Self::StartOver { .. })
    }

    fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Código estruturado correspondente (catálogo E3xxx/E5xxx).
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::StartOver { .. } => ErrorCode::INTERNAL_ERROR,
            Self::Exec { .. } => ErrorCode::EXEC_FAILED,
            Self::Timeout { .. } => ErrorCode::EXEC_TIMEOUT,
            Self::Registry { .. } => ErrorCode::REGISTRY_MISS,
            Self::Cached { .. } => ErrorCode::CACHED_FAILURE,
            Self::Cancelled { .. } => ErrorCode::CANCELLED,
            Self::RestartLimit { .. } => ErrorCode::RESTART_LIMIT,
            Self::DepthLimit { .. } => ErrorCode::DEPTH_LIMIT,
            Self::ExecPanic { .. } => ErrorCode::EXEC_PANIC,
            Self::Internal(_) => ErrorCode::INTERNAL_ERROR,
            Self::Plan { source, .. } => source.code(),
        }
    }
}

// ============================================================================
// ARGUMENTOS DE EXECUÇÃO
// ============================================================================

/// Tudo que uma execução de plano precisa além do próprio plano.
pub struct RunArgs {
    /// Fachada de acesso ao device.
    pub access: Arc<dyn Access>,

    /// Registro de execs. Sempre injetado; o padrão do processo está
    /// em [`crate::execs::global_registry`].
    pub registry: Arc<ExecRegistry>,

    /// Destino dos eventos de métrica.
    pub sink: Arc<dyn MetricSink>,

    /// Recurso alvo (nome do DUT).
    pub resource: String,

    /// Liga as cadeias de recuperação das critical actions.
    pub enable_recovery: bool,

    /// Loga cada passo no nível info (senão debug).
    pub show_steps: bool,

    /// Guarda-corpos da execução.
    pub limits: ExecutionLimits,

    /// Cancelamento cooperativo do chamador.
    pub cancel: CancellationToken,
}

impl RunArgs {
    pub fn new(
        access: Arc<dyn Access>,
        registry: Arc<ExecRegistry>,
        sink: Arc<dyn MetricSink>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            access,
            registry,
            sink,
            resource: resource.into(),
            enable_recovery: true,
            show_steps: false,
            limits: ExecutionLimits::default(),
            cancel: CancellationToken::new(),
        }
    }
}

// ============================================================================
// ENTRADA PÚBLICA
// ============================================================================

/// Executa um plano contra um recurso.
///
/// Retorna `Ok(())` quando todas as critical actions passam (ou quando
/// `allow_fail` do plano engole a falha); senão retorna o erro anotado
/// com o nome do plano e a cadeia de causa.
pub async fn run_plan(plan: &Plan, args: RunArgs) -> Result<(), EngineError> {
    let mut engine = Engine::new(plan, args);
    engine.run().await
}

// ============================================================================
// O MOTOR
// ============================================================================

/// Estado de uma execução de plano. Uma instância por execução; os
/// caches nunca são compartilhados.
struct Engine<'p> {
    plan: &'p Plan,
    args: RunArgs,

    /// Snapshot de inventário tirado no começo da execução.
    dut: Option<Dut>,

    results: ActionResultCache,
    recoveries: RecoveryUsageCache,

    restarts: u32,
    forgiven: u32,
    started: Instant,
}

impl<'p> Engine<'p> {
    fn new(plan: &'p Plan, args: RunArgs) -> Self {
        Self {
            plan,
            args,
            dut: None,
            results: ActionResultCache::new(),
            recoveries: RecoveryUsageCache::new(),
            restarts: 0,
            forgiven: 0,
            started: Instant::now(),
        }
    }

    // ------------------------------------------------------------------------
    // Escopo do plano
    // ------------------------------------------------------------------------

    async fn run(&mut self) -> Result<(), EngineError> {
        info!(
            plan = %self.plan.name,
            resource = %self.args.resource,
            recovery = self.args.enable_recovery,
            "iniciando plano"
        );
        let mut record = ActionRecord::start(
            RecordKind::Plan,
            self.plan.name.clone(),
            self.args.resource.clone(),
        );

        // Inventário é melhor-esforço: um DUT sem registro ainda pode
        // ser recuperado.
        self.dut = match self.args.access.get_dut(&self.args.resource).await {
            Ok(dut) => Some(dut),
            Err(err) => {
                debug!(resource = %self.args.resource, error = %err, "sem registro de inventário");
                None
            }
        };

        let result = self.run_with_restarts().await;

        record.observe(Observation::count("restarts", self.restarts));
        record.observe(Observation::count("forgiven_failures", self.forgiven));
        match &result {
            Ok(()) => record.finish(RecordStatus::Success, None),
            Err(err) => record.finish(RecordStatus::Fail, Some(err.to_string())),
        }
        self.publish(&record).await;

        match &result {
            Ok(()) => info!(plan = %self.plan.name, restarts = self.restarts, "plano concluído"),
            Err(err) => warn!(plan = %self.plan.name, error = %err, "plano falhou"),
        }
        result
    }

    /// O laço de reinício descrito no topo do módulo.
    async fn run_with_restarts(&mut self) -> Result<(), EngineError> {
        loop {
            match self.run_critical_actions().await {
                Err(err) if err.is_start_over() => {
                    self.restarts += 1;
                    if self.restarts > self.args.limits.max_restarts {
                        return Err(EngineError::RestartLimit {
                            plan: self.plan.name.clone(),
                            limit: self.args.limits.max_restarts,
                        });
                    }
                    info!(
                        plan = %self.plan.name,
                        restarts = self.restarts,
                        "recuperação bem sucedida, reiniciando critical actions"
                    );
                    self.results.reset_for_start_over();
                }
                Err(err) => {
                    if self.plan.allow_fail && !err.is_cancellation() {
                        self.forgiven += 1;
                        warn!(
                            plan = %self.plan.name,
                            error = %err,
                            "falha perdoada por allow_fail do plano"
                        );
                        return Ok(());
                    }
                    return Err(EngineError::Plan {
                        plan: self.plan.name.clone(),
                        source: Box::new(err),
                    });
                }
                Ok(()) => return Ok(()),
            }
        }
    }

    async fn run_critical_actions(&mut self) -> Result<(), EngineError> {
        let criticals = self.plan.critical_actions.clone();
        let recovery_enabled = self.args.enable_recovery;
        for name in criticals {
            self.run_action(name, recovery_enabled, 0).await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Escopo de action
    // ------------------------------------------------------------------------

    /// Executa uma action: cache, condições, dependências, exec,
    /// recuperações, nessa ordem fixa.
    ///
    /// A recursão é empacotada em `BoxFuture` porque actions chamam
    /// actions.
    fn run_action(
        &mut self,
        name: String,
        recovery_enabled: bool,
        depth: u32,
    ) -> BoxFuture<'_, Result<(), EngineError>> {
        Box::pin(async move {
            if self.args.cancel.is_cancelled() {
                return Err(EngineError::Cancelled {
                    plan: self.plan.name.clone(),
                    action: name,
                });
            }
            if depth >= self.args.limits.max_depth {
                return Err(EngineError::DepthLimit {
                    action: name,
                    limit: self.args.limits.max_depth,
                });
            }

            // O loader garante que todo nome referenciado resolve.
            let action = match self.plan.action(&name) {
                Some(action) => action.clone(),
                None => {
                    return Err(EngineError::Internal(format!(
                        "action '{}' ausente do plano '{}'",
                        name, self.plan.name
                    )))
                }
            };

            // 1. Cache de resultados.
            if let Some(cached) = self.results.get(&name).cloned() {
                return match cached {
                    None => {
                        debug!(action = %name, "sucesso memorizado");
                        Ok(())
                    }
                    Some(message) => {
                        if action.allow_fail_after_recovery {
                            self.forgive(&name, "falha memorizada");
                            Ok(())
                        } else {
                            Err(EngineError::Cached {
                                action: name,
                                message,
                            })
                        }
                    }
                };
            }

            self.step(&name, "iniciando action");
            let mut record = ActionRecord::start(
                RecordKind::Action,
                name.clone(),
                self.args.resource.clone(),
            );

            // 2. Condições: falha pula a action, nunca a derruba.
            for condition in action.conditions.clone() {
                match self.run_action(condition.clone(), false, depth + 1).await {
                    Ok(()) => {}
                    Err(err) if err.is_cancellation() => {
                        record.finish(RecordStatus::Fail, Some(err.to_string()));
                        self.publish(&record).await;
                        return Err(err);
                    }
                    Err(err) => {
                        info!(
                            action = %name,
                            condition = %condition,
                            reason = %err,
                            "condição falhou, action pulada"
                        );
                        record.finish(RecordStatus::Skip, None);
                        self.publish(&record).await;
                        return Ok(());
                    }
                }
            }

            // 3. Dependências: falha derruba a action, salvo allow_fail.
            for dependency in action.dependencies.clone() {
                if let Err(err) = self
                    .run_action(dependency.clone(), recovery_enabled, depth + 1)
                    .await
                {
                    if err.is_start_over() || err.is_cancellation() {
                        record.finish(RecordStatus::Fail, Some(err.to_string()));
                        self.publish(&record).await;
                        return Err(err);
                    }
                    if action.allow_fail_after_recovery {
                        self.forgive(&name, "dependência falhou");
                        record.finish(RecordStatus::Fail, Some(err.to_string()));
                        self.publish(&record).await;
                        return Ok(());
                    }
                    record.finish(RecordStatus::Fail, Some(err.to_string()));
                    self.publish(&record).await;
                    return Err(err);
                }
            }

            // 4. Exec.
            match self.run_exec(&action).await {
                Ok(()) => {
                    self.results.put(&name, action.run_control, None);
                    record.finish(RecordStatus::Success, None);
                    self.publish(&record).await;
                    Ok(())
                }
                Err(err) if err.is_cancellation() => {
                    record.finish(RecordStatus::Fail, Some(err.to_string()));
                    self.publish(&record).await;
                    Err(err)
                }
                Err(err) => {
                    let failure = err.to_string();

                    // 5. Recuperações. A escrita no cache fica para
                    // depois: um reinício não pode ser derrotado por
                    // uma falha recém-memorizada.
                    if recovery_enabled && !action.recovery_actions.is_empty() {
                        if let Err(rerr) = self.run_recoveries(&action, depth).await {
                            record.finish(RecordStatus::Fail, Some(failure));
                            self.publish(&record).await;
                            return Err(rerr);
                        }
                    }

                    self.results
                        .put(&name, action.run_control, Some(failure.clone()));
                    record.finish(RecordStatus::Fail, Some(failure));
                    self.publish(&record).await;

                    if action.allow_fail_after_recovery {
                        self.forgive(&name, "exec falhou");
                        Ok(())
                    } else {
                        Err(err)
                    }
                }
            }
        })
    }

    // ------------------------------------------------------------------------
    // Exec
    // ------------------------------------------------------------------------

    /// Despacha o exec em uma task destacada sob timeout.
    ///
    /// No estouro do prazo a task não é mais aguardada: o token filho é
    /// cancelado para que execs cooperativos parem, e o motor segue em
    /// frente com um erro de timeout.
    async fn run_exec(&mut self, action: &Action) -> Result<(), EngineError> {
        let exec = self.args.registry.get(&action.exec_name).ok_or_else(|| {
            EngineError::Registry {
                action: action.name.clone(),
                exec: action.exec_name.clone(),
            }
        })?;

        // Prazo efetivo: o menor entre o timeout da action e o que
        // resta do orçamento do plano.
        let mut deadline = action.exec_timeout;
        if let Some(budget) = self.args.limits.plan_deadline {
            let remaining = budget.saturating_sub(self.started.elapsed());
            if remaining.is_zero() {
                return Err(EngineError::Timeout {
                    action: action.name.clone(),
                    exec: action.exec_name.clone(),
                    timeout: Duration::ZERO,
                });
            }
            deadline = deadline.min(remaining);
        }

        let child_cancel = self.args.cancel.child_token();
        let run_args = ExecRunArgs {
            access: self.args.access.clone(),
            resource: self.args.resource.clone(),
            dut: self.dut.clone(),
            extra_args: action.exec_extra_args.clone(),
            timeout: deadline,
            cancel: child_cancel.clone(),
        };

        self.step(&action.name, "despachando exec");
        let handle = tokio::spawn(async move { exec.run(&run_args).await });

        let outcome = tokio::select! {
            _ = self.args.cancel.cancelled() => {
                child_cancel.cancel();
                return Err(EngineError::Cancelled {
                    plan: self.plan.name.clone(),
                    action: action.name.clone(),
                });
            }
            outcome = tokio::time::timeout(deadline, handle) => outcome,
        };

        match outcome {
            // Prazo estourado: a task fica para trás, destacada.
            Err(_elapsed) => {
                child_cancel.cancel();
                Err(EngineError::Timeout {
                    action: action.name.clone(),
                    exec: action.exec_name.clone(),
                    timeout: deadline,
                })
            }
            Ok(Err(join_err)) => Err(EngineError::ExecPanic {
                action: action.name.clone(),
                reason: join_err.to_string(),
            }),
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(exec_err))) => Err(EngineError::Exec {
                action: action.name.clone(),
                exec: action.exec_name.clone(),
                reason: exec_err.to_string(),
            }),
        }
    }

    // ------------------------------------------------------------------------
    // Recuperações
    // ------------------------------------------------------------------------

    /// Tenta as recuperações da action em ordem. A primeira que passar
    /// devolve o marcador de reinício; recuperações já usadas nesta
    /// execução (em qualquer um dos caches) são puladas.
    async fn run_recoveries(&mut self, action: &Action, depth: u32) -> Result<(), EngineError> {
        for recovery in action.recovery_actions.clone() {
            if self
                .recoveries
                .is_used(&action.name, &recovery, &self.results)
            {
                debug!(
                    action = %action.name,
                    recovery = %recovery,
                    "recuperação já usada nesta execução, pulando"
                );
                continue;
            }

            // Recuperações rodam com recuperação desligada: a cadeia
            // não se aninha.
            match self.run_action(recovery.clone(), false, depth + 1).await {
                Err(err) if err.is_cancellation() => return Err(err),
                Err(err) => {
                    debug!(
                        action = %action.name,
                        recovery = %recovery,
                        error = %err,
                        "recuperação falhou"
                    );
                    self.recoveries
                        .register(&action.name, &recovery, Some(err.to_string()));
                }
                Ok(()) => {
                    self.recoveries.register(&action.name, &recovery, None);
                    info!(
                        action = %action.name,
                        recovery = %recovery,
                        "recuperação bem sucedida, solicitando reinício"
                    );
                    return Err(EngineError::StartOver { recovery });
                }
            }
        }
        // Todas esgotadas ou falharam: a falha original prevalece.
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Apoio
    // ------------------------------------------------------------------------

    fn forgive(&mut self, action: &str, context: &str) {
        self.forgiven += 1;
        warn!(
            action = %action,
            context = %context,
            "falha engolida por allow_fail_after_recovery"
        );
    }

    fn step(&self, action: &str, message: &'static str) {
        if self.args.show_steps {
            info!(action = %action, "{}", message);
        } else {
            debug!(action = %action, "{}", message);
        }
    }

    async fn publish(&self, record: &ActionRecord) {
        if let Err(err) = self.args.sink.publish(record).await {
            warn!(name = %record.name, error = %err, "falha ao publicar métrica");
        }
    }
}

// ============================================================================
// TESTES
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::stub::StubAccess;
    use crate::execs::{Exec, ExecError};
    use crate::loader;
    use crate::metrics::CollectingSink;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Exec de teste: registra cada invocação em um diário
    /// compartilhado e sempre passa (ou sempre falha).
    struct ScriptedExec {
        name: &'static str,
        journal: Arc<Mutex<Vec<String>>>,
        calls: AtomicU32,
        pass: bool,
    }

    impl ScriptedExec {
        fn passing(name: &'static str, journal: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Self {
                name,
                journal,
                calls: AtomicU32::new(0),
                pass: true,
            })
        }

        fn failing(name: &'static str, journal: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Self {
                name,
                journal,
                calls: AtomicU32::new(0),
                pass: false,
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Exec for ScriptedExec {
        async fn run(&self, _args: &ExecRunArgs) -> Result<(), ExecError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.journal.lock().unwrap().push(self.name.to_string());
            if self.pass {
                Ok(())
            } else {
                Err(ExecError::failure(format!("{} quebrou", self.name)))
            }
        }
    }

    /// Exec que dorme até ser cancelado ou o tempo passar.
    struct SleepExec {
        duration: Duration,
    }

    #[async_trait]
    impl Exec for SleepExec {
        async fn run(&self, args: &ExecRunArgs) -> Result<(), ExecError> {
            tokio::select! {
                _ = args.cancel.cancelled() => Err(ExecError::abort("cancelado")),
                _ = tokio::time::sleep(self.duration) => Ok(()),
            }
        }
    }

    struct Fixture {
        journal: Arc<Mutex<Vec<String>>>,
        registry: ExecRegistry,
        sink: Arc<CollectingSink>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                journal: Arc::new(Mutex::new(Vec::new())),
                registry: ExecRegistry::new(),
                sink: Arc::new(CollectingSink::new()),
            }
        }

        fn passing(&mut self, name: &'static str) -> Arc<ScriptedExec> {
            let exec = ScriptedExec::passing(name, self.journal.clone());
            self.registry.register(name, exec.clone());
            exec
        }

        fn failing(&mut self, name: &'static str) -> Arc<ScriptedExec> {
            let exec = ScriptedExec::failing(name, self.journal.clone());
            self.registry.register(name, exec.clone());
            exec
        }

        fn args(&self) -> RunArgs {
            RunArgs::new(
                Arc::new(StubAccess::ok()),
                Arc::new(self.registry.clone()),
                self.sink.clone(),
                "dut-1",
            )
        }

        fn journal(&self) -> Vec<String> {
            self.journal.lock().unwrap().clone()
        }

        fn plan_record(&self) -> ActionRecord {
            self.sink
                .records()
                .into_iter()
                .find(|r| r.kind == RecordKind::Plan)
                .expect("plan record")
        }

        fn observation(&self, key: &str) -> String {
            self.plan_record()
                .observations
                .iter()
                .find(|o| o.key == key)
                .map(|o| o.value.clone())
                .expect("observation")
        }
    }

    fn plan(value: serde_json::Value) -> Plan {
        let doc = serde_json::from_value(json!({ "p": value })).unwrap();
        loader::load_plan(&doc, "p").unwrap()
    }

    #[tokio::test]
    async fn test_trivial_pass() {
        let mut fx = Fixture::new();
        let exec = fx.passing("a");
        let plan = plan(json!({ "critical_actions": ["a"] }));

        run_plan(&plan, fx.args()).await.unwrap();

        assert_eq!(exec.calls(), 1);
        assert_eq!(fx.observation("restarts"), "0");
        assert_eq!(fx.observation("forgiven_failures"), "0");

        let records = fx.sink.records();
        let action_records: Vec<_> = records
            .iter()
            .filter(|r| r.kind == RecordKind::Action)
            .collect();
        assert_eq!(action_records.len(), 1);
        assert_eq!(action_records[0].name, "a");
        assert_eq!(action_records[0].status, RecordStatus::Success);
        assert_eq!(fx.plan_record().status, RecordStatus::Success);
    }

    #[tokio::test]
    async fn test_dependency_chain_runs_leaves_first() {
        let mut fx = Fixture::new();
        let a = fx.passing("a");
        let b = fx.passing("b");
        let c = fx.passing("c");
        let plan = plan(json!({
            "critical_actions": ["a"],
            "actions": {
                "a": { "dependencies": ["b"] },
                "b": { "dependencies": ["c"] }
            }
        }));

        run_plan(&plan, fx.args()).await.unwrap();

        assert_eq!(fx.journal(), vec!["c", "b", "a"]);
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 1);
        assert_eq!(c.calls(), 1);
    }

    #[tokio::test]
    async fn test_recovery_success_restarts_then_exhausts() {
        let mut fx = Fixture::new();
        let a = fx.failing("a");
        let r = fx.passing("r");
        let plan = plan(json!({
            "critical_actions": ["a"],
            "actions": {
                "a": { "recovery_actions": ["r"] }
            }
        }));

        let err = run_plan(&plan, fx.args()).await.unwrap_err();

        // Primeira passada: a falha, r passa, reinício. Segunda
        // passada: a falha de novo, r já usada, plano cai.
        assert_eq!(a.calls(), 2);
        assert_eq!(r.calls(), 1);
        assert_eq!(fx.observation("restarts"), "1");
        let message = err.to_string();
        assert!(message.contains("plano 'p'"));
        assert!(message.contains("'a'"));
    }

    #[tokio::test]
    async fn test_condition_failure_skips_action() {
        let mut fx = Fixture::new();
        let a = fx.passing("a");
        let c = fx.failing("c");
        let plan = plan(json!({
            "critical_actions": ["a"],
            "actions": {
                "a": { "conditions": ["c"] }
            }
        }));

        run_plan(&plan, fx.args()).await.unwrap();

        assert_eq!(c.calls(), 1);
        assert_eq!(a.calls(), 0); // Exec nunca rodou.
        let records = fx.sink.records();
        let a_record = records.iter().find(|r| r.name == "a").unwrap();
        assert_eq!(a_record.status, RecordStatus::Skip);
    }

    #[tokio::test]
    async fn test_conditions_never_trigger_recoveries() {
        let mut fx = Fixture::new();
        fx.passing("a");
        fx.failing("c");
        let r = fx.passing("r");
        let plan = plan(json!({
            "critical_actions": ["a"],
            "actions": {
                "a": { "conditions": ["c"] },
                "c": { "recovery_actions": ["r"] }
            }
        }));

        run_plan(&plan, fx.args()).await.unwrap();

        // Condições rodam com recuperação desligada.
        assert_eq!(r.calls(), 0);
        assert_eq!(fx.observation("restarts"), "0");
    }

    #[tokio::test]
    async fn test_allow_fail_after_recovery_swallows_and_counts() {
        let mut fx = Fixture::new();
        let a = fx.failing("a");
        let plan = plan(json!({
            "critical_actions": ["a"],
            "actions": {
                "a": { "allow_fail_after_recovery": true }
            }
        }));

        run_plan(&plan, fx.args()).await.unwrap();

        assert_eq!(a.calls(), 1);
        assert_eq!(fx.observation("forgiven_failures"), "1");
        let records = fx.sink.records();
        let a_record = records.iter().find(|r| r.name == "a").unwrap();
        assert_eq!(a_record.status, RecordStatus::Fail);
        assert_eq!(fx.plan_record().status, RecordStatus::Success);
    }

    #[tokio::test]
    async fn test_exec_timeout_bounds_the_action() {
        let mut fx = Fixture::new();
        fx.registry.register(
            "slow",
            Arc::new(SleepExec {
                duration: Duration::from_secs(5),
            }),
        );
        let plan = plan(json!({
            "critical_actions": ["slow"],
            "actions": {
                "slow": { "exec_timeout": "100ms" }
            }
        }));

        let started = Instant::now();
        let err = run_plan(&plan, fx.args()).await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(elapsed < Duration::from_secs(2), "demorou {:?}", elapsed);
        assert!(err.to_string().contains("excedeu o timeout"));
        assert_eq!(err.code(), ErrorCode::EXEC_TIMEOUT);
    }

    #[tokio::test]
    async fn test_timeout_is_recoverable_like_any_exec_failure() {
        let mut fx = Fixture::new();
        fx.registry.register(
            "slow",
            Arc::new(SleepExec {
                duration: Duration::from_secs(5),
            }),
        );
        let r = fx.passing("r");
        let plan = plan(json!({
            "critical_actions": ["slow"],
            "actions": {
                "slow": { "exec_timeout": "50ms", "recovery_actions": ["r"] }
            }
        }));

        let _ = run_plan(&plan, fx.args()).await;

        assert_eq!(r.calls(), 1);
    }

    #[tokio::test]
    async fn test_run_once_action_executes_once() {
        let mut fx = Fixture::new();
        let a = fx.passing("a");
        let c = fx.passing("c");
        let b = fx.passing("b");
        // c é dependência compartilhada de a e b.
        let plan = plan(json!({
            "critical_actions": ["a", "b"],
            "actions": {
                "a": { "dependencies": ["c"] },
                "b": { "dependencies": ["c"] }
            }
        }));

        run_plan(&plan, fx.args()).await.unwrap();

        assert_eq!(c.calls(), 1);
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 1);
    }

    #[tokio::test]
    async fn test_always_run_action_repeats() {
        let mut fx = Fixture::new();
        fx.passing("a");
        fx.passing("b");
        let c = fx.passing("c");
        let plan = plan(json!({
            "critical_actions": ["a", "b"],
            "actions": {
                "a": { "dependencies": ["c"] },
                "b": { "dependencies": ["c"] },
                "c": { "run_control": "ALWAYS_RUN" }
            }
        }));

        run_plan(&plan, fx.args()).await.unwrap();

        assert_eq!(c.calls(), 2);
    }

    #[tokio::test]
    async fn test_restart_evicts_rerun_after_recovery_only() {
        let mut fx = Fixture::new();
        let keep = fx.passing("keep");
        let rerun = fx.passing("rerun");
        let a = fx.failing("a");
        let r = fx.passing("r");
        let plan = plan(json!({
            "critical_actions": ["keep", "rerun", "a"],
            "actions": {
                "rerun": { "run_control": "RERUN_AFTER_RECOVERY" },
                "a": { "recovery_actions": ["r"] }
            }
        }));

        let _ = run_plan(&plan, fx.args()).await;

        // Um reinício aconteceu: keep (RUN_ONCE) fica no cache, rerun
        // é despejada e roda de novo.
        assert_eq!(fx.observation("restarts"), "1");
        assert_eq!(keep.calls(), 1);
        assert_eq!(rerun.calls(), 2);
        assert_eq!(a.calls(), 2);
        assert_eq!(r.calls(), 1);
    }

    #[tokio::test]
    async fn test_recovery_already_run_as_action_is_skipped() {
        let mut fx = Fixture::new();
        let r = fx.passing("r");
        let a = fx.failing("a");
        // r roda primeiro como action comum; depois a falha e r, por
        // já estar no cache de resultados, não conta como recuperação.
        let plan = plan(json!({
            "critical_actions": ["r", "a"],
            "actions": {
                "a": { "recovery_actions": ["r"] }
            }
        }));

        let err = run_plan(&plan, fx.args()).await.unwrap_err();

        assert_eq!(r.calls(), 1);
        assert_eq!(a.calls(), 1);
        assert_eq!(fx.observation("restarts"), "0");
        assert!(err.to_string().contains("'a'"));
    }

    #[tokio::test]
    async fn test_recoveries_run_in_declared_order() {
        let mut fx = Fixture::new();
        let a = fx.failing("a");
        let r1 = fx.failing("r1");
        let r2 = fx.passing("r2");
        let plan = plan(json!({
            "critical_actions": ["a"],
            "actions": {
                "a": { "recovery_actions": ["r1", "r2"] }
            }
        }));

        let _ = run_plan(&plan, fx.args()).await;

        // Primeira passada: a, r1 (falha), r2 (passa) -> reinício.
        assert_eq!(fx.journal()[..3], ["a", "r1", "r2"]);
        assert_eq!(r1.calls(), 1);
        assert_eq!(r2.calls(), 1);
        assert!(a.calls() >= 2);
    }

    #[tokio::test]
    async fn test_plan_allow_fail_forgives() {
        let mut fx = Fixture::new();
        fx.failing("a");
        let plan = plan(json!({
            "allow_fail": true,
            "critical_actions": ["a"]
        }));

        run_plan(&plan, fx.args()).await.unwrap();

        assert_eq!(fx.observation("forgiven_failures"), "1");
        assert_eq!(fx.plan_record().status, RecordStatus::Success);
    }

    #[tokio::test]
    async fn test_registry_miss_is_recoverable() {
        let mut fx = Fixture::new();
        let r = fx.passing("r");
        // "ghost" não está registrado.
        let plan = plan(json!({
            "critical_actions": ["ghost"],
            "actions": {
                "ghost": { "recovery_actions": ["r"] }
            }
        }));

        let err = run_plan(&plan, fx.args()).await.unwrap_err();

        // A falta de registro conta como falha de exec: a recuperação
        // roda, reinicia, e na segunda passada o plano cai de vez.
        assert_eq!(r.calls(), 1);
        assert_eq!(fx.observation("restarts"), "1");
        assert_eq!(err.code(), ErrorCode::REGISTRY_MISS);
    }

    #[tokio::test]
    async fn test_recovery_disabled_goes_straight_to_failure() {
        let mut fx = Fixture::new();
        let a = fx.failing("a");
        let r = fx.passing("r");
        let plan = plan(json!({
            "critical_actions": ["a"],
            "actions": {
                "a": { "recovery_actions": ["r"] }
            }
        }));

        let mut args = fx.args();
        args.enable_recovery = false;
        let err = run_plan(&plan, args).await.unwrap_err();

        assert_eq!(a.calls(), 1);
        assert_eq!(r.calls(), 0);
        assert_eq!(err.code(), ErrorCode::EXEC_FAILED);
    }

    #[tokio::test]
    async fn test_cached_failure_carries_provenance() {
        let mut fx = Fixture::new();
        let f = fx.failing("f");
        fx.passing("c1");
        fx.passing("c2");
        let plan = plan(json!({
            "critical_actions": ["c1", "c2"],
            "actions": {
                "c1": { "dependencies": ["f"], "allow_fail_after_recovery": true },
                "c2": { "dependencies": ["f"] }
            }
        }));

        let err = run_plan(&plan, fx.args()).await.unwrap_err();

        // f roda uma vez; a segunda leitura vem do cache.
        assert_eq!(f.calls(), 1);
        assert_eq!(err.code(), ErrorCode::CACHED_FAILURE);
        assert!(err.to_string().contains("memorizada"));
    }

    #[tokio::test]
    async fn test_cancellation_stops_the_run() {
        let mut fx = Fixture::new();
        let a = fx.passing("a");
        let plan = plan(json!({ "critical_actions": ["a"] }));

        let mut args = fx.args();
        args.cancel.cancel();
        let err = run_plan(&plan, args).await.unwrap_err();

        assert_eq!(a.calls(), 0);
        assert_eq!(err.code(), ErrorCode::CANCELLED);
    }

    #[tokio::test]
    async fn test_cancellation_is_not_forgiven_by_allow_fail() {
        let mut fx = Fixture::new();
        fx.passing("a");
        let plan = plan(json!({
            "allow_fail": true,
            "critical_actions": ["a"]
        }));

        let mut args = fx.args();
        args.cancel.cancel();
        assert!(run_plan(&plan, args).await.is_err());
    }

    #[tokio::test]
    async fn test_dependency_cycle_hits_depth_limit() {
        let mut fx = Fixture::new();
        fx.passing("a");
        fx.passing("b");
        let plan = plan(json!({
            "critical_actions": ["a"],
            "actions": {
                "a": { "dependencies": ["b"] },
                "b": { "dependencies": ["a"] }
            }
        }));

        let mut args = fx.args();
        args.limits.max_depth = 10;
        let err = run_plan(&plan, args).await.unwrap_err();

        assert_eq!(err.code(), ErrorCode::DEPTH_LIMIT);
    }

    #[tokio::test]
    async fn test_restart_limit_guards_the_loop() {
        let mut fx = Fixture::new();
        fx.failing("a");
        fx.passing("r");
        let plan = plan(json!({
            "critical_actions": ["a"],
            "actions": {
                "a": { "recovery_actions": ["r"] }
            }
        }));

        let mut args = fx.args();
        args.limits.max_restarts = 0;
        let err = run_plan(&plan, args).await.unwrap_err();

        assert_eq!(err.code(), ErrorCode::RESTART_LIMIT);
    }

    #[tokio::test]
    async fn test_order_conditions_then_dependencies_then_exec() {
        let mut fx = Fixture::new();
        fx.passing("a");
        fx.passing("cond1");
        fx.passing("cond2");
        fx.passing("dep1");
        let plan = plan(json!({
            "critical_actions": ["a"],
            "actions": {
                "a": {
                    "conditions": ["cond1", "cond2"],
                    "dependencies": ["dep1"]
                }
            }
        }));

        run_plan(&plan, fx.args()).await.unwrap();

        assert_eq!(fx.journal(), vec!["cond1", "cond2", "dep1", "a"]);
    }

    #[tokio::test]
    async fn test_deterministic_plan_has_zero_restarts() {
        let mut fx = Fixture::new();
        for name in ["a", "b", "c", "d"] {
            fx.passing(name);
        }
        let plan = plan(json!({
            "critical_actions": ["a", "b"],
            "actions": {
                "a": { "conditions": ["c"], "dependencies": ["d"] },
                "b": { "dependencies": ["d"] }
            }
        }));

        run_plan(&plan, fx.args()).await.unwrap();
        assert_eq!(fx.observation("restarts"), "0");
        assert_eq!(fx.observation("forgiven_failures"), "0");
    }

    #[tokio::test]
    async fn test_dependency_failure_fails_parent() {
        let mut fx = Fixture::new();
        let a = fx.passing("a");
        fx.failing("d");
        let plan = plan(json!({
            "critical_actions": ["a"],
            "actions": {
                "a": { "dependencies": ["d"] }
            }
        }));

        let err = run_plan(&plan, fx.args()).await.unwrap_err();

        assert_eq!(a.calls(), 0);
        assert!(err.to_string().contains("'d'"));
    }

    #[tokio::test]
    async fn test_dependency_failure_swallowed_by_parent_allow_fail() {
        let mut fx = Fixture::new();
        let a = fx.passing("a");
        fx.failing("d");
        let plan = plan(json!({
            "critical_actions": ["a"],
            "actions": {
                "a": { "dependencies": ["d"], "allow_fail_after_recovery": true }
            }
        }));

        run_plan(&plan, fx.args()).await.unwrap();

        // A dependência derrubou a action antes do exec, mas o plano
        // segue por causa do allow_fail_after_recovery.
        assert_eq!(a.calls(), 0);
        assert_eq!(fx.observation("forgiven_failures"), "1");
    }
}
