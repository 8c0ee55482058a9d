//! # Módulo de Validação de Planos
//!
//! Valida a estrutura de um plano antes da execução, para garantir que
//! o documento está correto e evitar surpresas no meio de um reparo.
//!
//! ## Por que validar?
//!
//! - **Fail-fast**: um plano quebrado falha antes de tocar no device
//! - **Mensagens claras**: cada defeito vira um erro específico
//!
//! ## Validações realizadas:
//!
//! 1. **Auto-referência**: nenhuma action pode listar a si mesma como
//!    condição, dependência ou recuperação
//! 2. **Timeout positivo**: `exec_timeout` precisa ser maior que zero
//! 3. **Nomes não vazios**: nomes de action em branco são rejeitados
//! 4. **Referências resolvidas**: depois da materialização de padrões
//!    pelo loader, toda referência precisa existir no mapa de actions
//!
//! Ciclos entre actions *distintas* são permitidos de propósito: o
//! motor quebra esses ciclos com os caches de resultado em tempo de
//! execução.

use thiserror::Error;

use crate::errors::ErrorCode;
use crate::protocol::Plan;

// ============================================================================
// TIPOS DE ERRO
// ============================================================================

/// Erros estruturais de um plano.
///
/// Cada variante representa um defeito específico do documento.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// O nome pedido não existe no documento de planos.
    #[error("plano '{plan}' não existe no documento")]
    UnknownPlan { plan: String },

    /// Action lista a si mesma em `conditions`, `dependencies` ou
    /// `recovery_actions`. Isso nunca termina e é rejeitado no load.
    #[error("action '{action}' referencia a si mesma em '{field}'")]
    SelfReference { action: String, field: &'static str },

    /// `exec_timeout` zero. Um exec sem orçamento de tempo nunca roda.
    #[error("action '{action}': exec_timeout precisa ser maior que zero")]
    NonPositiveTimeout { action: String },

    /// Nome de action vazio ou só espaços.
    #[error("plano '{plan}': nome de action vazio")]
    EmptyActionName { plan: String },

    /// Referência que continuou sem definição depois da materialização
    /// de actions padrão. Indica bug no loader, não no documento.
    #[error("action '{action}': referência '{referenced}' não resolvida")]
    UnresolvedReference { action: String, referenced: String },
}

impl ValidationError {
    /// Código estruturado correspondente (catálogo E1xxx).
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownPlan { .. } => ErrorCode::UNKNOWN_PLAN,
            Self::SelfReference { .. } => ErrorCode::SELF_REFERENCE,
            Self::NonPositiveTimeout { .. } => ErrorCode::NON_POSITIVE_TIMEOUT,
            Self::EmptyActionName { .. } => ErrorCode::EMPTY_ACTION_NAME,
            Self::UnresolvedReference { .. } => ErrorCode::INVALID_DOCUMENT,
        }
    }
}

// ============================================================================
// VALIDAÇÃO
// ============================================================================

/// Valida um plano completamente ligado.
///
/// Retorna **todos** os defeitos encontrados, não apenas o primeiro,
/// para que o operador conserte o documento em uma passada só.
pub fn validate_plan(plan: &Plan) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    for (name, action) in &plan.actions {
        if name.trim().is_empty() {
            errors.push(ValidationError::EmptyActionName {
                plan: plan.name.clone(),
            });
            continue;
        }

        for (field, list) in [
            ("conditions", &action.conditions),
            ("dependencies", &action.dependencies),
            ("recovery_actions", &action.recovery_actions),
        ] {
            for referenced in list {
                if referenced == name {
                    errors.push(ValidationError::SelfReference {
                        action: name.clone(),
                        field,
                    });
                } else if !plan.actions.contains_key(referenced) {
                    errors.push(ValidationError::UnresolvedReference {
                        action: name.clone(),
                        referenced: referenced.clone(),
                    });
                }
            }
        }

        if action.exec_timeout.is_zero() {
            errors.push(ValidationError::NonPositiveTimeout {
                action: name.clone(),
            });
        }
    }

    // Critical actions também precisam resolver.
    for critical in &plan.critical_actions {
        if !plan.actions.contains_key(critical) {
            errors.push(ValidationError::UnresolvedReference {
                action: plan.name.clone(),
                referenced: critical.clone(),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

// ============================================================================
// TESTES
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Action;
    use std::collections::HashMap;

    fn plan_with(actions: Vec<Action>, critical: Vec<&str>) -> Plan {
        let map: HashMap<String, Action> = actions
            .into_iter()
            .map(|a| (a.name.clone(), a))
            .collect();
        Plan {
            name: "test_plan".to_string(),
            critical_actions: critical.into_iter().map(String::from).collect(),
            actions: map,
            allow_fail: false,
        }
    }

    #[test]
    fn test_valid_plan_passes() {
        let mut a = Action::default_for("a");
        a.dependencies = vec!["b".to_string()];
        let b = Action::default_for("b");
        let plan = plan_with(vec![a, b], vec!["a"]);

        assert!(validate_plan(&plan).is_ok());
    }

    #[test]
    fn test_self_reference_is_rejected() {
        let mut a = Action::default_for("a");
        a.recovery_actions = vec!["a".to_string()];
        let plan = plan_with(vec![a], vec!["a"]);

        let errors = validate_plan(&plan).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0],
            ValidationError::SelfReference {
                action: "a".to_string(),
                field: "recovery_actions",
            }
        );
        assert_eq!(errors[0].code(), ErrorCode::SELF_REFERENCE);
    }

    #[test]
    fn test_self_reference_in_each_field() {
        for field in ["conditions", "dependencies", "recovery_actions"] {
            let mut a = Action::default_for("loop");
            match field {
                "conditions" => a.conditions = vec!["loop".to_string()],
                "dependencies" => a.dependencies = vec!["loop".to_string()],
                _ => a.recovery_actions = vec!["loop".to_string()],
            }
            let plan = plan_with(vec![a], vec!["loop"]);
            let errors = validate_plan(&plan).unwrap_err();
            assert!(
                matches!(errors[0], ValidationError::SelfReference { ref action, field: f }
                    if action == "loop" && f == field),
                "campo {}",
                field
            );
        }
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let mut a = Action::default_for("a");
        a.exec_timeout = std::time::Duration::ZERO;
        let plan = plan_with(vec![a], vec!["a"]);

        let errors = validate_plan(&plan).unwrap_err();
        assert_eq!(errors[0].code(), ErrorCode::NON_POSITIVE_TIMEOUT);
    }

    #[test]
    fn test_unresolved_reference_is_rejected() {
        let mut a = Action::default_for("a");
        a.dependencies = vec!["ghost".to_string()];
        let plan = plan_with(vec![a], vec!["a"]);

        let errors = validate_plan(&plan).unwrap_err();
        assert!(matches!(
            errors[0],
            ValidationError::UnresolvedReference { ref referenced, .. } if referenced == "ghost"
        ));
    }

    #[test]
    fn test_cycle_between_distinct_actions_is_allowed() {
        // A depende de B e B depende de A: estruturalmente permitido.
        let mut a = Action::default_for("a");
        a.dependencies = vec!["b".to_string()];
        let mut b = Action::default_for("b");
        b.dependencies = vec!["a".to_string()];
        let plan = plan_with(vec![a, b], vec!["a"]);

        assert!(validate_plan(&plan).is_ok());
    }

    #[test]
    fn test_all_errors_are_collected() {
        let mut a = Action::default_for("a");
        a.conditions = vec!["a".to_string()];
        a.exec_timeout = std::time::Duration::ZERO;
        let plan = plan_with(vec![a], vec!["a"]);

        let errors = validate_plan(&plan).unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}
