// Module: Loader
// Parses plan documents and links them into executable Plan graphs.
//
// Linking does three things on top of raw deserialization:
//   1. materializes a default action for every name that is referenced
//      (by critical_actions, conditions, dependencies or recoveries)
//      but never declared;
//   2. resolves exec_name fallbacks (unset => the action's own name)
//      and the default exec timeout;
//   3. runs structural validation (self-loops, zero timeouts).

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::protocol::{Action, ActionSpec, ConfigDoc, Plan, PlanSpec, DEFAULT_EXEC_TIMEOUT};
use crate::validation::{validate_plan, ValidationError};

/// Reads and parses a plan document from disk.
pub fn load_document_from_file<P: AsRef<Path>>(path: P) -> Result<ConfigDoc> {
    let content = fs::read_to_string(&path).with_context(|| {
        format!("Failed to read plan document {:?}", path.as_ref())
    })?;
    let doc = serde_json::from_str(&content).context("Failed to parse plan document JSON")?;
    Ok(doc)
}

/// Parses a plan document from a string. Used by tests and embedders.
pub fn load_document_from_str(content: &str) -> Result<ConfigDoc> {
    let doc = serde_json::from_str(content).context("Failed to parse plan document JSON")?;
    Ok(doc)
}

/// All plan names in the document, sorted for deterministic iteration.
pub fn plan_names(doc: &ConfigDoc) -> Vec<String> {
    let mut names: Vec<String> = doc.keys().cloned().collect();
    names.sort();
    names
}

/// Instantiates one plan from the document.
pub fn load_plan(doc: &ConfigDoc, name: &str) -> Result<Plan, Vec<ValidationError>> {
    let spec = doc.get(name).ok_or_else(|| {
        vec![ValidationError::UnknownPlan {
            plan: name.to_string(),
        }]
    })?;
    link_plan(name, spec)
}

/// Instantiates several plans; fails on the first broken one.
pub fn load_plans(doc: &ConfigDoc, names: &[String]) -> Result<Vec<Plan>, Vec<ValidationError>> {
    names.iter().map(|n| load_plan(doc, n)).collect()
}

fn link_action(name: &str, spec: &ActionSpec) -> Action {
    Action {
        name: name.to_string(),
        exec_name: spec
            .exec_name
            .clone()
            .unwrap_or_else(|| name.to_string()),
        exec_extra_args: spec.exec_extra_args.clone(),
        exec_timeout: spec
            .exec_timeout
            .map(|d| d.duration())
            .unwrap_or(DEFAULT_EXEC_TIMEOUT),
        conditions: spec.conditions.clone(),
        dependencies: spec.dependencies.clone(),
        recovery_actions: spec.recovery_actions.clone(),
        allow_fail_after_recovery: spec.allow_fail_after_recovery.value(),
        run_control: spec.run_control,
    }
}

fn link_plan(name: &str, spec: &PlanSpec) -> Result<Plan, Vec<ValidationError>> {
    let mut actions: HashMap<String, Action> = spec
        .actions
        .iter()
        .map(|(action_name, action_spec)| {
            (action_name.clone(), link_action(action_name, action_spec))
        })
        .collect();

    // Every referenced-but-undeclared name becomes a default action.
    for referenced in referenced_names(spec) {
        actions
            .entry(referenced.clone())
            .or_insert_with(|| Action::default_for(&referenced));
    }

    let plan = Plan {
        name: name.to_string(),
        critical_actions: spec.critical_actions.clone(),
        actions,
        allow_fail: spec.allow_fail.value(),
    };

    validate_plan(&plan)?;
    Ok(plan)
}

fn referenced_names(spec: &PlanSpec) -> Vec<String> {
    let mut names: Vec<String> = spec.critical_actions.clone();
    for action in spec.actions.values() {
        names.extend(action.conditions.iter().cloned());
        names.extend(action.dependencies.iter().cloned());
        names.extend(action.recovery_actions.iter().cloned());
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RunControl;
    use serde_json::json;
    use std::time::Duration;

    fn doc(value: serde_json::Value) -> ConfigDoc {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_load_plan_links_declared_actions() {
        let doc = doc(json!({
            "repair": {
                "critical_actions": ["dut_ssh"],
                "actions": {
                    "dut_ssh": {
                        "exec_name": "dut_ssh_check",
                        "exec_timeout": "15s",
                        "run_control": "RERUN_AFTER_RECOVERY"
                    }
                }
            }
        }));

        let plan = load_plan(&doc, "repair").unwrap();
        let action = plan.action("dut_ssh").unwrap();
        assert_eq!(action.exec_name, "dut_ssh_check");
        assert_eq!(action.exec_timeout, Duration::from_secs(15));
        assert_eq!(action.run_control, RunControl::RerunAfterRecovery);
    }

    #[test]
    fn test_referenced_names_become_default_actions() {
        let doc = doc(json!({
            "repair": {
                "critical_actions": ["a"],
                "actions": {
                    "a": {
                        "conditions": ["c1"],
                        "dependencies": ["d1"],
                        "recovery_actions": ["r1"]
                    }
                }
            }
        }));

        let plan = load_plan(&doc, "repair").unwrap();
        for name in ["c1", "d1", "r1"] {
            let action = plan.action(name).unwrap();
            assert_eq!(action.exec_name, name);
            assert_eq!(action.exec_timeout, DEFAULT_EXEC_TIMEOUT);
            assert!(action.dependencies.is_empty());
            assert_eq!(action.run_control, RunControl::RunOnce);
        }
    }

    #[test]
    fn test_critical_action_without_declaration_is_defaulted() {
        let doc = doc(json!({
            "smoke": { "critical_actions": ["sample_pass"] }
        }));

        let plan = load_plan(&doc, "smoke").unwrap();
        assert!(plan.action("sample_pass").is_some());
    }

    #[test]
    fn test_unknown_plan_is_rejected() {
        let doc = doc(json!({ "repair": {} }));
        let errors = load_plan(&doc, "deploy").unwrap_err();
        assert_eq!(
            errors[0],
            ValidationError::UnknownPlan {
                plan: "deploy".to_string()
            }
        );
    }

    #[test]
    fn test_self_loop_is_rejected_at_load() {
        let doc = doc(json!({
            "repair": {
                "critical_actions": ["a"],
                "actions": { "a": { "dependencies": ["a"] } }
            }
        }));

        let errors = load_plan(&doc, "repair").unwrap_err();
        assert!(matches!(errors[0], ValidationError::SelfReference { .. }));
    }

    #[test]
    fn test_plan_names_are_sorted() {
        let doc = doc(json!({ "zeta": {}, "alpha": {}, "mid": {} }));
        assert_eq!(plan_names(&doc), vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_allow_fail_truthiness_variants() {
        for (raw, expected) in [
            (json!(true), true),
            (json!(1), true),
            (json!("True"), true),
            (json!(0), false),
            (json!("no"), false),
        ] {
            let doc = doc(json!({ "p": { "allow_fail": raw } }));
            let plan = load_plan(&doc, "p").unwrap();
            assert_eq!(plan.allow_fail, expected);
        }
    }

    #[test]
    fn test_round_trip_preserves_structure() {
        let original = doc(json!({
            "repair": {
                "allow_fail": 1,
                "critical_actions": ["a", "b"],
                "actions": {
                    "a": {
                        "exec_name": "sample_pass",
                        "exec_extra_args": ["x", "y"],
                        "exec_timeout": "90s",
                        "conditions": ["c2", "c1"],
                        "dependencies": ["b"],
                        "recovery_actions": ["r1"],
                        "allow_fail_after_recovery": "true",
                        "run_control": "ALWAYS_RUN"
                    }
                }
            }
        }));

        let plan = load_plan(&original, "repair").unwrap();

        // Serialize the linked graph back to document form and reload.
        let spec = plan.to_spec();
        let text = serde_json::to_string(&spec).unwrap();
        let respec: PlanSpec = serde_json::from_str(&text).unwrap();
        let reloaded = link_plan("repair", &respec).unwrap();

        assert_eq!(reloaded.critical_actions, plan.critical_actions);
        assert_eq!(reloaded.allow_fail, plan.allow_fail);
        let a = reloaded.action("a").unwrap();
        let orig_a = plan.action("a").unwrap();
        // Declaration order of the three lists is significant.
        assert_eq!(a.conditions, orig_a.conditions);
        assert_eq!(a.dependencies, orig_a.dependencies);
        assert_eq!(a.recovery_actions, orig_a.recovery_actions);
        assert_eq!(a.exec_extra_args, orig_a.exec_extra_args);
        assert_eq!(a.exec_timeout, orig_a.exec_timeout);
        assert_eq!(a.allow_fail_after_recovery, orig_a.allow_fail_after_recovery);
        assert_eq!(a.run_control, orig_a.run_control);
        assert_eq!(reloaded.actions.len(), plan.actions.len());
    }
}
