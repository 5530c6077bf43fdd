//! Integration tests for the prompt registry and its wiring from configuration.

#![cfg_attr(
    test,
    allow(
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::missing_panics_doc,
        clippy::tests_outside_test_module,
        reason = "Test allows"
    )
)]

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

use anyhow::Result;
use devassist_core::{DevAssistConfig, MemoryStore, ProviderKind, TaskType};
use devassist_orchestrator::{
    DEFAULT_TEMPLATE, Orchestrator, OrchestratorError, PromptManager, PromptTemplate,
};
use tempfile::TempDir;

fn variables(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(name, value)| ((*name).to_owned(), (*value).to_owned()))
        .collect()
}

#[test]
fn test_register_then_get_round_trips() -> Result<()> {
    let manager = PromptManager::new();
    let template = PromptTemplate::new(
        TaskType::Comparison,
        "weighted",
        "Сравни {kp} с {tz}, вес цены {weight}",
    )
    .with_system_prompt("Ты аналитик закупок")
    .with_variables(["kp", "tz", "weight"])
    .with_version("1.2.0")
    .with_description("Comparison with a price weight");

    manager.register(template.clone())?;
    assert_eq!(manager.get(TaskType::Comparison, "weighted")?, template);

    let (system, user) = manager.render(
        TaskType::Comparison,
        "weighted",
        &variables(&[("kp", "КП-1"), ("tz", "ТЗ-1"), ("weight", "40%")]),
    )?;
    assert_eq!(system, "Ты аналитик закупок");
    assert_eq!(user, "Сравни КП-1 с ТЗ-1, вес цены 40%");
    Ok(())
}

#[test]
fn test_missing_variable_is_reported_by_name() {
    let manager = PromptManager::with_builtin().unwrap();
    let result = manager.render(
        TaskType::Search,
        "question",
        &variables(&[("content", "документ")]),
    );
    assert!(matches!(result, Err(OrchestratorError::MissingVariable(name)) if name == "question"));
}

#[test]
fn test_invalid_template_lists_every_problem() {
    let manager = PromptManager::new();
    let template = PromptTemplate::new(TaskType::Search, "broken", "{a} {b}").with_variables(["a", "c"]);
    let Err(OrchestratorError::InvalidTemplate(errors)) = manager.register(template) else {
        panic!("registration should fail");
    };
    assert_eq!(errors.len(), 2);
    assert!(matches!(
        manager.get(TaskType::Search, "broken"),
        Err(OrchestratorError::TemplateNotFound { .. })
    ));
}

#[test]
fn test_configured_template_file_extends_builtin_set() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("templates.toml");
    fs::write(
        &path,
        r#"
[[templates]]
name = "short"
task_type = "report_generation"
variables = ["content"]
user_prompt = "Кратко: {content}"
"#,
    )?;

    let mut config = DevAssistConfig::default();
    config.prompts.template_file = Some(path);
    for kind in ProviderKind::all() {
        config.providers.vendor_mut(kind).enabled = false;
    }

    let orchestrator = Orchestrator::from_config(&config, Arc::new(MemoryStore::new()))?;
    let prompts = orchestrator.prompts().unwrap();
    assert!(prompts.contains(TaskType::ReportGeneration, "short"));
    assert!(prompts.contains(TaskType::ReportGeneration, DEFAULT_TEMPLATE));
    assert!(orchestrator.registry().is_empty());
    Ok(())
}

#[test]
fn test_broken_template_file_fails_construction() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("templates.toml");
    fs::write(
        &path,
        "[[templates]]\nname = \"bad\"\ntask_type = \"search\"\nuser_prompt = \"{undeclared}\"\n",
    )?;

    let mut config = DevAssistConfig::default();
    config.prompts.template_file = Some(path);
    let result = Orchestrator::from_config(&config, Arc::new(MemoryStore::new()));
    assert!(matches!(result, Err(OrchestratorError::InvalidTemplate(_))));
    Ok(())
}
