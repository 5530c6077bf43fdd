//! Registry of prompt templates keyed by task type and name.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::RwLock;

use devassist_core::TaskType;
use devassist_core::config::PromptsConfig;
use devassist_core::sync::IgnoreRwLock as _;
use serde::Deserialize;
use tracing::{debug, info};

use super::template::PromptTemplate;
use crate::error::{OrchestratorError, Result};

/// Embedded template set
const BUILTIN_TEMPLATES: &str = include_str!("templates.toml");

/// Name of the template the orchestrator renders when a request has no prompt override.
pub const DEFAULT_TEMPLATE: &str = "default";

/// On-disk layout of a template file.
#[derive(Debug, Deserialize)]
struct TemplateFile {
    #[serde(default)]
    templates: Vec<PromptTemplate>,
}

/// Thread-safe template registry.
#[derive(Debug, Default)]
pub struct PromptManager {
    templates: RwLock<BTreeMap<(TaskType, String), PromptTemplate>>,
}

impl PromptManager {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the embedded templates.
    ///
    /// # Errors
    /// Returns an error if an embedded template fails to parse or validate.
    pub fn with_builtin() -> Result<Self> {
        let manager = Self::new();
        let count = manager.load_toml_str(BUILTIN_TEMPLATES)?;
        debug!("Loaded {count} built-in prompt templates");
        Ok(manager)
    }

    /// Builds the registry a configuration asks for: the embedded set when
    /// `builtin` is on, extended or overridden by `template_file`.
    ///
    /// # Errors
    /// Returns an error if any template source fails to parse or validate.
    pub fn from_config(config: &PromptsConfig) -> Result<Self> {
        let manager = if config.builtin {
            Self::with_builtin()?
        } else {
            Self::new()
        };
        if let Some(path) = &config.template_file {
            manager.load_from_file(path)?;
        }
        Ok(manager)
    }

    /// Registers every template in a TOML document. Returns how many were loaded.
    ///
    /// Nothing is registered unless every template in the document is valid.
    ///
    /// # Errors
    /// Returns an error on malformed TOML, or [`OrchestratorError::InvalidTemplate`]
    /// listing the problems of every invalid template.
    pub fn load_toml_str(&self, source: &str) -> Result<usize> {
        let file: TemplateFile =
            toml::from_str(source).map_err(|err| OrchestratorError::Core(err.into()))?;

        let mut errors = Vec::new();
        for template in &file.templates {
            errors.extend(
                template
                    .validate()
                    .into_iter()
                    .map(|problem| format!("{}/{}: {problem}", template.task_type, template.name)),
            );
        }
        if !errors.is_empty() {
            return Err(OrchestratorError::InvalidTemplate(errors));
        }

        let count = file.templates.len();
        let mut templates = self.templates.write_ignore_poison();
        for template in file.templates {
            debug!(
                "Registering prompt template {}/{} v{}",
                template.task_type, template.name, template.version
            );
            templates.insert((template.task_type, template.name.clone()), template);
        }
        drop(templates);
        Ok(count)
    }

    /// Registers every template in a TOML file. Returns how many were loaded.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or holds invalid templates.
    pub fn load_from_file(&self, path: &Path) -> Result<usize> {
        let source = fs::read_to_string(path).map_err(|err| OrchestratorError::Core(err.into()))?;
        let count = self.load_toml_str(&source)?;
        info!("Loaded {count} prompt templates from {}", path.display());
        Ok(count)
    }

    /// Validates and stores a template, replacing one with the same key.
    ///
    /// # Errors
    /// Returns [`OrchestratorError::InvalidTemplate`] listing every problem found.
    pub fn register(&self, template: PromptTemplate) -> Result<()> {
        let errors = template.validate();
        if !errors.is_empty() {
            return Err(OrchestratorError::InvalidTemplate(errors));
        }
        let key = (template.task_type, template.name.clone());
        debug!(
            "Registering prompt template {}/{} v{}",
            template.task_type, template.name, template.version
        );
        self.templates.write_ignore_poison().insert(key, template);
        Ok(())
    }

    /// Looks up a template.
    ///
    /// # Errors
    /// Returns [`OrchestratorError::TemplateNotFound`] if absent.
    pub fn get(&self, task_type: TaskType, name: &str) -> Result<PromptTemplate> {
        self.templates
            .read_ignore_poison()
            .get(&(task_type, name.to_owned()))
            .cloned()
            .ok_or_else(|| OrchestratorError::TemplateNotFound {
                task_type,
                name: name.to_owned(),
            })
    }

    /// Whether a template exists.
    pub fn contains(&self, task_type: TaskType, name: &str) -> bool {
        self.templates
            .read_ignore_poison()
            .contains_key(&(task_type, name.to_owned()))
    }

    /// Renders a template into `(system_prompt, user_prompt)`.
    ///
    /// # Errors
    /// Returns [`OrchestratorError::TemplateNotFound`] or
    /// [`OrchestratorError::MissingVariable`].
    pub fn render(
        &self,
        task_type: TaskType,
        name: &str,
        variables: &HashMap<String, String>,
    ) -> Result<(String, String)> {
        self.get(task_type, name)?.render(variables)
    }

    /// All templates, sorted by task type then name.
    pub fn list(&self) -> Vec<PromptTemplate> {
        self.templates.read_ignore_poison().values().cloned().collect()
    }

    /// Number of registered templates.
    pub fn len(&self) -> usize {
        self.templates.read_ignore_poison().len()
    }

    /// Whether no template is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::NamedTempFile;

    fn content(value: &str) -> HashMap<String, String> {
        HashMap::from([("content".to_owned(), value.to_owned())])
    }

    #[test]
    fn test_builtin_covers_every_task_type() {
        let manager = PromptManager::with_builtin().unwrap();
        for task in TaskType::all() {
            assert!(manager.contains(task, DEFAULT_TEMPLATE), "no default template for {task}");
            let (system, user) = manager
                .render(task, DEFAULT_TEMPLATE, &content("КП-42"))
                .unwrap();
            assert!(!system.is_empty());
            assert!(user.contains("КП-42"));
        }
    }

    #[test]
    fn test_register_and_get() {
        let manager = PromptManager::new();
        let template = PromptTemplate::new(TaskType::Search, "lookup", "Найди {term}")
            .with_variables(["term"])
            .with_version("2.0.0");
        manager.register(template.clone()).unwrap();
        assert_eq!(manager.get(TaskType::Search, "lookup").unwrap(), template);
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_register_rejects_invalid() {
        let manager = PromptManager::new();
        let template = PromptTemplate::new(TaskType::Search, "bad", "{undeclared}");
        let result = manager.register(template);
        assert!(matches!(result, Err(OrchestratorError::InvalidTemplate(errors)) if errors.len() == 1));
        assert!(manager.is_empty());
    }

    #[test]
    fn test_missing_template() {
        let manager = PromptManager::new();
        let result = manager.get(TaskType::Comparison, "nope");
        assert!(matches!(
            result,
            Err(OrchestratorError::TemplateNotFound { task_type: TaskType::Comparison, ref name }) if name == "nope"
        ));
    }

    #[test]
    fn test_render_missing_variable() {
        let manager = PromptManager::with_builtin().unwrap();
        let result = manager.render(TaskType::Comparison, "kp_vs_tz", &content("x"));
        assert!(matches!(result, Err(OrchestratorError::MissingVariable(name)) if name == "tz"));
    }

    #[test]
    fn test_list_is_sorted() {
        let manager = PromptManager::new();
        for (task, name) in [
            (TaskType::Search, "b"),
            (TaskType::TextAnalysis, "z"),
            (TaskType::Search, "a"),
        ] {
            manager
                .register(PromptTemplate::new(task, name, "{content}").with_variables(["content"]))
                .unwrap();
        }
        let keys: Vec<_> = manager
            .list()
            .into_iter()
            .map(|template| (template.task_type, template.name))
            .collect();
        assert_eq!(
            keys,
            vec![
                (TaskType::TextAnalysis, "z".to_owned()),
                (TaskType::Search, "a".to_owned()),
                (TaskType::Search, "b".to_owned()),
            ]
        );
    }

    #[test]
    fn test_load_from_file_overrides_builtin() {
        let manager = PromptManager::with_builtin().unwrap();
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[[templates]]\nname = \"default\"\ntask_type = \"search\"\nversion = \"9.0.0\"\nvariables = [\"content\"]\nuser_prompt = \"Q: {{content}}\""
        )
        .unwrap();
        assert_eq!(manager.load_from_file(file.path()).unwrap(), 1);
        let (_, user) = manager
            .render(TaskType::Search, DEFAULT_TEMPLATE, &content("где?"))
            .unwrap();
        assert_eq!(user, "Q: где?");
    }

    #[test]
    fn test_malformed_toml_is_an_error() {
        let manager = PromptManager::new();
        assert!(matches!(
            manager.load_toml_str("[[templates]\n"),
            Err(OrchestratorError::Core(_))
        ));
    }

    #[test]
    fn test_from_config_without_builtin() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[[templates]]\nname = \"only\"\ntask_type = \"search\"\nvariables = [\"content\"]\nuser_prompt = \"{{content}}\""
        )
        .unwrap();
        let config = PromptsConfig {
            builtin: false,
            template_file: Some(file.path().to_path_buf()),
        };
        let manager = PromptManager::from_config(&config).unwrap();
        assert_eq!(manager.len(), 1);
        assert!(!manager.contains(TaskType::Search, DEFAULT_TEMPLATE));
    }

    #[test]
    fn test_invalid_document_registers_nothing() {
        let manager = PromptManager::new();
        let source = r#"
[[templates]]
name = "good"
task_type = "search"
variables = ["content"]
user_prompt = "{content}"

[[templates]]
name = "bad"
task_type = "search"
user_prompt = "{undeclared}"
"#;
        let Err(OrchestratorError::InvalidTemplate(errors)) = manager.load_toml_str(source) else {
            panic!("document with an invalid template should be rejected");
        };
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("search/bad: "));
        assert!(manager.is_empty());
    }
}
