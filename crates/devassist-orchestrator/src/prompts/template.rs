//! Prompt templates with `{variable}` placeholders.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::LazyLock;

use devassist_core::TaskType;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};

/// Matches `{identifier}` placeholders
static PLACEHOLDER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| match Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}") {
        Ok(regex) => regex,
        Err(err) => panic!("Placeholder regex is invalid: {err}"),
    });

/// A named, versioned prompt for one task type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplate {
    /// Name, unique within the task type
    pub name: String,
    /// Namespace the template lives in
    pub task_type: TaskType,
    /// System prompt, may contain placeholders
    #[serde(default)]
    pub system_prompt: String,
    /// User prompt with placeholders
    pub user_prompt: String,
    /// Variables the prompts use
    #[serde(default)]
    pub variables: Vec<String>,
    /// Semantic version
    #[serde(default = "default_version")]
    pub version: String,
    /// What the template is for
    #[serde(default)]
    pub description: String,
}

fn default_version() -> String {
    "1.0.0".to_owned()
}

/// Placeholder names appearing in `text`, in order of first appearance.
pub fn placeholders(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    PLACEHOLDER_REGEX
        .captures_iter(text)
        .filter_map(|captures| captures.get(1))
        .map(|name| name.as_str().to_owned())
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

/// Replaces every placeholder in one pass.
///
/// Substituted values are not scanned again, so a value containing `{x}`
/// stays literal.
///
/// # Errors
/// Returns [`OrchestratorError::MissingVariable`] for the first placeholder
/// without a value.
pub fn substitute(text: &str, variables: &HashMap<String, String>) -> Result<String> {
    if let Some(missing) = placeholders(text)
        .into_iter()
        .find(|name| !variables.contains_key(name))
    {
        return Err(OrchestratorError::MissingVariable(missing));
    }
    let rendered = PLACEHOLDER_REGEX.replace_all(text, |captures: &Captures<'_>| {
        captures
            .get(1)
            .and_then(|name| variables.get(name.as_str()))
            .cloned()
            .unwrap_or_default()
    });
    Ok(rendered.into_owned())
}

impl PromptTemplate {
    /// Creates a template with the given user prompt and no declared variables.
    pub fn new<N: Into<String>, U: Into<String>>(task_type: TaskType, name: N, user_prompt: U) -> Self {
        Self {
            name: name.into(),
            task_type,
            system_prompt: String::new(),
            user_prompt: user_prompt.into(),
            variables: Vec::new(),
            version: default_version(),
            description: String::new(),
        }
    }

    /// Sets the system prompt.
    #[must_use]
    pub fn with_system_prompt<S: Into<String>>(mut self, system_prompt: S) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    /// Declares the variables the prompts use.
    #[must_use]
    pub fn with_variables<I, S>(mut self, variables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.variables = variables.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the version.
    #[must_use]
    pub fn with_version<S: Into<String>>(mut self, version: S) -> Self {
        self.version = version.into();
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = description.into();
        self
    }

    /// Placeholders used by either prompt.
    pub fn used_variables(&self) -> BTreeSet<String> {
        placeholders(&self.system_prompt)
            .into_iter()
            .chain(placeholders(&self.user_prompt))
            .collect()
    }

    /// Problems that keep this template from being registered; empty if valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.name.trim().is_empty() {
            errors.push("Template name is empty".to_owned());
        }
        if self.user_prompt.trim().is_empty() {
            errors.push(format!("Template '{}' has an empty user prompt", self.name));
        }

        let mut declared = BTreeSet::new();
        for variable in &self.variables {
            if !declared.insert(variable.clone()) {
                errors.push(format!("Variable '{variable}' is declared more than once"));
            }
        }

        let used = self.used_variables();
        for variable in used.difference(&declared) {
            errors.push(format!("Placeholder '{{{variable}}}' is not declared"));
        }
        for variable in declared.difference(&used) {
            errors.push(format!("Variable '{variable}' is declared but never used"));
        }
        errors
    }

    /// Renders both prompts.
    ///
    /// # Errors
    /// Returns [`OrchestratorError::MissingVariable`] when a used variable
    /// has no value.
    pub fn render(&self, variables: &HashMap<String, String>) -> Result<(String, String)> {
        let user = substitute(&self.user_prompt, variables)?;
        let system = substitute(&self.system_prompt, variables)?;
        Ok((system, user))
    }
}
