//! Prompt templates for Klipp.
//!
//! Prompts can be customized by placing TOML files in the custom prompts directory.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Collection of all prompt templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Prompts {
    pub selection: SelectionPrompts,
    /// Custom variables from config, available in all prompts.
    #[serde(skip)]
    pub variables: HashMap<String, String>,
}

/// Prompts for picking clip-worthy segments out of a transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionPrompts {
    pub system: String,
    pub user: String,
    /// Follow-up sent after a reply that could not be used.
    pub correction: String,
}

impl Default for SelectionPrompts {
    fn default() -> Self {
        Self {
            system: r#"You are a viral segment extractor for video transcripts. You pick the passages most likely to work as standalone short-form clips. RETURN ONLY JSON.

Rules:
1. Use start and end times ONLY from the transcript lines. Never invent timestamps.
2. Merge consecutive lines. Do not skip lines inside a segment.
3. Every segment must end on a complete sentence or idea. Never cut mid-sentence.
4. Every segment must be between {{min_seconds}} and {{max_seconds}} seconds long.
5. Segments must not overlap.
6. Score each segment between 0.0 and 1.0 for how well it works on its own."#
                .to_string(),

            user: r#"Select up to {{max_clips}} segments from this transcript.

Each segment must last at least {{min_seconds}} and at most {{max_seconds}} seconds.
The video is {{duration}} long; no segment may end after that.

Respond with this JSON shape and nothing else:
{"segments": [{"start": "MM:SS", "end": "MM:SS", "label": "one sentence on why this works as a clip", "score": 0.9}]}

TRANSCRIPT:
{{transcript}}

OUTPUT ONLY VALID JSON!"#
                .to_string(),

            correction: r#"{{prompt}}

Your previous reply could not be used:
{{previous}}

Problem: {{error}}

Reply again with corrected JSON only, following the shape and duration rules above."#
                .to_string(),
        }
    }
}

impl Prompts {
    /// Load prompts from the default location, with optional custom directory and variables.
    pub fn load(
        custom_dir: Option<&str>,
        custom_variables: Option<&HashMap<String, String>>,
    ) -> crate::error::Result<Self> {
        let mut prompts = Prompts::default();

        if let Some(vars) = custom_variables {
            prompts.variables = vars.clone();
        }

        if let Some(dir) = custom_dir {
            let custom_path = PathBuf::from(shellexpand::tilde(dir).to_string());

            let selection_path = custom_path.join("selection.toml");
            if selection_path.exists() {
                let content = std::fs::read_to_string(&selection_path)?;
                prompts.selection = toml::from_str(&content)?;
            }
        }

        Ok(prompts)
    }

    /// Render a prompt template with the given variables.
    pub fn render(template: &str, vars: &HashMap<String, String>) -> String {
        let mut result = template.to_string();
        for (key, value) in vars {
            result = result.replace(&format!("{{{{{}}}}}", key), value);
        }
        result
    }

    /// Render a prompt template with both provided variables and custom config variables.
    /// Provided variables take precedence over custom config variables.
    pub fn render_with_custom(&self, template: &str, vars: &HashMap<String, String>) -> String {
        let mut merged = self.variables.clone();
        for (key, value) in vars {
            merged.insert(key.clone(), value.clone());
        }
        Self::render(template, &merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_prompts() {
        let prompts = Prompts::default();
        assert!(prompts.selection.user.contains("{{transcript}}"));
        assert!(prompts.selection.correction.contains("{{error}}"));
    }

    #[test]
    fn test_render_template() {
        let template = "Hello {{name}}, you have {{count}} messages.";
        let mut vars = HashMap::new();
        vars.insert("name".to_string(), "Alice".to_string());
        vars.insert("count".to_string(), "5".to_string());

        let result = Prompts::render(template, &vars);
        assert_eq!(result, "Hello Alice, you have 5 messages.");
    }

    #[test]
    fn test_custom_variables_are_overridden() {
        let mut custom = HashMap::new();
        custom.insert("topic".to_string(), "cooking".to_string());
        custom.insert("max_clips".to_string(), "99".to_string());
        let prompts = Prompts::load(None, Some(&custom)).unwrap();

        let mut vars = HashMap::new();
        vars.insert("max_clips".to_string(), "3".to_string());
        let out = prompts.render_with_custom("{{topic}}: {{max_clips}}", &vars);
        assert_eq!(out, "cooking: 3");
    }

    #[test]
    fn test_load_custom_selection_prompts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("selection.toml"),
            "user = \"Pick from {{transcript}}\"\n",
        )
        .unwrap();

        let prompts = Prompts::load(dir.path().to_str(), None).unwrap();
        assert_eq!(prompts.selection.user, "Pick from {{transcript}}");
        assert!(!prompts.selection.system.is_empty());
    }
}
