//! Template rendering with variable substitution

use crate::templates::MessageTemplate;
use chrono::Utc;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Variables filled in by the renderer itself
pub const SYSTEM_VARIABLES: [&str; 3] = ["date", "time", "datetime"];

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}").expect("placeholder pattern is valid")
    })
}

/// Output of rendering a template for one recipient
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedMessage {
    pub subject: String,
    pub content: String,
    pub whatsapp_content: String,
}

/// Renders message templates by substituting `{variable}` placeholders
pub struct TemplateRenderer;

impl TemplateRenderer {
    /// Render every text field of a template
    ///
    /// System variables (`{date}`, `{time}`, `{datetime}`) are always filled;
    /// placeholders missing from `vars` are left untouched so gaps stay visible.
    pub fn render(template: &MessageTemplate, vars: &HashMap<String, String>) -> RenderedMessage {
        RenderedMessage {
            subject: Self::render_string(&template.subject, vars),
            content: Self::render_string(&template.content, vars),
            whatsapp_content: Self::render_string(&template.whatsapp_content, vars),
        }
    }

    /// Render a string with variable substitution
    pub fn render_string(template_str: &str, vars: &HashMap<String, String>) -> String {
        let now = Utc::now();

        placeholder_pattern()
            .replace_all(template_str, |caps: &regex::Captures<'_>| {
                let name = &caps[1];
                if let Some(value) = vars.get(name) {
                    return value.clone();
                }
                match name {
                    "date" => now.format("%Y-%m-%d").to_string(),
                    "time" => now.format("%H:%M:%S").to_string(),
                    "datetime" => now.format("%Y-%m-%d %H:%M:%S").to_string(),
                    _ => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    /// Extract placeholder names in order of first appearance, without duplicates
    pub fn extract_variables(template_str: &str) -> Vec<String> {
        let mut variables: Vec<String> = Vec::new();
        for caps in placeholder_pattern().captures_iter(template_str) {
            let name = &caps[1];
            if !variables.iter().any(|v| v == name) {
                variables.push(name.to_string());
            }
        }
        variables
    }

    /// Placeholders used across subject, email body and WhatsApp body
    pub fn template_variables(template: &MessageTemplate) -> Vec<String> {
        let combined = format!(
            "{}\n{}\n{}",
            template.subject, template.content, template.whatsapp_content
        );
        Self::extract_variables(&combined)
    }

    /// Placeholders in `text` that are neither in `known` nor system variables
    pub fn unknown_variables(text: &str, known: &[String]) -> Vec<String> {
        Self::extract_variables(text)
            .into_iter()
            .filter(|name| {
                !known.iter().any(|k| k == name) && !SYSTEM_VARIABLES.contains(&name.as_str())
            })
            .collect()
    }

    /// Variables the template declares but `provided_vars` does not supply
    pub fn missing_variables(
        template: &MessageTemplate,
        provided_vars: &HashMap<String, String>,
    ) -> Vec<String> {
        template
            .variables
            .iter()
            .filter(|v| {
                !provided_vars.contains_key(*v) && !SYSTEM_VARIABLES.contains(&v.as_str())
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_basic_variables() {
        let mut vars = HashMap::new();
        vars.insert("name".to_string(), "John Doe".to_string());
        vars.insert("company".to_string(), "Acme Inc".to_string());

        let rendered = TemplateRenderer::render_string("Hello {name} from {company}!", &vars);

        assert_eq!(rendered, "Hello John Doe from Acme Inc!");
    }

    #[test]
    fn test_render_date_time_variables() {
        let vars = HashMap::new();
        let rendered = TemplateRenderer::render_string("Today is {date} at {time}", &vars);

        assert!(rendered.starts_with("Today is "));
        assert!(!rendered.contains("{date}"));
        assert!(!rendered.contains("{time}"));
    }

    #[test]
    fn test_render_keeps_unknown_placeholders() {
        let vars = HashMap::new();
        let rendered = TemplateRenderer::render_string("Hi {name}", &vars);
        assert_eq!(rendered, "Hi {name}");
    }

    #[test]
    fn test_extract_variables_keeps_first_use_order() {
        let template = "Hello {name}, your order {order_id} is ready. {name}, see {date}";
        let vars = TemplateRenderer::extract_variables(template);

        assert_eq!(vars, vec!["name", "order_id", "date"]);
    }

    #[test]
    fn test_extract_variables_with_spaces() {
        let vars = TemplateRenderer::extract_variables("Hello { name }, welcome!");
        assert_eq!(vars, vec!["name"]);
    }

    #[test]
    fn test_unknown_variables_against_defaults() {
        let known: Vec<String> = ["name", "email", "phone", "company"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let unknown =
            TemplateRenderer::unknown_variables("Hello {name} from {unknown} on {date}", &known);
        assert_eq!(unknown, vec!["unknown"]);
    }

    #[test]
    fn test_render_full_template() {
        let mut template =
            MessageTemplate::email("t1", "Welcome", "Hi {name}", "Hello {name} from {company}");
        template.whatsapp_content = "Hey {name}".to_string();
        template.variables = TemplateRenderer::template_variables(&template);
        assert_eq!(template.variables, vec!["name", "company"]);

        let mut vars = HashMap::new();
        vars.insert("name".to_string(), "Ana".to_string());

        assert_eq!(TemplateRenderer::missing_variables(&template, &vars), vec!["company"]);

        let rendered = TemplateRenderer::render(&template, &vars);
        assert_eq!(rendered.subject, "Hi Ana");
        assert_eq!(rendered.content, "Hello Ana from {company}");
        assert_eq!(rendered.whatsapp_content, "Hey Ana");
    }
}
