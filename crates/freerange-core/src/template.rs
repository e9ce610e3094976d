//! Template rendering.
//!
//! Rendering happens at ingress: the persisted notification content is the
//! exact bytes later handed to providers, so retries and dead-letter replays
//! never re-render against a template that changed in the meantime.

use serde_json::Value;

use crate::error::NotifyError;
use crate::models::{NotificationContent, Template};

pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &Template, vars: &Value) -> Result<NotificationContent, NotifyError>;
}

/// Handlebars-backed renderer with strict missing-variable behavior disabled:
/// absent placeholders render empty, matching what tenants expect from
/// loosely-typed notification payloads.
pub struct HandlebarsRenderer {
    registry: handlebars::Handlebars<'static>,
}

impl HandlebarsRenderer {
    pub fn new() -> Self {
        let mut registry = handlebars::Handlebars::new();
        registry.set_strict_mode(false);
        Self { registry }
    }
}

impl Default for HandlebarsRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRenderer for HandlebarsRenderer {
    fn render(&self, template: &Template, vars: &Value) -> Result<NotificationContent, NotifyError> {
        let title = self
            .registry
            .render_template(&template.title, vars)
            .map_err(|e| NotifyError::validation(format!("template title render failed: {}", e)))?;
        let body = self
            .registry
            .render_template(&template.body, vars)
            .map_err(|e| NotifyError::validation(format!("template body render failed: {}", e)))?;
        Ok(NotificationContent {
            title,
            body,
            data: Default::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn template(title: &str, body: &str) -> Template {
        let now = Utc::now();
        Template {
            template_id: "t1".into(),
            app_id: "a1".into(),
            name: "welcome".into(),
            title: title.into(),
            body: body.into(),
            description: None,
            locale: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn renders_placeholders() {
        let renderer = HandlebarsRenderer::new();
        let content = renderer
            .render(
                &template("Hello {{name}}", "Your order {{order_id}} shipped"),
                &json!({"name": "Ada", "order_id": "42"}),
            )
            .unwrap();
        assert_eq!(content.title, "Hello Ada");
        assert_eq!(content.body, "Your order 42 shipped");
    }

    #[test]
    fn missing_variables_render_empty() {
        let renderer = HandlebarsRenderer::new();
        let content = renderer
            .render(&template("Hi {{name}}", "body"), &json!({}))
            .unwrap();
        assert_eq!(content.title, "Hi ");
    }
}
