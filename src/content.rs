//! Column content resolution.
//!
//! Appended columns, edited columns, and row templates all carry a
//! `Content`: a literal value, a callback over the original row, or a
//! string template rendered by the host's templating engine through the
//! `ContentRenderer` seam.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use tera::Tera;

use crate::error::Result;

/// Reserved context key exposing the original row to string templates.
pub const MODEL_KEY: &str = "model";

type ContentFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// A column value generator.
#[derive(Clone)]
pub enum Content {
    /// A fixed value.
    Literal(Value),
    /// A string template rendered against the row's data.
    Template(String),
    /// A callback invoked with the original row.
    Callback(ContentFn),
}

impl Content {
    pub fn literal(value: impl Into<Value>) -> Self {
        Content::Literal(value.into())
    }

    pub fn template(template: impl Into<String>) -> Self {
        Content::Template(template.into())
    }

    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        Content::Callback(Arc::new(f))
    }

    /// Resolve the content for one row.
    ///
    /// Templates render against the already-computed column data with
    /// the row's own fields overlaid and the original row reachable
    /// under [`MODEL_KEY`]; the context is discarded after rendering.
    pub fn resolve(
        &self,
        data: &Map<String, Value>,
        row: &Value,
        renderer: &dyn ContentRenderer,
    ) -> Result<Value> {
        match self {
            Content::Literal(value) => Ok(value.clone()),
            Content::Callback(f) => Ok(f(row)),
            Content::Template(template) => {
                let mut context = data.clone();
                if let Some(fields) = row.as_object() {
                    for (key, value) in fields {
                        context.insert(key.clone(), value.clone());
                    }
                }
                context.insert(MODEL_KEY.to_string(), row.clone());
                let rendered = renderer.render(template, &Value::Object(context))?;
                Ok(Value::String(rendered))
            }
        }
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Content::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            Content::Template(template) => f.debug_tuple("Template").field(template).finish(),
            Content::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

impl From<&str> for Content {
    fn from(template: &str) -> Self {
        Content::Template(template.to_string())
    }
}

impl From<String> for Content {
    fn from(template: String) -> Self {
        Content::Template(template)
    }
}

/// Renders string templates against a JSON context.
pub trait ContentRenderer: Send + Sync {
    fn render(&self, template: &str, context: &Value) -> Result<String>;
}

/// Tera-backed renderer using one-off template compilation.
#[derive(Debug, Default, Clone, Copy)]
pub struct TeraRenderer;

impl ContentRenderer for TeraRenderer {
    fn render(&self, template: &str, context: &Value) -> Result<String> {
        let context = tera::Context::from_value(context.clone())?;
        Ok(Tera::one_off(template, &context, false)?)
    }
}
