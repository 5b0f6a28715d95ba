//! Named body templates with `{{variable}}` substitution.

use std::collections::HashMap;

use dashmap::DashMap;

use crate::error::DispatchError;
use crate::notification::NotificationRequest;

/// Registry of named body templates.
///
/// Dispatch renders a request's body through the catalog: a request naming
/// a template gets its `template_data` substituted into the template text;
/// a request without one uses its literal content. Unknown template names
/// fail the dispatch with a permanent error.
pub struct TemplateCatalog {
    templates: DashMap<String, String>,
}

impl TemplateCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self {
            templates: DashMap::new(),
        }
    }

    /// Register or replace a template
    pub fn register(&self, name: impl Into<String>, body: impl Into<String>) {
        self.templates.insert(name.into(), body.into());
    }

    /// Number of registered templates
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Whether the catalog has no templates
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Render the body for a request.
    pub fn render(&self, request: &NotificationRequest) -> Result<String, DispatchError> {
        match &request.template_name {
            Some(name) => {
                let template = self.templates.get(name).ok_or_else(|| {
                    DispatchError::Template(format!("unknown template '{}'", name))
                })?;
                let empty = HashMap::new();
                let data = request.template_data.as_ref().unwrap_or(&empty);
                Ok(substitute(template.value(), data))
            }
            None => Ok(request.content.clone().unwrap_or_default()),
        }
    }
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Substitute `{{key}}` placeholders with their values.
///
/// Placeholders without a matching key are left in place.
fn substitute(template: &str, variables: &HashMap<String, String>) -> String {
    let mut result = template.to_string();

    for (key, value) in variables {
        let pattern = format!("{{{{{}}}}}", key);
        result = result.replace(&pattern, value);
    }

    result
}
