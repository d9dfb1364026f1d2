use crate::error::{DataShapeError, Result};
use regex::Regex;

/// Renders an access-control condition template into a store-ready fragment.
///
/// Condition strings in schema documents are opaque templates; the engine
/// renders them against the target alias and the caller identity before they
/// ever reach a persister. An empty render result drops the condition.
pub trait ConditionRenderer {
    fn render(&self, condition: &str, alias: &str) -> Result<String>;
}

/// Reference renderer substituting `{{ alias }}`, `{{ user }}` and
/// `{{ user_id }}` placeholders. Unknown placeholders are an error rather
/// than silently rendering into a broken query fragment.
pub struct PlaceholderRenderer {
    user: Option<String>,
    user_id: Option<String>,
    pattern: Regex,
}

impl PlaceholderRenderer {
    pub fn new(user: Option<String>, user_id: Option<String>) -> PlaceholderRenderer {
        PlaceholderRenderer {
            user,
            user_id,
            pattern: placeholder_pattern(),
        }
    }

    /// Renderer for an unauthenticated caller.
    pub fn anonymous() -> PlaceholderRenderer {
        PlaceholderRenderer::new(None, None)
    }
}

fn placeholder_pattern() -> Regex {
    // Compiled once per renderer; the pattern itself is a constant.
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap()
}

impl ConditionRenderer for PlaceholderRenderer {
    fn render(&self, condition: &str, alias: &str) -> Result<String> {
        let mut error: Option<DataShapeError> = None;

        let rendered = self.pattern.replace_all(condition, |caps: &regex::Captures| {
            let name = &caps[1];
            match name {
                "alias" => alias.to_string(),
                "user" => self.user.clone().unwrap_or_default(),
                "user_id" => self.user_id.clone().unwrap_or_default(),
                unknown => {
                    if error.is_none() {
                        error = Some(DataShapeError::InvalidQuery(format!(
                            "unknown condition placeholder \"{unknown}\""
                        )));
                    }
                    String::new()
                }
            }
        });

        match error {
            Some(err) => Err(err),
            None => Ok(rendered.trim().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_alias_and_user() {
        let renderer =
            PlaceholderRenderer::new(Some("ada".to_string()), Some("7".to_string()));
        let rendered = renderer
            .render("{{ alias }}.owner_id = {{ user_id }}", "articles")
            .unwrap();
        assert_eq!(rendered, "articles.owner_id = 7");
    }

    #[test]
    fn test_anonymous_renders_empty_identity() {
        let renderer = PlaceholderRenderer::anonymous();
        let rendered = renderer.render("{{ user_id }}", "t").unwrap();
        assert_eq!(rendered, "");
    }

    #[test]
    fn test_unknown_placeholder_is_error() {
        let renderer = PlaceholderRenderer::anonymous();
        let err = renderer.render("{{ tenant }} = 1", "t").unwrap_err();
        assert!(matches!(err, DataShapeError::InvalidQuery(_)));
    }

    #[test]
    fn test_whitespace_tolerant() {
        let renderer = PlaceholderRenderer::anonymous();
        let rendered = renderer.render("{{alias}}.enabled = 1", "t").unwrap();
        assert_eq!(rendered, "t.enabled = 1");
    }
}
