//! Query template rendering (`spec.md` §6/§7): `{{ var }}` placeholders
//! substituted from a variable map, with strict undefined-variable
//! behavior — rendering never silently drops or blanks a placeholder.
//!
//! No templating crate appears anywhere in the example pack (teacher or
//! otherwise), and this substitution grammar is deliberately narrow (one
//! identifier per placeholder, no expressions/filters/control flow), so
//! it is hand-rolled here with `regex` rather than pulling in a
//! general-purpose template engine purely for `{{ name }}` lookup —
//! `spec.md` §9's "Template strictness" design note only asks for strict
//! undefined-variable errors, not a full template language.

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("undefined template variable '{0}'")]
    UndefinedVariable(String),
}

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap();
}

/// Render `text`, substituting every `{{ name }}` placeholder from
/// `vars`. Any placeholder whose name is absent from `vars` is a hard
/// error (`spec.md` §6: "rendering with any undeclared variable is a
/// hard error").
pub fn render(text: &str, vars: &HashMap<String, String>) -> Result<String, TemplateError> {
    let mut first_error = None;
    let rendered = PLACEHOLDER.replace_all(text, |caps: &regex::Captures| {
        let name = &caps[1];
        match vars.get(name) {
            Some(value) => value.clone(),
            None => {
                if first_error.is_none() {
                    first_error = Some(TemplateError::UndefinedVariable(name.to_string()));
                }
                String::new()
            }
        }
    });
    match first_error {
        Some(e) => Err(e),
        None => Ok(rendered.into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_a_declared_variable() {
        let mut vars = HashMap::new();
        vars.insert("id".to_string(), "5".to_string());
        let out = render("select * from t where id = {{ id }}", &vars).unwrap();
        assert_eq!(out, "select * from t where id = 5");
    }

    #[test]
    fn errors_on_an_undefined_variable() {
        let vars = HashMap::new();
        let err = render("select * from t where id = {{ id }}", &vars);
        assert!(matches!(err, Err(TemplateError::UndefinedVariable(name)) if name == "id"));
    }
}
