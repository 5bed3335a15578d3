//! `${name}` command templating
//!
//! Substitutes recipe argument values into command strings. Substitution is
//! left-to-right and non-recursive: a substituted value is never re-scanned.
//! Any reference left unresolved after substitution fails the whole render,
//! so a typo like `${hsot}` is caught before anything is sent to a host.

use crate::Recipe;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Error types for command templating
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    /// One or more `${...}` references have no matching argument
    #[error("unresolved substitution: {}", .0.join(", "))]
    Unresolved(Vec<String>),
    /// A `${` was never closed
    #[error("unterminated ${{ in command: {0}")]
    Unterminated(String),
}

/// Render a recipe's command list with all argument substitutions applied.
///
/// `flag_values` maps argument names to the values given on the command
/// line; an empty flag value means the flag was not provided and the recipe
/// default applies.
pub fn render_commands(
    recipe: &Recipe,
    flag_values: &HashMap<String, String>,
) -> Result<Vec<String>, TemplateError> {
    let mut values = BTreeMap::new();
    for (name, arg) in &recipe.args {
        let flag = flag_values.get(name).map(String::as_str);
        values.insert(name.clone(), arg.effective_value(flag).to_string());
    }

    let mut missing = BTreeSet::new();
    let mut rendered = Vec::with_capacity(recipe.exec.len());
    for command in &recipe.exec {
        rendered.push(substitute(command, &values, &mut missing)?);
    }

    if missing.is_empty() {
        Ok(rendered)
    } else {
        Err(TemplateError::Unresolved(missing.into_iter().collect()))
    }
}

/// Substitute known references in one command, collecting unknown names.
fn substitute(
    command: &str,
    values: &BTreeMap<String, String>,
    missing: &mut BTreeSet<String>,
) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(command.len());
    let mut rest = command;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 2..];
        let Some(end) = tail.find('}') else {
            return Err(TemplateError::Unterminated(command.to_string()));
        };
        let name = &tail[..end];
        match values.get(name) {
            Some(value) => out.push_str(value),
            None => {
                missing.insert(name.to_string());
                // Leave the token in place; the render fails afterwards.
                out.push_str(&rest[start..start + 2 + end + 1]);
            }
        }
        rest = &tail[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RecipeArg;

    fn recipe_with(exec: &[&str], args: &[(&str, &str)]) -> Recipe {
        let mut recipe = Recipe::default();
        recipe.exec = exec.iter().map(|s| s.to_string()).collect();
        for (name, value) in args {
            recipe.args.insert(
                name.to_string(),
                RecipeArg {
                    name: name.to_string(),
                    value: value.to_string(),
                    help: String::new(),
                },
            );
        }
        recipe
    }

    #[test]
    fn substitutes_default_value() {
        let recipe = recipe_with(&["echo hello ${name}"], &[("name", "world")]);
        let rendered = render_commands(&recipe, &HashMap::new()).unwrap();
        assert_eq!(rendered, vec!["echo hello world"]);
    }

    #[test]
    fn flag_override_wins() {
        let recipe = recipe_with(&["echo hello ${name}"], &[("name", "world")]);
        let flags = HashMap::from([("name".to_string(), "Alice".to_string())]);
        let rendered = render_commands(&recipe, &flags).unwrap();
        assert_eq!(rendered, vec!["echo hello Alice"]);
    }

    #[test]
    fn empty_flag_means_not_provided() {
        let recipe = recipe_with(&["echo ${name}"], &[("name", "world")]);
        let flags = HashMap::from([("name".to_string(), String::new())]);
        let rendered = render_commands(&recipe, &flags).unwrap();
        assert_eq!(rendered, vec!["echo world"]);
    }

    #[test]
    fn empty_default_substitutes_empty_string() {
        let recipe = recipe_with(&["echo [${name}]"], &[("name", "")]);
        let rendered = render_commands(&recipe, &HashMap::new()).unwrap();
        assert_eq!(rendered, vec!["echo []"]);
    }

    #[test]
    fn unresolved_reference_lists_every_missing_name() {
        let recipe = recipe_with(&["echo ${missing} ${also}"], &[]);
        let err = render_commands(&recipe, &HashMap::new()).unwrap_err();
        assert_eq!(
            err,
            TemplateError::Unresolved(vec!["also".to_string(), "missing".to_string()])
        );
    }

    #[test]
    fn unterminated_reference_is_a_parse_error() {
        let recipe = recipe_with(&["echo ${name"], &[("name", "world")]);
        let err = render_commands(&recipe, &HashMap::new()).unwrap_err();
        assert!(matches!(err, TemplateError::Unterminated(_)));
    }

    #[test]
    fn substitution_is_not_recursive() {
        let recipe = recipe_with(&["echo ${a}"], &[("a", "${b}"), ("b", "nope")]);
        let rendered = render_commands(&recipe, &HashMap::new()).unwrap();
        assert_eq!(rendered, vec!["echo ${b}"]);
    }

    #[test]
    fn multiple_references_substitute_left_to_right() {
        let recipe = recipe_with(
            &["deploy ${service} to ${env}"],
            &[("service", "mail"), ("env", "prod")],
        );
        let rendered = render_commands(&recipe, &HashMap::new()).unwrap();
        assert_eq!(rendered, vec!["deploy mail to prod"]);
    }
}
