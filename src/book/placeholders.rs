//! Placeholder substitution for task names and commands.
//!
//! Each declared variable replaces the literal token `{{ name }}` (one space
//! inside each brace pair). Variables are applied in declaration order on the
//! running text, so a later variable also sees tokens introduced by an earlier
//! value. There is no escaping.

use super::{Meshbook, Variable};

/// Build the literal token for a variable name
pub fn token(name: &str) -> String {
    format!("{{{{ {name} }}}}")
}

/// Apply every variable, in order, to `text`
pub fn expand_str(text: &str, variables: &[Variable]) -> String {
    variables.iter().fold(text.to_string(), |acc, var| {
        acc.replace(&token(&var.name), &var.value)
    })
}

/// Substitute the meshbook's variables into every task's name and command.
///
/// A meshbook without a `variables` key is returned unchanged.
pub fn expand(mut meshbook: Meshbook) -> Meshbook {
    let Some(variables) = meshbook.variables.as_deref() else {
        return meshbook;
    };

    let tasks = meshbook
        .tasks
        .iter()
        .map(|task| super::Task {
            name: expand_str(&task.name, variables),
            command: expand_str(&task.command, variables),
        })
        .collect();
    meshbook.tasks = tasks;
    meshbook
}
