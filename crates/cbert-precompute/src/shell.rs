//! Render a plan as an equivalent POSIX shell script.

use crate::plan::BatchPlan;
use crate::spec::IssuedCommand;

/// Quote a token for POSIX `sh`. Tokens made only of safe characters are
/// left bare. `=` is not safe: a bare `A=b` in command position is read as
/// an assignment, not a program.
pub fn shell_quote(token: &str) -> String {
    let safe = !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:,+@%".contains(c));
    if safe {
        token.to_string()
    } else {
        format!("'{}'", token.replace('\'', r"'\''"))
    }
}

/// One line: environment assignments, then the quoted argv.
pub fn render_command(command: &IssuedCommand) -> String {
    command
        .env
        .iter()
        .map(|(k, v)| format!("{}={}", k, shell_quote(v)))
        .chain(command.argv.iter().map(|t| shell_quote(t)))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn render_shell_script(plan: &BatchPlan) -> String {
    let mut out = String::from("#!/bin/sh\n");
    out.push_str(&format!("# plan digest: {}\n", plan.digest()));
    for command in plan.commands() {
        out.push_str(&render_command(&command));
        out.push('\n');
    }
    out
}
