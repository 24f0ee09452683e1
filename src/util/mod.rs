#![allow(clippy::module_name_repetitions)]
//! Small utilities: shell escaping, process execution, unique ids, cache path helpers.

pub mod exec;
pub mod fs;
pub mod id;

pub use exec::{ExecOutput, ExecRequest, ExecService};

pub fn shell_join(args: &[String]) -> String {
    args.iter()
        .map(|a| shell_escape(a))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn shell_escape(s: &str) -> String {
    if s.is_empty() {
        "''".to_string()
    } else if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_=./:@".contains(c))
    {
        s.to_string()
    } else {
        let escaped = s.replace('\'', "'\"'\"'");
        format!("'{}'", escaped)
    }
}

/// Join a program and its (already shell-formatted) argument string with a single space,
/// omitting the separator when there are no arguments.
pub fn join_command(program: &str, args: &str) -> String {
    let args = args.trim();
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{program} {args}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_escape_simple() {
        assert_eq!(shell_escape("abc-123_./:@"), "abc-123_./:@");
    }

    #[test]
    fn test_shell_escape_with_spaces_and_quotes() {
        assert_eq!(shell_escape("a b c"), "'a b c'");
        assert_eq!(shell_escape("O'Reilly"), "'O'\"'\"'Reilly'");
        assert_eq!(shell_escape("{{.ID}}"), "'{{.ID}}'");
    }

    #[test]
    fn test_shell_join() {
        let args = vec!["a".to_string(), "b c".to_string(), "d".to_string()];
        assert_eq!(shell_join(&args), "a 'b c' d");
    }

    #[test]
    fn test_join_command_without_args() {
        assert_eq!(join_command("ansible", ""), "ansible");
        assert_eq!(join_command("ansible", "  --version "), "ansible --version");
    }
}
