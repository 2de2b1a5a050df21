use std::borrow::Cow;

use crate::command::Environment;
use crate::line::CommandLine;
use crate::redirect::Redirection;

/// A command line rendered as a single quoted shell word.
///
/// The wrapped line's full `string_format` (environment included) becomes one
/// argument, which is what `sh -c`, `ssh host` or `su -c` expect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellEscaped {
    inner: Box<CommandLine>,
    redirections: Vec<Redirection>,
    name: Option<String>,
}

impl ShellEscaped {
    pub fn new(inner: impl Into<CommandLine>) -> Self {
        Self {
            inner: Box::new(inner.into()),
            redirections: Vec::new(),
            name: None,
        }
    }

    pub fn inner(&self) -> &CommandLine {
        &self.inner
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref().or_else(|| self.inner.name())
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = Some(name.into());
        self
    }

    pub fn is_valid(&self) -> bool {
        self.inner.is_valid()
    }

    /// The escaped line carries no environment of its own; the inner
    /// assignments travel inside the quoted word.
    pub fn environment(&self) -> Environment {
        Environment::new()
    }

    pub fn redirections(&self) -> &[Redirection] {
        &self.redirections
    }

    pub(crate) fn push_redirection(&mut self, redirection: Redirection) {
        self.redirections.push(redirection);
    }

    pub fn command(&self) -> String {
        let quoted = shell_escape::unix::escape(Cow::Owned(self.inner.string_format()));
        std::iter::once(quoted.into_owned())
            .chain(self.redirections.iter().map(ToString::to_string))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn string_format(&self) -> String {
        self.command()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use pretty_assertions::assert_eq;

    #[test]
    fn quotes_inner_string_format() {
        let inner = Command::new("make")
            .with_args(["all"])
            .with_env("CC", "clang");
        let escaped = ShellEscaped::new(inner);
        assert_eq!(escaped.command(), "'CC=clang make all'");
        assert_eq!(escaped.name(), Some("make"));
        assert!(escaped.environment().is_empty());
    }

    #[test]
    fn escapes_embedded_single_quotes() {
        let escaped = ShellEscaped::new(Command::from_args(["echo", "it's"]));
        assert_eq!(escaped.command(), "'echo it'\\''s'");
    }

    #[test]
    fn usable_as_argument_of_another_command() {
        let inner = Command::from_args(["ls", "-la"]).pipe_to(["wc", "-l"]);
        let outer = Command::from_args(["sh", "-c"])
            .with_args([ShellEscaped::new(inner).command()]);
        assert_eq!(outer.command(), "sh -c 'ls -la | wc -l'");
    }
}
