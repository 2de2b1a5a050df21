//! Composite command lines joined by a fixed token.

use std::fmt;

use crate::command::{Environment, render_with_environment};
use crate::line::CommandLine;

/// The three ways command lines can be chained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainKind {
    /// `outer -- inner`, e.g. `sudo -- gem install bundler`.
    Wrapping,
    /// `first && second`: run the second only if the first succeeds.
    Prerequisite,
    /// `producer | consumer`.
    Pipeline,
}

impl ChainKind {
    /// Token placed between children when rendering.
    pub fn joiner(self) -> &'static str {
        match self {
            ChainKind::Wrapping => "--",
            ChainKind::Prerequisite => "&&",
            ChainKind::Pipeline => "|",
        }
    }
}

impl fmt::Display for ChainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.joiner())
    }
}

/// An ordered sequence of command lines of one [`ChainKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandChain {
    kind: ChainKind,
    children: Vec<CommandLine>,
    name: Option<String>,
}

impl CommandChain {
    pub fn new(kind: ChainKind) -> Self {
        Self {
            kind,
            children: Vec::new(),
            name: None,
        }
    }

    pub fn wrapping() -> Self {
        Self::new(ChainKind::Wrapping)
    }

    pub fn prerequisite() -> Self {
        Self::new(ChainKind::Prerequisite)
    }

    pub fn pipeline() -> Self {
        Self::new(ChainKind::Pipeline)
    }

    pub fn kind(&self) -> ChainKind {
        self.kind
    }

    pub fn children(&self) -> &[CommandLine] {
        &self.children
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Append a child.
    pub fn add(&mut self, child: impl Into<CommandLine>) -> &mut Self {
        self.children.push(child.into());
        self
    }

    /// Append a child, consuming and returning the chain.
    pub fn with(mut self, child: impl Into<CommandLine>) -> Self {
        self.add(child);
        self
    }

    /// The last child, which redirection operations are applied to.
    pub fn last_mut(&mut self) -> Option<&mut CommandLine> {
        self.children.last_mut()
    }

    /// Name of the chain; defaults to the last child's name.
    pub fn name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .or_else(|| self.children.last().and_then(CommandLine::name))
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = Some(name.into());
        self
    }

    /// A chain is runnable when it has children and every child is runnable.
    pub fn is_valid(&self) -> bool {
        !self.children.is_empty() && self.children.iter().all(CommandLine::is_valid)
    }

    /// Merge of every child's environment.
    ///
    /// Children are folded last to first, each merged over the accumulator,
    /// so the earliest child's value wins on a collision while every key from
    /// every child is present.
    pub fn environment(&self) -> Environment {
        self.children
            .iter()
            .rev()
            .fold(Environment::new(), |mut merged, child| {
                for (key, value) in child.environment().iter() {
                    merged.insert(key.clone(), value.clone());
                }
                merged
            })
    }

    /// Children's commands joined by the chain token. Environment is not
    /// embedded here; see [`CommandChain::string_format`].
    pub fn command(&self) -> String {
        let separator = format!(" {} ", self.kind.joiner());
        self.children
            .iter()
            .map(CommandLine::command)
            .collect::<Vec<_>>()
            .join(&separator)
    }

    pub fn string_format(&self) -> String {
        render_with_environment(&self.environment(), self.command())
    }
}
