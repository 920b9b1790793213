//! Conventional-commit header parsing.
//!
//! Only the parts that decide a bump are read: the type, the `!` marker and
//! a `BREAKING CHANGE` footer. Scopes are parsed but carry no weight.

use super::BumpLevel;

/// The header of a conventional commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConventionalCommit<'a> {
    /// Commit type such as `feat` or `fix`.
    pub kind: &'a str,
    /// Optional scope in parentheses.
    pub scope: Option<&'a str>,
    /// Marked with `!` or a `BREAKING CHANGE` footer.
    pub breaking: bool,
    /// Text after the colon on the first line.
    pub description: &'a str,
}

impl<'a> ConventionalCommit<'a> {
    /// Parse a full commit message. Returns `None` when the first line is
    /// not of the form `type(scope)!: description`.
    pub fn parse(message: &'a str) -> Option<Self> {
        let header = message.lines().next()?.trim();
        let (prefix, description) = header.split_once(':')?;
        let description = description.trim();
        if description.is_empty() {
            return None;
        }

        let (prefix, bang) = match prefix.strip_suffix('!') {
            Some(rest) => (rest, true),
            None => (prefix, false),
        };
        let (kind, scope) = match prefix.split_once('(') {
            Some((kind, rest)) => (kind, Some(rest.strip_suffix(')')?)),
            None => (prefix, None),
        };
        if kind.is_empty() || !kind.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }

        Some(Self {
            kind,
            scope,
            breaking: bang || has_breaking_footer(message),
            description,
        })
    }

    /// The bump this commit asks for, if any.
    pub fn bump_level(&self) -> Option<BumpLevel> {
        if self.breaking {
            return Some(BumpLevel::Major);
        }
        match self.kind.to_ascii_lowercase().as_str() {
            "feat" => Some(BumpLevel::Minor),
            "fix" | "perf" => Some(BumpLevel::Patch),
            _ => None,
        }
    }
}

/// The bump level a commit message asks for.
///
/// `None` for messages that are not conventional commits and for types such
/// as `chore` or `docs` that do not ask for a release on their own.
pub fn bump_level_for(message: &str) -> Option<BumpLevel> {
    ConventionalCommit::parse(message)?.bump_level()
}

fn has_breaking_footer(message: &str) -> bool {
    message
        .lines()
        .skip(1)
        .any(|line| line.starts_with("BREAKING CHANGE:") || line.starts_with("BREAKING-CHANGE:"))
}
