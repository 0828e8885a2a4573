//! Cassandra configuration document
//!
//! A line-preserving view of `cassandra.yaml`. Only the fields the hooks
//! manage are parsed and rewritten; every other line, comments included,
//! is carried through unchanged.

use crate::error::{Error, Result};

const SEEDS_FIELD: &str = "seeds:";

const DEFAULT_SEED_PROVIDER: &str = "org.apache.cassandra.locator.SimpleSeedProvider";

/// Editable `cassandra.yaml`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CassandraYaml {
    lines: Vec<String>,
    trailing_newline: bool,
}

impl CassandraYaml {
    pub fn parse(text: &str) -> Self {
        Self {
            lines: text.lines().map(String::from).collect(),
            trailing_newline: text.is_empty() || text.ends_with('\n'),
        }
    }

    /// Raw value of a top-level scalar key, comments stripped
    pub fn get(&self, key: &str) -> Option<&str> {
        let line = &self.lines[self.find_key(key)?];
        let value = line[key.len() + 1..].trim();
        Some(strip_comment(value))
    }

    /// Set a top-level scalar key, appending it when missing
    pub fn set(&mut self, key: &str, value: &str) {
        let line = format!("{}: {}", key, value);
        match self.find_key(key) {
            Some(idx) => self.lines[idx] = line,
            None => self.lines.push(line),
        }
    }

    /// Seed addresses from the seed provider parameters
    pub fn seeds(&self) -> Option<Vec<String>> {
        let idx = self.find_seeds()?;
        let line = &self.lines[idx];
        let start = line.find(SEEDS_FIELD)? + SEEDS_FIELD.len();
        let value = strip_comment(line[start..].trim()).trim_matches(|c| c == '"' || c == '\'');
        Some(
            value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
        )
    }

    /// Replace the seed list; adds a simple seed provider block when the
    /// document has none
    pub fn set_seeds(&mut self, seeds: &[String]) -> Result<()> {
        let joined = seeds.join(",");
        match self.find_seeds() {
            Some(idx) => {
                let line = &self.lines[idx];
                let prefix_len = line.find(SEEDS_FIELD).unwrap_or(0);
                let prefix = line[..prefix_len].to_string();
                self.lines[idx] = format!("{}{} \"{}\"", prefix, SEEDS_FIELD, joined);
                Ok(())
            }
            None if self.find_key("seed_provider").is_none() => {
                self.lines.push("seed_provider:".to_string());
                self.lines.push(format!("  - class_name: {}", DEFAULT_SEED_PROVIDER));
                self.lines.push("    parameters:".to_string());
                self.lines.push(format!("      - {} \"{}\"", SEEDS_FIELD, joined));
                Ok(())
            }
            None => Err(Error::ServiceConfig(
                "seed_provider has no seeds parameter".to_string(),
            )),
        }
    }

    fn find_key(&self, key: &str) -> Option<usize> {
        self.lines.iter().position(|line| top_level_key(line) == Some(key))
    }

    fn find_seeds(&self) -> Option<usize> {
        self.lines.iter().position(|line| {
            let trimmed = line.trim_start();
            let trimmed = trimmed.strip_prefix("- ").unwrap_or(trimmed).trim_start();
            !line.starts_with(|c: char| !c.is_whitespace()) && trimmed.starts_with(SEEDS_FIELD)
        })
    }
}

impl std::fmt::Display for CassandraYaml {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.lines.join("\n"))?;
        if self.trailing_newline && !self.lines.is_empty() {
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Key of an unindented `key: value` line
fn top_level_key(line: &str) -> Option<&str> {
    if line.starts_with(|c: char| c.is_whitespace() || c == '#' || c == '-') {
        return None;
    }
    let (key, _) = line.split_once(':')?;
    if !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Some(key)
    } else {
        None
    }
}

/// Drop a trailing ` # comment` outside of quotes
fn strip_comment(value: &str) -> &str {
    let mut quote = None;
    for (i, c) in value.char_indices() {
        match (quote, c) {
            (None, '\'' | '"') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (None, '#') if i == 0 || value[..i].ends_with(char::is_whitespace) => {
                return value[..i].trim_end();
            }
            _ => {}
        }
    }
    value
}

/// Single-quoted YAML scalar
pub fn single_quoted(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
