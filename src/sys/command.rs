// src/sys/command.rs
//
// 🛡️ Zero-Trust: caller-supplied values never reach the command text. The
// builder writes only placeholder syntax; values travel through the child's
// environment and are bound there by the interpreter.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

pub(crate) const VARIABLE_PREFIX: &str = "SIGN_RELAY_";

static MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([A-Za-z0-9_]+)\}\}").expect("static marker regex"));

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("invalid parameter name '{0}'")]
    InvalidName(String),

    #[error("fragment references unbound marker '{0}'")]
    UnboundMarker(String),

    #[error("variable '{0}' is not referenced by its fragment")]
    UnusedVariable(String),
}

// ==============================================================================
// 1. Values
// ==============================================================================

/// A value bound to a command parameter.
pub enum Value {
    Plain(String),
    /// Never written to logs; decoded only when the child environment is built.
    Secret(SecretString),
}

impl Value {
    pub fn plain(value: impl Into<String>) -> Self {
        Value::Plain(value.into())
    }

    pub fn is_secret(&self) -> bool {
        matches!(self, Value::Secret(_))
    }

    fn expose(&self) -> &str {
        match self {
            Value::Plain(value) => value,
            Value::Secret(secret) => secret.expose_secret(),
        }
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Plain(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Plain(value.to_string())
    }
}

impl From<SecretString> for Value {
    fn from(value: SecretString) -> Self {
        Value::Secret(value)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Plain(value) => write!(f, "{value:?}"),
            Value::Secret(_) => f.write_str("[REDACTED]"),
        }
    }
}

// ==============================================================================
// 2. Dialects
// ==============================================================================

/// How the target interpreter spells switches and environment references.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `-Name`, `$env:VAR`, `@{ 'Key' = ... }`
    PowerShell,
    /// `--Name`, `"${VAR}"`, nested blocks flattened to `--Block.Key`
    Posix,
}

impl Dialect {
    pub fn placeholder(self, variable: &str) -> String {
        match self {
            Dialect::PowerShell => format!("$env:{variable}"),
            Dialect::Posix => format!("\"${{{variable}}}\""),
        }
    }

    pub fn switch(self, name: &str) -> String {
        match self {
            Dialect::PowerShell => format!("-{name}"),
            Dialect::Posix => format!("--{name}"),
        }
    }
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ==============================================================================
// 3. Command
// ==============================================================================

/// An external command and its parameter bindings.
///
/// Built once per operation, consumed once by an executor.
pub struct Command {
    text: String,
    variables: BTreeMap<String, Value>,
}

impl Command {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn variables(&self) -> &BTreeMap<String, Value> {
        &self.variables
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    /// Decoded `(name, value)` pairs for the child environment.
    ///
    /// Only an executor should call this, right before spawning.
    pub fn expose_environment(&self) -> impl Iterator<Item = (&str, &str)> {
        self.variables
            .iter()
            .map(|(name, value)| (name.as_str(), value.expose()))
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("text", &self.text)
            .field("variables", &self.variables)
            .finish()
    }
}

// ==============================================================================
// 4. Nested Blocks
// ==============================================================================

enum TableItem {
    Leaf(String, Value),
    Nested(String, Table),
    Bound(Value, Value),
}

/// A nested associative block, e.g. the request origin or user parameters.
///
/// Fixed keys are structural identifiers; bound keys are caller data and go
/// through the environment like any value.
#[derive(Default)]
pub struct Table {
    entries: Vec<TableItem>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.entries.push(TableItem::Leaf(key.to_string(), value.into()));
        self
    }

    pub fn nested(mut self, key: &str, table: Table) -> Self {
        self.entries.push(TableItem::Nested(key.to_string(), table));
        self
    }

    /// An entry whose key is itself caller-supplied.
    pub fn bound_entry(mut self, key: impl Into<Value>, value: impl Into<Value>) -> Self {
        self.entries.push(TableItem::Bound(key.into(), value.into()));
        self
    }

    /// Renders the block into a fragment with `{{marker}}` references plus the
    /// values those markers stand for.
    fn render(
        self,
        dialect: Dialect,
        path: &[String],
        extra: &mut Vec<(String, Value)>,
    ) -> Result<String, CommandError> {
        let mut parts = Vec::with_capacity(self.entries.len());

        for (index, item) in self.entries.into_iter().enumerate() {
            match item {
                TableItem::Leaf(key, value) => {
                    let entry_path = Self::child_path(path, &key)?;
                    let marker = entry_path.join("_");
                    parts.push(match dialect {
                        Dialect::PowerShell => format!("'{key}' = {{{{{marker}}}}}"),
                        Dialect::Posix => format!("--{} {{{{{marker}}}}}", entry_path.join(".")),
                    });
                    extra.push((marker, value));
                }
                TableItem::Nested(key, table) => {
                    let entry_path = Self::child_path(path, &key)?;
                    let inner = table.render(dialect, &entry_path, extra)?;
                    parts.push(match dialect {
                        Dialect::PowerShell => format!("'{key}' = {inner}"),
                        Dialect::Posix => inner,
                    });
                }
                TableItem::Bound(key, value) => {
                    let prefix = path.join("_");
                    let key_marker = format!("{prefix}_KEY_{index}");
                    let value_marker = format!("{prefix}_VALUE_{index}");
                    parts.push(match dialect {
                        Dialect::PowerShell => {
                            format!("({{{{{key_marker}}}}}) = {{{{{value_marker}}}}}")
                        }
                        Dialect::Posix => format!(
                            "--{} {{{{{key_marker}}}}}={{{{{value_marker}}}}}",
                            path.join(".")
                        ),
                    });
                    extra.push((key_marker, key));
                    extra.push((value_marker, value));
                }
            }
        }

        Ok(match dialect {
            Dialect::PowerShell => format!("@{{ {} }}", parts.join("; ")),
            Dialect::Posix => parts.join(" "),
        })
    }

    fn child_path(path: &[String], key: &str) -> Result<Vec<String>, CommandError> {
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CommandError::InvalidName(key.to_string()));
        }
        let mut child = path.to_vec();
        child.push(key.to_string());
        Ok(child)
    }
}

// ==============================================================================
// 5. Builder
// ==============================================================================

/// Assembles a [`Command`] without ever writing a bound value into its text.
///
/// Errors are deferred to [`CommandBuilder::build`] so calls can be chained.
pub struct CommandBuilder {
    dialect: Dialect,
    text: String,
    variables: BTreeMap<String, Value>,
    error: Option<CommandError>,
}

impl CommandBuilder {
    /// Starts from a structural template, e.g. the name of the cmdlet to invoke.
    pub fn start(dialect: Dialect, template: &str) -> Self {
        Self {
            dialect,
            text: template.to_string(),
            variables: BTreeMap::new(),
            error: None,
        }
    }

    /// Adds a bare switch.
    pub fn append_flag(&mut self, name: &str) -> &mut Self {
        if self.check_name(name) {
            self.text.push(' ');
            self.text.push_str(&self.dialect.switch(name));
        }
        self
    }

    /// Adds `name` bound to a fresh placeholder; `value` goes to the environment.
    pub fn append_parameter(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        if self.check_name(name) {
            let variable = self.bind(name, value.into());
            let rendered = format!(
                " {} {}",
                self.dialect.switch(name),
                self.dialect.placeholder(&variable)
            );
            self.text.push_str(&rendered);
        }
        self
    }

    /// Binds the parameter only when a value is present; absent stays absent.
    pub fn append_optional_parameter<V: Into<Value>>(
        &mut self,
        name: &str,
        value: Option<V>,
    ) -> &mut Self {
        if let Some(value) = value {
            self.append_parameter(name, value);
        }
        self
    }

    /// Adds a structural fragment whose `{{marker}}` references are bound through `extra`.
    ///
    /// Every marker must have an entry in `extra` and every entry must be referenced.
    pub fn append_raw(&mut self, fragment: &str, extra: Vec<(String, Value)>) -> &mut Self {
        if self.error.is_some() {
            return self;
        }

        let mut bound: HashMap<String, String> = HashMap::with_capacity(extra.len());
        for (name, _) in &extra {
            if !is_identifier(name) {
                self.error = Some(CommandError::InvalidName(name.clone()));
                return self;
            }
        }
        for (name, _) in &extra {
            if !MARKER.captures_iter(fragment).any(|c| &c[1] == name.as_str()) {
                self.error = Some(CommandError::UnusedVariable(name.clone()));
                return self;
            }
        }
        if let Some(missing) = MARKER
            .captures_iter(fragment)
            .map(|c| c[1].to_string())
            .find(|marker| !extra.iter().any(|(name, _)| name == marker))
        {
            self.error = Some(CommandError::UnboundMarker(missing));
            return self;
        }

        for (name, value) in extra {
            let variable = self.bind(&name, value);
            bound.insert(name, variable);
        }

        let dialect = self.dialect;
        let rendered = MARKER.replace_all(fragment, |caps: &regex::Captures<'_>| {
            // Markers were checked against `extra` above.
            bound
                .get(&caps[1])
                .map(|variable| dialect.placeholder(variable))
                .unwrap_or_default()
        });

        self.text.push(' ');
        self.text.push_str(&rendered);
        self
    }

    /// Adds `name` followed by a nested associative block.
    pub fn append_table(&mut self, name: &str, table: Table) -> &mut Self {
        if !self.check_name(name) {
            return self;
        }

        let mut extra = Vec::new();
        let fragment = match table.render(self.dialect, &[name.to_string()], &mut extra) {
            Ok(fragment) => fragment,
            Err(e) => {
                self.error = Some(e);
                return self;
            }
        };

        let fragment = match self.dialect {
            Dialect::PowerShell => format!("{} {fragment}", self.dialect.switch(name)),
            Dialect::Posix => fragment,
        };
        self.append_raw(&fragment, extra)
    }

    /// # Errors
    /// Returns the first naming or marker problem recorded while building.
    pub fn build(self) -> Result<Command, CommandError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        Ok(Command {
            text: self.text,
            variables: self.variables,
        })
    }

    fn check_name(&mut self, name: &str) -> bool {
        if self.error.is_some() {
            return false;
        }
        if !is_identifier(name) {
            self.error = Some(CommandError::InvalidName(name.to_string()));
            return false;
        }
        true
    }

    /// Records `value` under a unique environment variable derived from `name`.
    fn bind(&mut self, name: &str, value: Value) -> String {
        let base = format!("{VARIABLE_PREFIX}{}", name.to_ascii_uppercase());
        let mut variable = base.clone();
        let mut suffix = 2;
        while self.variables.contains_key(&variable) {
            variable = format!("{base}_{suffix}");
            suffix += 1;
        }
        self.variables.insert(variable.clone(), value);
        variable
    }
}
