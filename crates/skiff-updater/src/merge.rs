//! Three-way merge of a shipped configuration template into the live
//! configuration.
//!
//! Documents are ordered `section -> key -> value` maps carried as TOML. Each
//! value records who owns it:
//!
//! ```toml
//! [server]
//! token = "abc123"                                  # set by the user
//! region = { default = "eu-west" }                  # shipped, untouched
//! api_key = { unset = true, hint = "from the portal" }  # must be filled in
//! ```
//!
//! In a template, plain strings are the shipped values. Merging never
//! overwrites a value the user set.

use std::fmt::Write as _;
use std::path::Path;

use thiserror::Error;

use crate::fsutil;

/// Errors reading or writing configuration documents.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("{document}: invalid TOML: {message}")]
    Parse { document: String, message: String },

    #[error("{document}: top-level key {key:?} is not a section")]
    NotASection { document: String, key: String },

    #[error("{document}: unsupported value for [{section}] {key}")]
    UnsupportedValue {
        document: String,
        section: String,
        key: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One configuration value and who owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// Shipped value the user never changed.
    Default(String),
    /// Value customized by the user.
    UserSet(String),
    /// Shipped placeholder that still has to be filled in.
    Unset { hint: Option<String> },
}

impl FieldValue {
    pub fn unset() -> Self {
        FieldValue::Unset { hint: None }
    }

    /// The concrete text, if any.
    pub fn text(&self) -> Option<&str> {
        match self {
            FieldValue::Default(s) | FieldValue::UserSet(s) => Some(s),
            FieldValue::Unset { .. } => None,
        }
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, FieldValue::Unset { .. })
    }

    /// The value a template ships, as it lands in a live document.
    fn shipped(&self) -> FieldValue {
        match self {
            FieldValue::Default(s) | FieldValue::UserSet(s) => FieldValue::Default(s.clone()),
            FieldValue::Unset { hint } => FieldValue::Unset { hint: hint.clone() },
        }
    }
}

/// A named, ordered group of keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub entries: Vec<(String, FieldValue)>,
}

impl Section {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    fn get_mut(&mut self, key: &str) -> Option<&mut FieldValue> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Replace the value of `key`, or append it.
    pub fn set(&mut self, key: impl Into<String>, value: FieldValue) {
        let key = key.into();
        match self.get_mut(&key) {
            Some(slot) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }
}

/// How plain strings and legacy placeholders are read.
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    /// Plain strings starting with this prefix are read as unset.
    pub legacy_placeholder_prefix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Live,
    Template,
}

/// An ordered configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDocument {
    sections: Vec<Section>,
}

impl ConfigDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    fn section_mut(&mut self, name: &str) -> Option<&mut Section> {
        self.sections.iter_mut().find(|s| s.name == name)
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&FieldValue> {
        self.section(section)?.get(key)
    }

    /// Set a value, creating the section if needed.
    pub fn set(&mut self, section: &str, key: &str, value: FieldValue) {
        match self.section_mut(section) {
            Some(s) => s.set(key, value),
            None => {
                let mut s = Section::new(section);
                s.set(key, value);
                self.sections.push(s);
            }
        }
    }

    pub fn push_section(&mut self, section: Section) {
        self.sections.push(section);
    }

    /// Parse a live document. Plain strings are user-set values.
    pub fn parse_live(text: &str, opts: &ParseOptions) -> Result<Self, MergeError> {
        parse(text, opts, Role::Live, "live configuration")
    }

    /// Parse a shipped template. Plain strings are shipped defaults.
    pub fn parse_template(text: &str, opts: &ParseOptions) -> Result<Self, MergeError> {
        parse(text, opts, Role::Template, "configuration template")
    }

    /// Load the live document at `path`; a missing file is an empty document.
    pub fn load_live(path: &Path, opts: &ParseOptions) -> Result<Self, MergeError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse_live(&text, opts),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn load_template(path: &Path, opts: &ParseOptions) -> Result<Self, MergeError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse_template(&text, opts)
    }

    /// Atomically write the document to `path`.
    pub fn save(&self, path: &Path) -> Result<(), MergeError> {
        fsutil::write_atomic(path, self.to_toml_string().as_bytes())?;
        Ok(())
    }

    /// Render as TOML, preserving section and key order.
    pub fn to_toml_string(&self) -> String {
        let mut out = String::new();
        for (i, section) in self.sections.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            let _ = writeln!(out, "[{}]", toml_key(&section.name));
            for (key, value) in &section.entries {
                let _ = writeln!(out, "{} = {}", toml_key(key), toml_value(value));
            }
        }
        out
    }
}

/// Counts of what a merge changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub added_sections: usize,
    pub added_keys: usize,
    pub filled_placeholders: usize,
    pub refreshed_defaults: usize,
}

impl MergeStats {
    pub fn changed(&self) -> bool {
        *self != MergeStats::default()
    }
}

/// Merge `template` into `live`.
///
/// Pure and idempotent: `merge(&merge(c, t), t) == merge(c, t)`.
pub fn merge(live: &ConfigDocument, template: &ConfigDocument) -> ConfigDocument {
    merge_with_stats(live, template).0
}

/// [`merge`], also reporting what changed.
pub fn merge_with_stats(
    live: &ConfigDocument,
    template: &ConfigDocument,
) -> (ConfigDocument, MergeStats) {
    let mut merged = live.clone();
    let mut stats = MergeStats::default();

    for shipped_section in &template.sections {
        if merged.section(&shipped_section.name).is_none() {
            let mut section = Section::new(shipped_section.name.clone());
            for (key, value) in &shipped_section.entries {
                section.set(key.clone(), value.shipped());
            }
            merged.sections.push(section);
            stats.added_sections += 1;
            continue;
        }
        let Some(section) = merged.section_mut(&shipped_section.name) else {
            continue;
        };

        for (key, shipped) in &shipped_section.entries {
            let shipped = shipped.shipped();
            let Some(current) = section.get_mut(key) else {
                section.entries.push((key.clone(), shipped));
                stats.added_keys += 1;
                continue;
            };

            let replace = match current {
                FieldValue::UserSet(_) => false,
                FieldValue::Unset { .. } => *current != shipped,
                FieldValue::Default(_) => !shipped.is_unset() && *current != shipped,
            };
            if !replace {
                continue;
            }
            if current.is_unset() && !shipped.is_unset() {
                stats.filled_placeholders += 1;
            } else {
                stats.refreshed_defaults += 1;
            }
            *current = shipped;
        }
    }

    (merged, stats)
}

fn parse(
    text: &str,
    opts: &ParseOptions,
    role: Role,
    document: &str,
) -> Result<ConfigDocument, MergeError> {
    let table: toml::Table = text.parse().map_err(|e: toml::de::Error| MergeError::Parse {
        document: document.to_string(),
        message: e.message().to_string(),
    })?;

    let mut doc = ConfigDocument::new();
    for (name, value) in table {
        let toml::Value::Table(entries) = value else {
            return Err(MergeError::NotASection {
                document: document.to_string(),
                key: name,
            });
        };

        let mut section = Section::new(name.clone());
        for (key, value) in entries {
            let field = parse_field(&value, opts, role).ok_or_else(|| {
                MergeError::UnsupportedValue {
                    document: document.to_string(),
                    section: name.clone(),
                    key: key.clone(),
                }
            })?;
            section.entries.push((key, field));
        }
        doc.sections.push(section);
    }
    Ok(doc)
}

fn parse_field(value: &toml::Value, opts: &ParseOptions, role: Role) -> Option<FieldValue> {
    if let toml::Value::Table(t) = value {
        if let Some(default) = t.get("default") {
            if t.len() != 1 {
                return None;
            }
            return scalar_text(default).map(FieldValue::Default);
        }
        if t.get("unset").and_then(toml::Value::as_bool) == Some(true) {
            let hint = match t.get("hint") {
                Some(h) => Some(h.as_str()?.to_string()),
                None => None,
            };
            let expected = 1 + usize::from(hint.is_some());
            if t.len() != expected {
                return None;
            }
            return Some(FieldValue::Unset { hint });
        }
        return None;
    }

    let text = scalar_text(value)?;
    if let (Some(prefix), toml::Value::String(_)) = (&opts.legacy_placeholder_prefix, value) {
        if !prefix.is_empty() && text.starts_with(prefix.as_str()) {
            return Some(FieldValue::unset());
        }
    }
    Some(match role {
        Role::Live => FieldValue::UserSet(text),
        Role::Template => FieldValue::Default(text),
    })
}

fn scalar_text(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        toml::Value::Datetime(d) => Some(d.to_string()),
        toml::Value::Array(_) | toml::Value::Table(_) => None,
    }
}

fn toml_key(key: &str) -> String {
    let bare = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if bare {
        key.to_string()
    } else {
        toml_string(key)
    }
}

fn toml_string(s: &str) -> String {
    toml::Value::String(s.to_string()).to_string()
}

fn toml_value(value: &FieldValue) -> String {
    match value {
        FieldValue::UserSet(s) => toml_string(s),
        FieldValue::Default(s) => format!("{{ default = {} }}", toml_string(s)),
        FieldValue::Unset { hint: None } => "{ unset = true }".to_string(),
        FieldValue::Unset { hint: Some(h) } => {
            format!("{{ unset = true, hint = {} }}", toml_string(h))
        }
    }
}
