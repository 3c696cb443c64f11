//! Condition AST for conditional rules.
//!
//! Conditions are a tree of tagged variants evaluated against an
//! inspection. Boolean composites (`and`/`or`/`not`) are bounded to two
//! levels of nesting; the bound is enforced at load, not at evaluation.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use vpo_inspect::TrackKind;

/// Comparison operator for counts and numeric track fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CmpOp {
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl CmpOp {
    pub fn compare_i64(&self, left: i64, right: i64) -> bool {
        match self {
            CmpOp::Eq => left == right,
            CmpOp::Lt => left < right,
            CmpOp::Lte => left <= right,
            CmpOp::Gt => left > right,
            CmpOp::Gte => left >= right,
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpOp::Eq => "eq",
            CmpOp::Lt => "lt",
            CmpOp::Lte => "lte",
            CmpOp::Gt => "gt",
            CmpOp::Gte => "gte",
        };
        write!(f, "{}", s)
    }
}

/// `{op, value}` comparison against a numeric track field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NumCmp {
    pub op: CmpOp,
    pub value: i64,
}

impl NumCmp {
    pub fn matches(&self, observed: i64) -> bool {
        self.op.compare_i64(observed, self.value)
    }
}

/// Operator for plugin/container metadata queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetaOp {
    Eq,
    Neq,
    Contains,
    Exists,
    Lt,
    Lte,
    Gt,
    Gte,
}

/// A single language/codec entry or a list of them. Matching is
/// any-of; comparisons are always lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StringList(pub Vec<String>);

impl StringList {
    pub fn contains_lowercase(&self, value: &str) -> bool {
        let value = value.to_lowercase();
        self.0.iter().any(|s| s.to_lowercase() == value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }
}

impl From<Vec<String>> for StringList {
    fn from(v: Vec<String>) -> Self {
        Self(v)
    }
}

impl<'de> Deserialize<'de> for StringList {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            One(String),
            Many(Vec<String>),
        }
        Ok(match Repr::deserialize(deserializer)? {
            Repr::One(s) => StringList(vec![s]),
            Repr::Many(v) => StringList(v),
        })
    }
}

/// Title predicate: case-insensitive substring or a (non-anchored)
/// Unicode-aware regex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TitleMatch {
    Contains(String),
    Regex(String),
}

/// Conjunctive predicates over a candidate track. Unset predicates are
/// vacuously true; a set predicate against a missing track field (e.g.
/// `channels` on a subtitle) is false.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TrackFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<StringList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<StringList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_default: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_forced: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_commentary: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<NumCmp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<NumCmp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<NumCmp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<TitleMatch>,
}

impl TrackFilters {
    pub fn is_empty(&self) -> bool {
        self == &TrackFilters::default()
    }
}

fn default_multilang_threshold() -> f64 {
    0.05
}

fn default_min_confidence() -> f64 {
    0.7
}

fn default_true() -> bool {
    true
}

/// Condition AST. Serialized externally tagged, e.g.
/// `exists: {track_kind: audio, filters: {language: jpn}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// Some track of the given kind satisfies the filters.
    Exists {
        track_kind: TrackKind,
        #[serde(default)]
        filters: TrackFilters,
    },
    /// `|matching tracks| op value`.
    Count {
        track_kind: TrackKind,
        #[serde(default)]
        filters: TrackFilters,
        op: CmpOp,
        value: i64,
    },
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
    /// Audio tracks span at least two languages, the least-represented
    /// having a share of at least `threshold`.
    AudioIsMultiLanguage {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        track_index: Option<usize>,
        #[serde(default = "default_multilang_threshold")]
        threshold: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        primary_language: Option<String>,
    },
    /// Plugin verdict: the file's audio is the original language track.
    IsOriginal {
        #[serde(default = "default_true")]
        value: bool,
        #[serde(default = "default_min_confidence")]
        min_confidence: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
    },
    /// Plugin verdict: the file's audio is a dub.
    IsDubbed {
        #[serde(default = "default_true")]
        value: bool,
        #[serde(default = "default_min_confidence")]
        min_confidence: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
    },
    /// Query a plugin-sourced metadata field.
    PluginMetadata {
        plugin: String,
        field: String,
        op: MetaOp,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<vpo_inspect::MetaValue>,
    },
    /// Query a container-level metadata tag.
    ContainerMetadata {
        field: String,
        op: MetaOp,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<vpo_inspect::MetaValue>,
    },
}

impl Condition {
    /// Depth of boolean composites along the deepest path. Leaves are
    /// depth 0; `not: {exists: ...}` is depth 1.
    pub fn boolean_depth(&self) -> usize {
        match self {
            Condition::And(children) | Condition::Or(children) => {
                1 + children
                    .iter()
                    .map(Condition::boolean_depth)
                    .max()
                    .unwrap_or(0)
            }
            Condition::Not(child) => 1 + child.boolean_depth(),
            _ => 0,
        }
    }

    /// Visit every condition node in the tree, self included.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Condition)) {
        visit(self);
        match self {
            Condition::And(children) | Condition::Or(children) => {
                for child in children {
                    child.walk(visit);
                }
            }
            Condition::Not(child) => child.walk(visit),
            _ => {}
        }
    }
}
