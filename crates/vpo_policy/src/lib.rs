//! Versioned policy schema for VPO.
//!
//! A policy is a tagged hierarchical document (YAML on disk) carrying a
//! `schema_version`. The loader upgrades any supported older version to
//! the latest internal representation before anything downstream sees it:
//! older shapes never leak into evaluation logic.
//!
//! Load pipeline: parse -> upgrade (V1..V13 migrations) -> unknown-field
//! warnings -> deserialize -> normalize phases -> validate.

pub mod action;
pub mod condition;
pub mod error;
pub mod load;
pub mod migrate;
pub mod model;
pub mod validate;

pub use action::{expand_template, Action, SkipKind, TemplateContext, VideoTranscodeParams};
pub use condition::{CmpOp, Condition, MetaOp, NumCmp, StringList, TitleMatch, TrackFilters};
pub use error::{LoadWarning, PolicyError, Result};
pub use load::{load_policy_str, load_policy_value, LoadedPolicy};
pub use migrate::{upgrade_to_latest, LATEST_SCHEMA_VERSION};
pub use model::{
    parse_bitrate, resolution_bucket, AttachmentFilterPolicy, AudioFilterPolicy,
    AudioTranscodePolicy, CommentaryPattern, ContainerPolicy, DefaultFlagsPolicy, ExecutionConfig,
    FallbackMode, FallbackPolicy, HwAccelPolicy, MatchMode, NamedSynthPosition, OnErrorMode,
    OnIncompatible, Phase, PhaseOps, Policy, QualityMode, QualityPolicy, Rule, RuleSet,
    ScalingPolicy, SkipIfExists, SourceCriterion, SubtitleFilterPolicy, SynthPosition,
    SynthesisSpec, TrackCategory, TranscodePolicy, TranscriptionPolicy, VideoSkipIf,
    VideoTranscodePolicy,
};
pub use validate::{validate_policy, MAX_BOOLEAN_DEPTH};
