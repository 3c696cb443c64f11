//! Latest-schema policy model.
//!
//! This is the only representation evaluation logic ever sees; older
//! on-disk versions are upgraded by `migrate` before deserialization.
//! Field defaults here are the schema's default-injection rules.

use crate::condition::{Condition, NumCmp, StringList};
use serde::{Deserialize, Serialize};
use std::fmt;
use vpo_inspect::ContainerKind;

fn default_true() -> bool {
    true
}

fn default_minimum() -> usize {
    1
}

/// Phase names may not shadow top-level document keys.
pub const RESERVED_PHASE_NAMES: &[&str] = &["config", "schema_version", "phases"];

/// A commentary pattern: a bare string is a regex; the tagged forms pick
/// the match style explicitly. All styles match case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommentaryPattern {
    Tagged(crate::condition::TitleMatch),
    Pattern(String),
}

impl CommentaryPattern {
    /// The regex source, when this pattern is regex-style.
    pub fn regex_source(&self) -> Option<&str> {
        match self {
            CommentaryPattern::Pattern(s) => Some(s),
            CommentaryPattern::Tagged(crate::condition::TitleMatch::Regex(s)) => Some(s),
            CommentaryPattern::Tagged(crate::condition::TitleMatch::Contains(_)) => None,
        }
    }

    /// The substring needle, when this pattern is contains-style.
    pub fn contains_needle(&self) -> Option<&str> {
        match self {
            CommentaryPattern::Tagged(crate::condition::TitleMatch::Contains(s)) => Some(s),
            _ => None,
        }
    }
}

/// Track-order vocabulary (§ track ordering).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackCategory {
    Video,
    AudioMain,
    AudioAlternate,
    AudioCommentary,
    SubtitleMain,
    SubtitleForced,
    SubtitleCommentary,
    Attachment,
}

impl TrackCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackCategory::Video => "video",
            TrackCategory::AudioMain => "audio_main",
            TrackCategory::AudioAlternate => "audio_alternate",
            TrackCategory::AudioCommentary => "audio_commentary",
            TrackCategory::SubtitleMain => "subtitle_main",
            TrackCategory::SubtitleForced => "subtitle_forced",
            TrackCategory::SubtitleCommentary => "subtitle_commentary",
            TrackCategory::Attachment => "attachment",
        }
    }
}

impl fmt::Display for TrackCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How an audio-filter result smaller than `minimum` is repaired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackMode {
    /// Also keep tracks matching the file's primary content language.
    ContentLanguage,
    /// Keep every audio track.
    KeepAll,
    /// Keep the first audio track by source index.
    KeepFirst,
    /// Emit a `Fail` action.
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackPolicy {
    pub mode: FallbackMode,
}

/// Audio track filtering (`audio_filter`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AudioFilterPolicy {
    /// Ordered language preference; empty keeps any language.
    #[serde(default)]
    pub languages: Vec<String>,
    /// Minimum number of kept tracks before fallback applies.
    #[serde(default = "default_minimum")]
    pub minimum: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackPolicy>,
    // Music / SFX / non-speech classification handling.
    #[serde(default = "default_true")]
    pub keep_music_tracks: bool,
    #[serde(default = "default_true")]
    pub exclude_music_from_language_filter: bool,
    #[serde(default = "default_true")]
    pub keep_sfx_tracks: bool,
    #[serde(default = "default_true")]
    pub exclude_sfx_from_language_filter: bool,
    #[serde(default = "default_true")]
    pub keep_non_speech_tracks: bool,
    #[serde(default = "default_true")]
    pub exclude_non_speech_from_language_filter: bool,
}

/// Subtitle track filtering (`subtitle_filter`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SubtitleFilterPolicy {
    #[serde(default)]
    pub remove_all: bool,
    #[serde(default)]
    pub languages: Vec<String>,
    /// Keep every forced subtitle regardless of language.
    #[serde(default)]
    pub preserve_forced: bool,
}

/// Attachment filtering (`attachment_filter`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AttachmentFilterPolicy {
    #[serde(default)]
    pub remove_all: bool,
}

/// Default/forced flag management (`default_flags`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DefaultFlagsPolicy {
    #[serde(default)]
    pub set_first_video_default: bool,
    #[serde(default)]
    pub set_preferred_audio_default: bool,
    /// When set, the preferred audio default must also use one of these codecs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_audio_codec: Option<StringList>,
    #[serde(default)]
    pub set_preferred_subtitle_default: bool,
    #[serde(default)]
    pub set_subtitle_default_when_audio_differs: bool,
    #[serde(default)]
    pub set_subtitle_forced_when_audio_differs: bool,
    #[serde(default)]
    pub clear_other_defaults: bool,
}

/// Rule-set matching discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Stop after the first rule whose `when` evaluates true.
    #[default]
    First,
    /// Process every rule.
    All,
}

/// A conditional rule: `when` guards `then`, with an optional `else`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    pub when: Condition,
    pub then: Vec<crate::action::Action>,
    #[serde(
        default,
        rename = "else",
        skip_serializing_if = "Option::is_none"
    )]
    pub otherwise: Option<Vec<crate::action::Action>>,
}

/// `{match: first|all, items: [...]}` (V13 shape).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RuleSet {
    #[serde(default, rename = "match")]
    pub match_mode: MatchMode,
    #[serde(default)]
    pub items: Vec<Rule>,
}

/// One criterion for synthesis source selection; present fields are ANDed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SourceCriterion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_commentary: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<NumCmp>,
}

/// Skip a synthesis when a surviving track already matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SkipIfExists {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<NumCmp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_commentary: Option<bool>,
}

/// Insertion point of a synthesized track among surviving audio tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SynthPosition {
    Named(NamedSynthPosition),
    Index(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamedSynthPosition {
    End,
    AfterSource,
}

impl Default for SynthPosition {
    fn default() -> Self {
        SynthPosition::Named(NamedSynthPosition::End)
    }
}

/// Specification of a synthesized audio track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisSpec {
    /// Track name; must not contain path separators.
    pub name: String,
    pub codec: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u32>,
    /// Literal language code, or `"inherit"` to copy from the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Literal title, or `"inherit"` to copy from the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<String>,
    /// ANDed criteria selecting the source track.
    #[serde(default)]
    pub source_prefer: Vec<SourceCriterion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_if_exists: Option<SkipIfExists>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_if: Option<Condition>,
    #[serde(default)]
    pub position: SynthPosition,
}

/// Video transcode quality selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityMode {
    Crf,
    Bitrate,
    ConstrainedQuality,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityPolicy {
    pub mode: QualityMode,
    /// Required in `crf` mode, range 0..=51.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crf: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_bitrate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bitrate: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_resolution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HwAccelPolicy {
    pub backend: String,
    /// The execution adapter may fall back to CPU when the backend is
    /// unavailable at runtime; planning never falls back on its own.
    #[serde(default = "default_true")]
    pub fallback_to_cpu: bool,
}

/// Skip conditions for a video transcode; present fields are ANDed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct VideoSkipIf {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec_matches: Option<StringList>,
    /// Named resolution bucket, e.g. "1080p"; max width and height.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_within: Option<String>,
    /// Bitrate string like "5M" or "2500k".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitrate_under: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct VideoTranscodePolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_codec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_if: Option<VideoSkipIf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaling: Option<ScalingPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_acceleration: Option<HwAccelPolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AudioTranscodePolicy {
    /// Codecs stream-copied untouched.
    #[serde(default)]
    pub preserve_codecs: Vec<String>,
    pub transcode_to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcode_bitrate: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TranscodePolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<VideoTranscodePolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioTranscodePolicy>,
}

/// What to do when a track cannot be carried into the target container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OnIncompatible {
    #[default]
    Error,
    Skip,
    Transcode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerPolicy {
    pub target: ContainerKind,
    #[serde(default)]
    pub on_incompatible: OnIncompatible,
    #[serde(default = "default_true")]
    pub preserve_metadata: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionPolicy {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

/// Per-phase error discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OnErrorMode {
    /// Discard the failing phase's actions and continue.
    #[default]
    Skip,
    /// The whole plan fails.
    Stop,
    /// Keep actions planned before the failure, then continue.
    Continue,
}

/// Execution-wide options (`config`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub on_error: OnErrorMode,
}

/// The operation sections a phase may enable. Also the legacy top-level
/// shape for pre-V11 documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PhaseOps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<ContainerPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_filter: Option<AudioFilterPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle_filter: Option<SubtitleFilterPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_filter: Option<AttachmentFilterPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_order: Option<Vec<TrackCategory>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_flags: Option<DefaultFlagsPolicy>,
    /// `conditional` is the legacy alias for `rules`.
    #[serde(
        default,
        alias = "conditional",
        skip_serializing_if = "Option::is_none"
    )]
    pub rules: Option<RuleSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_synthesis: Option<Vec<SynthesisSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcode: Option<TranscodePolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcription: Option<TranscriptionPolicy>,
}

impl PhaseOps {
    pub fn is_empty(&self) -> bool {
        self == &PhaseOps::default()
    }
}

/// A named group of operations executed against the virtual view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    #[serde(flatten)]
    pub ops: PhaseOps,
}

/// The latest-schema policy document. After loading, `phases` always
/// holds the execution sequence: pre-V11 documents get a single
/// synthetic phase built from their top-level sections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub audio_language_preference: Vec<String>,
    #[serde(default)]
    pub subtitle_language_preference: Vec<String>,
    #[serde(default)]
    pub commentary_patterns: Vec<CommentaryPattern>,
    #[serde(default)]
    pub config: ExecutionConfig,
    #[serde(default)]
    pub phases: Vec<Phase>,
    /// Legacy top-level operation sections (pre-V11 shape). Emptied into
    /// a synthetic phase during load normalization.
    #[serde(flatten)]
    pub top_level: PhaseOps,
}

impl Policy {
    /// Name used for the synthetic phase wrapping legacy top-level ops.
    pub const SYNTHETIC_PHASE: &'static str = "main";

    /// Move legacy top-level sections into a synthetic phase. No-op when
    /// the document already declares phases.
    pub fn normalize_phases(&mut self) {
        if self.phases.is_empty() && !self.top_level.is_empty() {
            self.phases.push(Phase {
                name: Self::SYNTHETIC_PHASE.to_string(),
                ops: std::mem::take(&mut self.top_level),
            });
        }
    }

    /// Iterate every rule set in the policy with its dotted path.
    pub fn rule_sets(&self) -> impl Iterator<Item = (String, &RuleSet)> {
        self.phases.iter().enumerate().filter_map(|(i, phase)| {
            phase
                .ops
                .rules
                .as_ref()
                .map(|rs| (format!("phases[{}].rules", i), rs))
        })
    }
}

/// Maximum width and height of a named resolution bucket.
pub fn resolution_bucket(name: &str) -> Option<(u32, u32)> {
    match name.to_lowercase().as_str() {
        "480p" => Some((854, 480)),
        "576p" => Some((1024, 576)),
        "720p" => Some((1280, 720)),
        "1080p" => Some((1920, 1080)),
        "1440p" => Some((2560, 1440)),
        "2160p" | "4k" => Some((3840, 2160)),
        _ => None,
    }
}

/// Parse a bitrate string like `5M`, `2500k` or `800000` into bits per
/// second. Case-insensitive suffixes; decimal multipliers.
pub fn parse_bitrate(text: &str) -> Option<u64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let (digits, multiplier) = match text.chars().last() {
        Some('k') | Some('K') => (&text[..text.len() - 1], 1_000u64),
        Some('m') | Some('M') => (&text[..text.len() - 1], 1_000_000u64),
        Some('g') | Some('G') => (&text[..text.len() - 1], 1_000_000_000u64),
        _ => (text, 1u64),
    };
    let value: f64 = digits.trim().parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some((value * multiplier as f64).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitrate_strings_parse_to_bits_per_second() {
        assert_eq!(parse_bitrate("5M"), Some(5_000_000));
        assert_eq!(parse_bitrate("2500k"), Some(2_500_000));
        assert_eq!(parse_bitrate("800000"), Some(800_000));
        assert_eq!(parse_bitrate("1.5M"), Some(1_500_000));
        assert_eq!(parse_bitrate("fast"), None);
        assert_eq!(parse_bitrate(""), None);
    }

    #[test]
    fn resolution_buckets_cover_common_names() {
        assert_eq!(resolution_bucket("1080p"), Some((1920, 1080)));
        assert_eq!(resolution_bucket("4K"), Some((3840, 2160)));
        assert_eq!(resolution_bucket("8000p"), None);
    }

    #[test]
    fn legacy_top_level_becomes_synthetic_phase() {
        let yaml = r#"
schema_version: 13
audio_filter:
  languages: [eng]
subtitle_filter:
  remove_all: true
"#;
        let mut policy: Policy = serde_yaml::from_str(yaml).unwrap();
        policy.normalize_phases();
        assert_eq!(policy.phases.len(), 1);
        assert_eq!(policy.phases[0].name, Policy::SYNTHETIC_PHASE);
        assert!(policy.phases[0].ops.audio_filter.is_some());
        assert!(policy.top_level.is_empty());
    }

    #[test]
    fn phases_shape_parses() {
        let yaml = r#"
schema_version: 13
config:
  on_error: stop
phases:
  - name: cleanup
    audio_filter:
      languages: [eng, jpn]
  - name: finish
    track_order: [video, audio_main, subtitle_main]
"#;
        let policy: Policy = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(policy.config.on_error, OnErrorMode::Stop);
        assert_eq!(policy.phases.len(), 2);
        assert_eq!(
            policy.phases[1].ops.track_order.as_ref().unwrap(),
            &vec![
                TrackCategory::Video,
                TrackCategory::AudioMain,
                TrackCategory::SubtitleMain
            ]
        );
    }

    #[test]
    fn conditional_alias_maps_to_rules() {
        let yaml = r#"
schema_version: 13
phases:
  - name: main
    conditional:
      match: all
      items: []
"#;
        let policy: Policy = serde_yaml::from_str(yaml).unwrap();
        let rules = policy.phases[0].ops.rules.as_ref().unwrap();
        assert_eq!(rules.match_mode, MatchMode::All);
    }

    #[test]
    fn synth_position_accepts_named_and_index() {
        let end: SynthPosition = serde_yaml::from_str("end").unwrap();
        assert_eq!(end, SynthPosition::Named(NamedSynthPosition::End));
        let idx: SynthPosition = serde_yaml::from_str("2").unwrap();
        assert_eq!(idx, SynthPosition::Index(2));
    }
}
