//! Inspection payload types.
//!
//! These are the canonical enums and records used across all crates.
//! Track indices are stable source indices; codecs are canonicalized to
//! lowercase ASCII; languages are ISO 639-2/B codes with `und` for
//! unknown.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Language code used when a track declares no language.
pub const UNDETERMINED: &str = "und";

/// Container format of a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    Mkv,
    Mp4,
    Webm,
    #[default]
    Other,
}

impl ContainerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerKind::Mkv => "mkv",
            ContainerKind::Mp4 => "mp4",
            ContainerKind::Webm => "webm",
            ContainerKind::Other => "other",
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ContainerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mkv" | "matroska" => Ok(ContainerKind::Mkv),
            "mp4" | "m4v" | "mov" => Ok(ContainerKind::Mp4),
            "webm" => Ok(ContainerKind::Webm),
            "other" => Ok(ContainerKind::Other),
            _ => Err(format!(
                "Invalid container kind: '{}'. Expected: mkv, mp4, webm, or other",
                s
            )),
        }
    }
}

/// Kind of a media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
    Subtitle,
    Attachment,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Video => "video",
            TrackKind::Audio => "audio",
            TrackKind::Subtitle => "subtitle",
            TrackKind::Attachment => "attachment",
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TrackKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "video" => Ok(TrackKind::Video),
            "audio" => Ok(TrackKind::Audio),
            "subtitle" | "subtitles" => Ok(TrackKind::Subtitle),
            "attachment" => Ok(TrackKind::Attachment),
            _ => Err(format!(
                "Invalid track kind: '{}'. Expected: video, audio, subtitle, or attachment",
                s
            )),
        }
    }
}

/// Frame rate as an exact rational (e.g. 24000/1001).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRate {
    pub numerator: u32,
    pub denominator: u32,
}

impl FrameRate {
    pub fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator: denominator.max(1),
        }
    }

    pub fn as_f64(&self) -> f64 {
        f64::from(self.numerator) / f64::from(self.denominator)
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// Plugin-sourced classification of a track as original or dubbed audio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceVerdict {
    /// The plugin's verdict.
    pub value: bool,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
}

/// JSON-scalar value carried in plugin metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Number(f64),
    String(String),
    Null,
}

impl MetaValue {
    /// Render the value as a string for `eq`/`neq`/`contains` comparisons.
    pub fn as_comparable_string(&self) -> String {
        match self {
            MetaValue::Bool(b) => b.to_string(),
            MetaValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            MetaValue::String(s) => s.clone(),
            MetaValue::Null => String::new(),
        }
    }

    /// Numeric view, if the value parses as a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            MetaValue::Number(n) => Some(*n),
            MetaValue::Bool(_) | MetaValue::Null => None,
            MetaValue::String(s) => s.trim().parse::<f64>().ok(),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetaValue::Bool(b) => Some(*b),
            MetaValue::String(s) => match s.to_lowercase().as_str() {
                "true" | "1" | "yes" => Some(true),
                "false" | "0" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

/// One track of a source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Stable source index, unique within a file.
    pub index: usize,
    pub kind: TrackKind,
    /// Lowercase canonical codec name (e.g. "hevc", "aac", "subrip").
    pub codec: String,
    /// ISO 639-2/B code, or `und` when unknown.
    pub language: String,
    #[serde(default)]
    pub title: String,
    /// Audio only.
    #[serde(default)]
    pub channels: Option<u32>,
    #[serde(default)]
    pub sample_rate: Option<u32>,
    /// Video only.
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    /// Bits per second, when the probe reports one.
    #[serde(default)]
    pub bitrate: Option<u64>,
    #[serde(default)]
    pub frame_rate: Option<FrameRate>,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub is_forced: bool,
    /// Plugin-set commentary flag. `None` means "derive from title".
    #[serde(default)]
    pub commentary_override: Option<bool>,
    /// Plugin-sourced original-audio verdict.
    #[serde(default)]
    pub original: Option<ProvenanceVerdict>,
    /// Plugin-sourced dubbed-audio verdict.
    #[serde(default)]
    pub dubbed: Option<ProvenanceVerdict>,
}

impl Track {
    /// Minimal track with the given identity; everything else defaulted.
    pub fn new(index: usize, kind: TrackKind, codec: impl Into<String>) -> Self {
        let codec: String = codec.into();
        Self {
            index,
            kind,
            codec: codec.to_lowercase(),
            language: UNDETERMINED.to_string(),
            title: String::new(),
            channels: None,
            sample_rate: None,
            width: None,
            height: None,
            bitrate: None,
            frame_rate: None,
            is_default: false,
            is_forced: false,
            commentary_override: None,
            original: None,
            dubbed: None,
        }
    }

    pub fn video(index: usize, codec: impl Into<String>) -> Self {
        Self::new(index, TrackKind::Video, codec)
    }

    pub fn audio(index: usize, codec: impl Into<String>, language: impl Into<String>) -> Self {
        Self::new(index, TrackKind::Audio, codec).with_language(language)
    }

    pub fn subtitle(index: usize, codec: impl Into<String>, language: impl Into<String>) -> Self {
        Self::new(index, TrackKind::Subtitle, codec).with_language(language)
    }

    pub fn attachment(index: usize, codec: impl Into<String>) -> Self {
        Self::new(index, TrackKind::Attachment, codec)
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        let language: String = language.into();
        self.language = language.to_lowercase();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_channels(mut self, channels: u32) -> Self {
        self.channels = Some(channels);
        self
    }

    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn with_bitrate(mut self, bitrate: u64) -> Self {
        self.bitrate = Some(bitrate);
        self
    }

    pub fn with_default(mut self, is_default: bool) -> Self {
        self.is_default = is_default;
        self
    }

    pub fn with_forced(mut self, is_forced: bool) -> Self {
        self.is_forced = is_forced;
        self
    }

    /// True when the language is a real code (not `und`).
    pub fn has_language(&self) -> bool {
        self.language != UNDETERMINED
    }
}

/// Immutable description of a source file produced by the inspection
/// provider. One value per evaluation; never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inspection {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub container: ContainerKind,
    /// Container-level metadata tags (tag name -> value).
    #[serde(default)]
    pub container_metadata: BTreeMap<String, String>,
    /// Total duration in seconds, when known.
    #[serde(default)]
    pub duration_secs: Option<f64>,
    pub tracks: Vec<Track>,
    /// Opaque plugin metadata: plugin name -> field name -> value.
    #[serde(default)]
    pub plugin_metadata: BTreeMap<String, BTreeMap<String, MetaValue>>,
}

impl Inspection {
    pub fn new(path: impl Into<PathBuf>, container: ContainerKind) -> Self {
        Self {
            path: path.into(),
            size_bytes: 0,
            container,
            container_metadata: BTreeMap::new(),
            duration_secs: None,
            tracks: Vec::new(),
            plugin_metadata: BTreeMap::new(),
        }
    }

    pub fn with_tracks(mut self, tracks: Vec<Track>) -> Self {
        self.tracks = tracks;
        self
    }

    pub fn with_container_tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.container_metadata.insert(name.into(), value.into());
        self
    }

    pub fn with_plugin_field(
        mut self,
        plugin: impl Into<String>,
        field: impl Into<String>,
        value: MetaValue,
    ) -> Self {
        self.plugin_metadata
            .entry(plugin.into())
            .or_default()
            .insert(field.into(), value);
        self
    }

    /// File name component of the source path, for message templates.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Tracks of one kind, in source-index order.
    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &Track> {
        self.tracks.iter().filter(move |t| t.kind == kind)
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks_of(TrackKind::Audio)
    }

    pub fn subtitle_tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks_of(TrackKind::Subtitle)
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks_of(TrackKind::Video)
    }

    pub fn track_by_index(&self, index: usize) -> Option<&Track> {
        self.tracks.iter().find(|t| t.index == index)
    }

    /// Plugin metadata field lookup.
    pub fn plugin_field(&self, plugin: &str, field: &str) -> Option<&MetaValue> {
        self.plugin_metadata.get(plugin).and_then(|m| m.get(field))
    }

    /// The file's primary content language: the container `language` tag
    /// when present, else the most common language among audio tracks.
    pub fn content_language(&self) -> Option<String> {
        if let Some(lang) = self
            .container_metadata
            .get("language")
            .or_else(|| self.container_metadata.get("LANGUAGE"))
        {
            let lang = lang.to_lowercase();
            if lang != UNDETERMINED && !lang.is_empty() {
                return Some(lang);
            }
        }

        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for track in self.audio_tracks() {
            if track.has_language() {
                *counts.entry(track.language.as_str()).or_default() += 1;
            }
        }
        counts
            .into_iter()
            .max_by_key(|(_, n)| *n)
            .map(|(lang, _)| lang.to_string())
    }

    /// Check the structural invariants of an inspection.
    pub fn validate(&self) -> Result<(), InspectionError> {
        let mut seen = std::collections::BTreeSet::new();
        for track in &self.tracks {
            if !seen.insert(track.index) {
                return Err(InspectionError::DuplicateTrackIndex(track.index));
            }
            if !is_valid_language(&track.language) {
                return Err(InspectionError::InvalidLanguage {
                    index: track.index,
                    language: track.language.clone(),
                });
            }
            if track.codec.chars().any(|c| c.is_ascii_uppercase()) {
                return Err(InspectionError::CodecNotCanonical {
                    index: track.index,
                    codec: track.codec.clone(),
                });
            }
        }
        Ok(())
    }
}

/// A language code is 2-3 lowercase ASCII letters (`und` included).
pub fn is_valid_language(code: &str) -> bool {
    (2..=3).contains(&code.len()) && code.bytes().all(|b| b.is_ascii_lowercase())
}

/// Structural errors in an inspection payload.
#[derive(Debug, Error)]
pub enum InspectionError {
    #[error("duplicate track index {0}")]
    DuplicateTrackIndex(usize),

    #[error("track {index}: invalid language code '{language}'")]
    InvalidLanguage { index: usize, language: String },

    #[error("track {index}: codec '{codec}' is not lowercase canonical")]
    CodecNotCanonical { index: usize, codec: String },

    #[error("probe failed: {0}")]
    ProbeFailed(String),

    #[error("unsupported container: {0}")]
    UnsupportedContainer(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Inspection {
        Inspection::new("/media/movie.mkv", ContainerKind::Mkv).with_tracks(vec![
            Track::video(0, "hevc").with_resolution(1920, 1080),
            Track::audio(1, "truehd", "eng").with_channels(8),
            Track::audio(2, "aac", "jpn").with_channels(2),
            Track::subtitle(3, "subrip", "eng").with_forced(true),
        ])
    }

    #[test]
    fn validate_accepts_well_formed_inspection() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn validate_rejects_duplicate_indices() {
        let mut ins = sample();
        ins.tracks.push(Track::audio(1, "opus", "fra"));
        assert!(matches!(
            ins.validate(),
            Err(InspectionError::DuplicateTrackIndex(1))
        ));
    }

    #[test]
    fn validate_rejects_bad_language() {
        let mut ins = sample();
        ins.tracks[1].language = "ENGLISH".to_string();
        assert!(matches!(
            ins.validate(),
            Err(InspectionError::InvalidLanguage { index: 1, .. })
        ));
    }

    #[test]
    fn content_language_prefers_container_tag() {
        let ins = sample().with_container_tag("language", "eng");
        assert_eq!(ins.content_language().as_deref(), Some("eng"));
    }

    #[test]
    fn content_language_falls_back_to_majority_audio() {
        let mut ins = sample();
        ins.tracks.push(Track::audio(4, "aac", "jpn"));
        assert_eq!(ins.content_language().as_deref(), Some("jpn"));
    }

    #[test]
    fn meta_value_casts() {
        assert_eq!(MetaValue::Number(4.0).as_comparable_string(), "4");
        assert_eq!(MetaValue::String("4".into()).as_number(), Some(4.0));
        assert_eq!(MetaValue::Bool(true).as_comparable_string(), "true");
        assert_eq!(MetaValue::String("abc".into()).as_number(), None);
    }

    #[test]
    fn track_kind_round_trip() {
        for kind in [
            TrackKind::Video,
            TrackKind::Audio,
            TrackKind::Subtitle,
            TrackKind::Attachment,
        ] {
            assert_eq!(kind.as_str().parse::<TrackKind>().unwrap(), kind);
        }
    }
}
