//! Action AST.
//!
//! Actions appear in two places: authored inside conditional rules, and
//! emitted by the planner as the plan itself. Both use the same tagged
//! variants. Planner-emitted flag edits carry a `track_index` pinning the
//! exact track; rule-authored edits select by kind and language instead.

use crate::model::{OnIncompatible, QualityPolicy, ScalingPolicy, SynthesisSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use vpo_inspect::{ContainerKind, TrackKind};

/// Operation kinds a `skip_operation` action can suppress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipKind {
    VideoTranscode,
    AudioTranscode,
    TrackFilter,
}

/// Resolved video-transcode parameters carried in a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoTranscodeParams {
    pub codec: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaling: Option<ScalingPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_backend: Option<String>,
    #[serde(default)]
    pub fallback_to_cpu: bool,
}

/// A single planned (or rule-authored) operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    SkipOperation {
        kind: SkipKind,
    },
    /// Surface a user-authored message; planning continues.
    Warn {
        message: String,
    },
    /// Abort plan assembly with a user-authored message.
    Fail {
        message: String,
    },
    SetForced {
        track_kind: TrackKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        value: bool,
        /// Planner-emitted actions pin the exact track.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        track_index: Option<usize>,
    },
    SetDefault {
        track_kind: TrackKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        value: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        track_index: Option<usize>,
    },
    SetLanguage {
        track_kind: TrackKind,
        new_language: String,
        /// Restrict to tracks currently tagged with this language.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        match_language: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        track_index: Option<usize>,
    },
    /// Set a container tag; absent value deletes the tag.
    SetContainerMetadata {
        field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
    },
    /// The surviving set of one track kind after a filter.
    KeepTracks {
        kind: TrackKind,
        indices: BTreeSet<usize>,
    },
    /// Permutation of all surviving track indices.
    ReorderTracks {
        permutation: Vec<usize>,
    },
    CreateSynthesizedTrack {
        spec: SynthesisSpec,
        source_index: usize,
    },
    TranscodeVideo {
        params: VideoTranscodeParams,
    },
    TranscodeAudio {
        track_index: usize,
        to: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bitrate: Option<String>,
    },
    ConvertContainer {
        target: ContainerKind,
        #[serde(default)]
        on_incompatible: OnIncompatible,
        #[serde(default)]
        preserve_metadata: bool,
    },
}

impl Action {
    /// Short tag for logs and progress detail.
    pub fn kind_str(&self) -> &'static str {
        match self {
            Action::SkipOperation { .. } => "skip_operation",
            Action::Warn { .. } => "warn",
            Action::Fail { .. } => "fail",
            Action::SetForced { .. } => "set_forced",
            Action::SetDefault { .. } => "set_default",
            Action::SetLanguage { .. } => "set_language",
            Action::SetContainerMetadata { .. } => "set_container_metadata",
            Action::KeepTracks { .. } => "keep_tracks",
            Action::ReorderTracks { .. } => "reorder_tracks",
            Action::CreateSynthesizedTrack { .. } => "create_synthesized_track",
            Action::TranscodeVideo { .. } => "transcode_video",
            Action::TranscodeAudio { .. } => "transcode_audio",
            Action::ConvertContainer { .. } => "convert_container",
        }
    }
}

/// Values substituted into `Warn`/`Fail` message templates.
#[derive(Debug, Clone, Copy)]
pub struct TemplateContext<'a> {
    pub filename: &'a str,
    pub path: &'a str,
    pub rule_name: &'a str,
}

/// Expand the literal placeholders `{filename}`, `{path}` and
/// `{rule_name}`. Pure string substitution; nothing else is interpreted.
pub fn expand_template(template: &str, ctx: &TemplateContext<'_>) -> String {
    template
        .replace("{filename}", ctx.filename)
        .replace("{path}", ctx.path)
        .replace("{rule_name}", ctx.rule_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_authored_action_parses() {
        let yaml = r#"
set_default:
  track_kind: audio
  language: jpn
  value: true
"#;
        let action: Action = serde_yaml::from_str(yaml).unwrap();
        match action {
            Action::SetDefault {
                track_kind,
                language,
                value,
                track_index,
            } => {
                assert_eq!(track_kind, TrackKind::Audio);
                assert_eq!(language.as_deref(), Some("jpn"));
                assert!(value);
                assert!(track_index.is_none());
            }
            other => panic!("unexpected action: {:?}", other),
        }
    }

    #[test]
    fn template_expands_only_known_placeholders() {
        let ctx = TemplateContext {
            filename: "movie.mkv",
            path: "/media/movie.mkv",
            rule_name: "no_eng",
        };
        let out = expand_template("{rule_name}: {filename} at {path} ({other})", &ctx);
        assert_eq!(out, "no_eng: movie.mkv at /media/movie.mkv ({other})");
    }

    #[test]
    fn set_container_metadata_absent_value_means_delete() {
        let yaml = r#"
set_container_metadata:
  field: comment
"#;
        let action: Action = serde_yaml::from_str(yaml).unwrap();
        match action {
            Action::SetContainerMetadata { field, value } => {
                assert_eq!(field, "comment");
                assert!(value.is_none());
            }
            other => panic!("unexpected action: {:?}", other),
        }
    }
}
