//! Policy loader.
//!
//! The loader is format-agnostic past parsing: `load_policy_value`
//! accepts any document already parsed into a tagged value. Unknown
//! fields are collected as warnings and never rejected, preserving
//! forward compatibility for minor additions.

use crate::error::{LoadWarning, PolicyError, Result};
use crate::migrate::upgrade_to_latest;
use crate::model::Policy;
use crate::validate::validate_policy;
use serde_yaml::Value;
use tracing::debug;

/// A successfully loaded policy plus its non-fatal findings.
#[derive(Debug, Clone)]
pub struct LoadedPolicy {
    pub policy: Policy,
    pub warnings: Vec<LoadWarning>,
}

/// Load a policy from YAML text.
pub fn load_policy_str(text: &str) -> Result<LoadedPolicy> {
    let doc: Value = serde_yaml::from_str(text)?;
    load_policy_value(doc)
}

/// Load a policy from an already-parsed document value.
pub fn load_policy_value(doc: Value) -> Result<LoadedPolicy> {
    let doc = upgrade_to_latest(doc)?;

    let mut warnings = Vec::new();
    walk_document(&doc, &mut warnings);

    let mut policy: Policy = serde_yaml::from_value(doc)?;
    policy.normalize_phases();
    validate_policy(&policy)?;

    for warning in &warnings {
        debug!(path = %warning.path, "policy load warning: {}", warning.message);
    }

    Ok(LoadedPolicy { policy, warnings })
}

// ============================================================================
// Unknown-field detection
// ============================================================================

const OP_KEYS: &[&str] = &[
    "container",
    "audio_filter",
    "subtitle_filter",
    "attachment_filter",
    "track_order",
    "default_flags",
    "rules",
    "conditional",
    "audio_synthesis",
    "transcode",
    "transcription",
];

const TOP_LEVEL_KEYS: &[&str] = &[
    "schema_version",
    "name",
    "audio_language_preference",
    "subtitle_language_preference",
    "commentary_patterns",
    "config",
    "phases",
];

const CONTAINER_KEYS: &[&str] = &["target", "on_incompatible", "preserve_metadata"];

const AUDIO_FILTER_KEYS: &[&str] = &[
    "languages",
    "minimum",
    "fallback",
    "keep_music_tracks",
    "exclude_music_from_language_filter",
    "keep_sfx_tracks",
    "exclude_sfx_from_language_filter",
    "keep_non_speech_tracks",
    "exclude_non_speech_from_language_filter",
];

const SUBTITLE_FILTER_KEYS: &[&str] = &["remove_all", "languages", "preserve_forced"];
const ATTACHMENT_FILTER_KEYS: &[&str] = &["remove_all"];

const DEFAULT_FLAGS_KEYS: &[&str] = &[
    "set_first_video_default",
    "set_preferred_audio_default",
    "preferred_audio_codec",
    "set_preferred_subtitle_default",
    "set_subtitle_default_when_audio_differs",
    "set_subtitle_forced_when_audio_differs",
    "clear_other_defaults",
];

const RULE_SET_KEYS: &[&str] = &["match", "items"];
const RULE_KEYS: &[&str] = &["name", "when", "then", "else"];

const SYNTH_KEYS: &[&str] = &[
    "name",
    "codec",
    "channels",
    "language",
    "title",
    "bitrate",
    "source_prefer",
    "skip_if_exists",
    "create_if",
    "position",
];
const CRITERION_KEYS: &[&str] = &["language", "codec", "not_commentary", "channels"];
const SKIP_EXISTS_KEYS: &[&str] = &["codec", "channels", "language", "not_commentary"];

const TRANSCODE_KEYS: &[&str] = &["video", "audio"];
const VIDEO_TRANSCODE_KEYS: &[&str] = &[
    "target_codec",
    "skip_if",
    "quality",
    "scaling",
    "hardware_acceleration",
];
const VIDEO_SKIP_IF_KEYS: &[&str] = &["codec_matches", "resolution_within", "bitrate_under"];
const QUALITY_KEYS: &[&str] = &["mode", "crf", "bitrate", "min_bitrate", "max_bitrate"];
const SCALING_KEYS: &[&str] = &["max_resolution", "algorithm"];
const HW_ACCEL_KEYS: &[&str] = &["backend", "fallback_to_cpu"];
const AUDIO_TRANSCODE_KEYS: &[&str] = &["preserve_codecs", "transcode_to", "transcode_bitrate"];

const TRANSCRIPTION_KEYS: &[&str] = &["enabled", "language_hint", "provider"];
const CONFIG_KEYS: &[&str] = &["on_error"];
const FALLBACK_KEYS: &[&str] = &["mode"];
const NUM_CMP_KEYS: &[&str] = &["op", "value"];

const FILTER_KEYS: &[&str] = &[
    "language",
    "codec",
    "is_default",
    "is_forced",
    "not_commentary",
    "channels",
    "width",
    "height",
    "title",
];

const CONDITION_VARIANTS: &[&str] = &[
    "exists",
    "count",
    "and",
    "or",
    "not",
    "audio_is_multi_language",
    "is_original",
    "is_dubbed",
    "plugin_metadata",
    "container_metadata",
];

const ACTION_VARIANTS: &[&str] = &[
    "skip_operation",
    "warn",
    "fail",
    "set_forced",
    "set_default",
    "set_language",
    "set_container_metadata",
    "keep_tracks",
    "reorder_tracks",
    "create_synthesized_track",
    "transcode_video",
    "transcode_audio",
    "convert_container",
];

fn walk_document(doc: &Value, warnings: &mut Vec<LoadWarning>) {
    let Some(map) = doc.as_mapping() else { return };
    for (key, value) in map {
        let Some(key) = key.as_str() else { continue };
        if TOP_LEVEL_KEYS.contains(&key) {
            match key {
                "config" => check_keys(value, CONFIG_KEYS, "config", warnings),
                "phases" => walk_phases(value, warnings),
                _ => {}
            }
        } else if OP_KEYS.contains(&key) {
            walk_op(key, value, key.to_string(), warnings);
        } else {
            warnings.push(LoadWarning::unknown_field(key));
        }
    }
}

fn walk_phases(phases: &Value, warnings: &mut Vec<LoadWarning>) {
    let Some(seq) = phases.as_sequence() else { return };
    for (i, phase) in seq.iter().enumerate() {
        let base = format!("phases[{}]", i);
        let Some(map) = phase.as_mapping() else { continue };
        for (key, value) in map {
            let Some(key) = key.as_str() else { continue };
            if key == "name" {
                continue;
            }
            if OP_KEYS.contains(&key) {
                walk_op(key, value, format!("{}.{}", base, key), warnings);
            } else {
                warnings.push(LoadWarning::unknown_field(format!("{}.{}", base, key)));
            }
        }
    }
}

fn walk_op(op: &str, value: &Value, path: String, warnings: &mut Vec<LoadWarning>) {
    match op {
        "container" => check_keys(value, CONTAINER_KEYS, &path, warnings),
        "audio_filter" => {
            check_keys(value, AUDIO_FILTER_KEYS, &path, warnings);
            if let Some(fallback) = value.get("fallback") {
                check_keys(fallback, FALLBACK_KEYS, &format!("{}.fallback", path), warnings);
            }
        }
        "subtitle_filter" => check_keys(value, SUBTITLE_FILTER_KEYS, &path, warnings),
        "attachment_filter" => check_keys(value, ATTACHMENT_FILTER_KEYS, &path, warnings),
        "default_flags" => check_keys(value, DEFAULT_FLAGS_KEYS, &path, warnings),
        "rules" | "conditional" => walk_rule_set(value, &path, warnings),
        "audio_synthesis" => walk_synthesis(value, &path, warnings),
        "transcode" => walk_transcode(value, &path, warnings),
        "transcription" => check_keys(value, TRANSCRIPTION_KEYS, &path, warnings),
        // track_order is a plain sequence; nothing to check here.
        _ => {}
    }
}

fn walk_rule_set(value: &Value, path: &str, warnings: &mut Vec<LoadWarning>) {
    check_keys(value, RULE_SET_KEYS, path, warnings);
    let Some(items) = value.get("items").and_then(Value::as_sequence) else {
        return;
    };
    for (i, rule) in items.iter().enumerate() {
        let base = format!("{}.items[{}]", path, i);
        check_keys(rule, RULE_KEYS, &base, warnings);
        if let Some(when) = rule.get("when") {
            walk_condition(when, &format!("{}.when", base), warnings);
        }
        for branch in ["then", "else"] {
            if let Some(actions) = rule.get(branch).and_then(Value::as_sequence) {
                for (j, action) in actions.iter().enumerate() {
                    walk_action(action, &format!("{}.{}[{}]", base, branch, j), warnings);
                }
            }
        }
    }
}

fn walk_condition(value: &Value, path: &str, warnings: &mut Vec<LoadWarning>) {
    let Some(map) = value.as_mapping() else { return };
    for (key, body) in map {
        let Some(key) = key.as_str() else { continue };
        if !CONDITION_VARIANTS.contains(&key) {
            // Unknown variants fail deserialization later; the warning is
            // still useful when the document fails to load.
            warnings.push(LoadWarning::unknown_field(format!("{}.{}", path, key)));
            continue;
        }
        let base = format!("{}.{}", path, key);
        match key {
            "exists" | "count" => {
                check_keys(body, &["track_kind", "filters", "op", "value"], &base, warnings);
                if let Some(filters) = body.get("filters") {
                    walk_filters(filters, &format!("{}.filters", base), warnings);
                }
            }
            "and" | "or" => {
                if let Some(children) = body.as_sequence() {
                    for (i, child) in children.iter().enumerate() {
                        walk_condition(child, &format!("{}[{}]", base, i), warnings);
                    }
                }
            }
            "not" => walk_condition(body, &base, warnings),
            "audio_is_multi_language" => check_keys(
                body,
                &["track_index", "threshold", "primary_language"],
                &base,
                warnings,
            ),
            "is_original" | "is_dubbed" => {
                check_keys(body, &["value", "min_confidence", "language"], &base, warnings)
            }
            "plugin_metadata" => {
                check_keys(body, &["plugin", "field", "op", "value"], &base, warnings)
            }
            "container_metadata" => check_keys(body, &["field", "op", "value"], &base, warnings),
            _ => {}
        }
    }
}

fn walk_filters(value: &Value, path: &str, warnings: &mut Vec<LoadWarning>) {
    check_keys(value, FILTER_KEYS, path, warnings);
    for cmp in ["channels", "width", "height"] {
        if let Some(body) = value.get(cmp) {
            check_keys(body, NUM_CMP_KEYS, &format!("{}.{}", path, cmp), warnings);
        }
    }
}

fn walk_action(value: &Value, path: &str, warnings: &mut Vec<LoadWarning>) {
    let Some(map) = value.as_mapping() else { return };
    for (key, body) in map {
        let Some(key) = key.as_str() else { continue };
        if !ACTION_VARIANTS.contains(&key) {
            warnings.push(LoadWarning::unknown_field(format!("{}.{}", path, key)));
            continue;
        }
        let base = format!("{}.{}", path, key);
        let allowed: &[&str] = match key {
            "skip_operation" => &["kind"],
            "warn" | "fail" => &["message"],
            "set_forced" | "set_default" => &["track_kind", "language", "value", "track_index"],
            "set_language" => &["track_kind", "new_language", "match_language", "track_index"],
            "set_container_metadata" => &["field", "value"],
            "keep_tracks" => &["kind", "indices"],
            "reorder_tracks" => &["permutation"],
            "create_synthesized_track" => &["spec", "source_index"],
            "transcode_video" => &["params"],
            "transcode_audio" => &["track_index", "to", "bitrate"],
            "convert_container" => &["target", "on_incompatible", "preserve_metadata"],
            _ => &[],
        };
        check_keys(body, allowed, &base, warnings);
    }
}

fn walk_synthesis(value: &Value, path: &str, warnings: &mut Vec<LoadWarning>) {
    let Some(seq) = value.as_sequence() else { return };
    for (i, spec) in seq.iter().enumerate() {
        let base = format!("{}[{}]", path, i);
        check_keys(spec, SYNTH_KEYS, &base, warnings);
        if let Some(prefer) = spec.get("source_prefer").and_then(Value::as_sequence) {
            for (j, criterion) in prefer.iter().enumerate() {
                check_keys(
                    criterion,
                    CRITERION_KEYS,
                    &format!("{}.source_prefer[{}]", base, j),
                    warnings,
                );
            }
        }
        if let Some(skip) = spec.get("skip_if_exists") {
            check_keys(skip, SKIP_EXISTS_KEYS, &format!("{}.skip_if_exists", base), warnings);
        }
        if let Some(create_if) = spec.get("create_if") {
            walk_condition(create_if, &format!("{}.create_if", base), warnings);
        }
    }
}

fn walk_transcode(value: &Value, path: &str, warnings: &mut Vec<LoadWarning>) {
    check_keys(value, TRANSCODE_KEYS, path, warnings);
    if let Some(video) = value.get("video") {
        let base = format!("{}.video", path);
        check_keys(video, VIDEO_TRANSCODE_KEYS, &base, warnings);
        if let Some(skip_if) = video.get("skip_if") {
            check_keys(skip_if, VIDEO_SKIP_IF_KEYS, &format!("{}.skip_if", base), warnings);
        }
        if let Some(quality) = video.get("quality") {
            check_keys(quality, QUALITY_KEYS, &format!("{}.quality", base), warnings);
        }
        if let Some(scaling) = video.get("scaling") {
            check_keys(scaling, SCALING_KEYS, &format!("{}.scaling", base), warnings);
        }
        if let Some(hw) = video.get("hardware_acceleration") {
            check_keys(
                hw,
                HW_ACCEL_KEYS,
                &format!("{}.hardware_acceleration", base),
                warnings,
            );
        }
    }
    if let Some(audio) = value.get("audio") {
        check_keys(audio, AUDIO_TRANSCODE_KEYS, &format!("{}.audio", path), warnings);
    }
}

fn check_keys(value: &Value, allowed: &[&str], path: &str, warnings: &mut Vec<LoadWarning>) {
    let Some(map) = value.as_mapping() else { return };
    for (key, _) in map.iter() {
        if let Some(key) = key.as_str() {
            if !allowed.contains(&key) {
                warnings.push(LoadWarning::unknown_field(format!("{}.{}", path, key)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MatchMode, OnErrorMode};

    #[test]
    fn loads_v13_phased_policy() {
        let loaded = load_policy_str(
            r#"
schema_version: 13
name: anime defaults
audio_language_preference: [jpn, eng]
commentary_patterns: ["(?i)commentary"]
config:
  on_error: continue
phases:
  - name: cleanup
    audio_filter:
      languages: [jpn, eng]
    subtitle_filter:
      languages: [eng]
      preserve_forced: true
  - name: fixups
    rules:
      match: first
      items:
        - name: prefer_jpn
          when:
            exists:
              track_kind: audio
              filters:
                language: jpn
          then:
            - set_default:
                track_kind: audio
                language: jpn
                value: true
"#,
        )
        .unwrap();
        assert!(loaded.warnings.is_empty());
        assert_eq!(loaded.policy.config.on_error, OnErrorMode::Continue);
        assert_eq!(loaded.policy.phases.len(), 2);
        let rules = loaded.policy.phases[1].ops.rules.as_ref().unwrap();
        assert_eq!(rules.match_mode, MatchMode::First);
        assert_eq!(rules.items[0].name, "prefer_jpn");
    }

    #[test]
    fn unknown_fields_warn_but_load() {
        let loaded = load_policy_str(
            r#"
schema_version: 13
audio_filter:
  languages: [eng]
  shiny_new_option: 7
made_up_section: true
"#,
        )
        .unwrap();
        let paths: Vec<&str> = loaded.warnings.iter().map(|w| w.path.as_str()).collect();
        assert!(paths.contains(&"audio_filter.shiny_new_option"));
        assert!(paths.contains(&"made_up_section"));
    }

    #[test]
    fn legacy_v2_document_loads_as_synthetic_phase() {
        let loaded = load_policy_str(
            r#"
schema_version: 2
audio_filter:
  languages: [eng]
subtitle_filter:
  remove_all: true
"#,
        )
        .unwrap();
        assert_eq!(loaded.policy.schema_version, crate::LATEST_SCHEMA_VERSION);
        assert_eq!(loaded.policy.phases.len(), 1);
        assert_eq!(loaded.policy.phases[0].name, "main");
    }

    #[test]
    fn latest_round_trip_preserves_semantics() {
        let text = r#"
schema_version: 13
audio_language_preference: [jpn, eng]
phases:
  - name: cleanup
    audio_filter:
      languages: [jpn]
"#;
        let first = load_policy_str(text).unwrap().policy;
        let re_emitted = serde_yaml::to_string(&first).unwrap();
        let second = load_policy_str(&re_emitted).unwrap().policy;
        assert_eq!(first, second);
    }
}
