//! Structural and semantic validation of the latest policy shape.
//!
//! Runs after migration and deserialization; every rejection carries a
//! dotted field path. Validation also compiles every user-supplied
//! regex once so bad patterns are rejected at load, not mid-evaluation.

use crate::action::Action;
use crate::condition::{Condition, TitleMatch, TrackFilters};
use crate::error::{PolicyError, Result};
use crate::model::{
    resolution_bucket, CommentaryPattern, Phase, Policy, QualityMode, SynthesisSpec,
    RESERVED_PHASE_NAMES,
};
use regex::RegexBuilder;
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// Maximum nesting depth of `and`/`or`/`not` composites.
pub const MAX_BOOLEAN_DEPTH: usize = 2;

fn phase_name_pattern() -> &'static regex::Regex {
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        regex::Regex::new("^[A-Za-z][A-Za-z0-9_-]{0,63}$").expect("static pattern")
    })
}

/// Validate a policy already in the latest shape.
pub fn validate_policy(policy: &Policy) -> Result<()> {
    for (i, lang) in policy.audio_language_preference.iter().enumerate() {
        check_language(lang, &format!("audio_language_preference[{}]", i))?;
    }
    for (i, lang) in policy.subtitle_language_preference.iter().enumerate() {
        check_language(lang, &format!("subtitle_language_preference[{}]", i))?;
    }
    for (i, pattern) in policy.commentary_patterns.iter().enumerate() {
        check_commentary_pattern(pattern, &format!("commentary_patterns[{}]", i))?;
    }

    let mut seen_names = BTreeSet::new();
    for (i, phase) in policy.phases.iter().enumerate() {
        let base = format!("phases[{}]", i);
        check_phase_name(&phase.name, &base, &mut seen_names)?;
        validate_phase(phase, &base)?;
    }
    Ok(())
}

fn check_phase_name(name: &str, path: &str, seen: &mut BTreeSet<String>) -> Result<()> {
    if !phase_name_pattern().is_match(name) {
        return Err(PolicyError::semantic(
            format!("{}.name", path),
            format!("invalid phase name '{}'", name),
        ));
    }
    if RESERVED_PHASE_NAMES.contains(&name) {
        return Err(PolicyError::semantic(
            format!("{}.name", path),
            format!("'{}' is a reserved name", name),
        ));
    }
    if !seen.insert(name.to_string()) {
        return Err(PolicyError::semantic(
            format!("{}.name", path),
            format!("duplicate phase name '{}'", name),
        ));
    }
    Ok(())
}

fn validate_phase(phase: &Phase, base: &str) -> Result<()> {
    let ops = &phase.ops;

    if let Some(audio) = &ops.audio_filter {
        for (i, lang) in audio.languages.iter().enumerate() {
            check_language(lang, &format!("{}.audio_filter.languages[{}]", base, i))?;
        }
    }
    if let Some(subs) = &ops.subtitle_filter {
        for (i, lang) in subs.languages.iter().enumerate() {
            check_language(lang, &format!("{}.subtitle_filter.languages[{}]", base, i))?;
        }
    }

    if let Some(rules) = &ops.rules {
        for (i, rule) in rules.items.iter().enumerate() {
            let rule_path = format!("{}.rules.items[{}]", base, i);
            validate_condition(&rule.when, &format!("{}.when", rule_path))?;
            for (j, action) in rule.then.iter().enumerate() {
                validate_action(action, &format!("{}.then[{}]", rule_path, j))?;
            }
            if let Some(otherwise) = &rule.otherwise {
                for (j, action) in otherwise.iter().enumerate() {
                    validate_action(action, &format!("{}.else[{}]", rule_path, j))?;
                }
            }
        }
    }

    if let Some(specs) = &ops.audio_synthesis {
        for (i, spec) in specs.iter().enumerate() {
            validate_synthesis(spec, &format!("{}.audio_synthesis[{}]", base, i))?;
        }
    }

    if let Some(transcode) = &ops.transcode {
        if let Some(video) = &transcode.video {
            let video_path = format!("{}.transcode.video", base);
            if let Some(quality) = &video.quality {
                if quality.mode == QualityMode::Crf {
                    match quality.crf {
                        None => {
                            return Err(PolicyError::semantic(
                                format!("{}.quality.crf", video_path),
                                "crf mode requires a crf value",
                            ))
                        }
                        Some(crf) if crf > 51 => {
                            return Err(PolicyError::semantic(
                                format!("{}.quality.crf", video_path),
                                format!("crf {} out of range 0..=51", crf),
                            ))
                        }
                        Some(_) => {}
                    }
                }
            }
            if let Some(skip_if) = &video.skip_if {
                if let Some(bucket) = &skip_if.resolution_within {
                    if resolution_bucket(bucket).is_none() {
                        return Err(PolicyError::semantic(
                            format!("{}.skip_if.resolution_within", video_path),
                            format!("unknown resolution bucket '{}'", bucket),
                        ));
                    }
                }
            }
            if let Some(scaling) = &video.scaling {
                if let Some(bucket) = &scaling.max_resolution {
                    if resolution_bucket(bucket).is_none() {
                        return Err(PolicyError::semantic(
                            format!("{}.scaling.max_resolution", video_path),
                            format!("unknown resolution bucket '{}'", bucket),
                        ));
                    }
                }
            }
        }
    }
    Ok(())
}

fn validate_synthesis(spec: &SynthesisSpec, path: &str) -> Result<()> {
    if spec.name.contains('/') || spec.name.contains('\\') {
        return Err(PolicyError::semantic(
            format!("{}.name", path),
            "track name must not contain path separators",
        ));
    }
    if let Some(language) = &spec.language {
        if language != "inherit" {
            check_language(language, &format!("{}.language", path))?;
        }
    }
    for (i, criterion) in spec.source_prefer.iter().enumerate() {
        if let Some(language) = &criterion.language {
            check_language(language, &format!("{}.source_prefer[{}].language", path, i))?;
        }
    }
    if let Some(skip) = &spec.skip_if_exists {
        if let Some(language) = &skip.language {
            check_language(language, &format!("{}.skip_if_exists.language", path))?;
        }
    }
    if let Some(create_if) = &spec.create_if {
        validate_condition(create_if, &format!("{}.create_if", path))?;
    }
    Ok(())
}

fn validate_condition(cond: &Condition, path: &str) -> Result<()> {
    let depth = cond.boolean_depth();
    if depth > MAX_BOOLEAN_DEPTH {
        return Err(PolicyError::semantic(
            path,
            format!(
                "boolean nesting depth {} exceeds the maximum of {}",
                depth, MAX_BOOLEAN_DEPTH
            ),
        ));
    }

    let mut result = Ok(());
    cond.walk(&mut |node| {
        if result.is_err() {
            return;
        }
        result = validate_condition_node(node, path);
    });
    result
}

fn validate_condition_node(node: &Condition, path: &str) -> Result<()> {
    match node {
        Condition::Exists { filters, .. } => validate_filters(filters, path),
        Condition::Count { filters, value, .. } => {
            if *value < 0 {
                return Err(PolicyError::semantic(path, "count value must be >= 0"));
            }
            validate_filters(filters, path)
        }
        Condition::AudioIsMultiLanguage {
            threshold,
            primary_language,
            ..
        } => {
            if !(*threshold > 0.0 && *threshold <= 1.0) {
                return Err(PolicyError::semantic(
                    path,
                    format!("threshold {} outside (0, 1]", threshold),
                ));
            }
            if let Some(lang) = primary_language {
                check_language(lang, path)?;
            }
            Ok(())
        }
        Condition::IsOriginal {
            min_confidence,
            language,
            ..
        }
        | Condition::IsDubbed {
            min_confidence,
            language,
            ..
        } => {
            if !(0.0..=1.0).contains(min_confidence) {
                return Err(PolicyError::semantic(
                    path,
                    format!("min_confidence {} outside [0, 1]", min_confidence),
                ));
            }
            if let Some(lang) = language {
                check_language(lang, path)?;
            }
            Ok(())
        }
        Condition::PluginMetadata { op, value, .. }
        | Condition::ContainerMetadata { op, value, .. } => {
            use crate::condition::MetaOp;
            match (op, value) {
                (MetaOp::Exists, Some(_)) => Err(PolicyError::semantic(
                    path,
                    "op 'exists' does not take a value",
                )),
                (MetaOp::Exists, None) => Ok(()),
                (_, None) => Err(PolicyError::semantic(
                    path,
                    format!("op '{:?}' requires a value", op).to_lowercase(),
                )),
                (_, Some(_)) => Ok(()),
            }
        }
        _ => Ok(()),
    }
}

fn validate_filters(filters: &TrackFilters, path: &str) -> Result<()> {
    if let Some(languages) = &filters.language {
        for lang in languages.iter() {
            check_language(lang, &format!("{}.filters.language", path))?;
        }
    }
    if let Some(TitleMatch::Regex(source)) = &filters.title {
        compile_ci(source, &format!("{}.filters.title.regex", path))?;
    }
    Ok(())
}

fn validate_action(action: &Action, path: &str) -> Result<()> {
    match action {
        Action::SetLanguage {
            new_language,
            match_language,
            ..
        } => {
            check_language(new_language, &format!("{}.new_language", path))?;
            if let Some(lang) = match_language {
                check_language(lang, &format!("{}.match_language", path))?;
            }
            Ok(())
        }
        Action::SetForced { language, .. } | Action::SetDefault { language, .. } => {
            if let Some(lang) = language {
                check_language(lang, &format!("{}.language", path))?;
            }
            Ok(())
        }
        Action::CreateSynthesizedTrack { spec, .. } => {
            validate_synthesis(spec, &format!("{}.spec", path))
        }
        _ => Ok(()),
    }
}

fn check_commentary_pattern(pattern: &CommentaryPattern, path: &str) -> Result<()> {
    if let Some(source) = pattern.regex_source() {
        compile_ci(source, path)?;
    }
    Ok(())
}

fn check_language(code: &str, path: &str) -> Result<()> {
    if vpo_inspect::types::is_valid_language(code) {
        Ok(())
    } else {
        Err(PolicyError::semantic(
            path,
            format!("invalid language code '{}'", code),
        ))
    }
}

fn compile_ci(source: &str, path: &str) -> Result<regex::Regex> {
    RegexBuilder::new(source)
        .case_insensitive(true)
        .build()
        .map_err(|e| PolicyError::regex(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load::load_policy_str;

    #[test]
    fn deep_boolean_nesting_is_rejected() {
        let err = load_policy_str(
            r#"
schema_version: 13
phases:
  - name: main
    rules:
      match: all
      items:
        - name: too_deep
          when:
            or:
              - and:
                  - not:
                      exists:
                        track_kind: audio
          then: []
"#,
        )
        .unwrap_err();
        match err {
            PolicyError::Semantic { path, reason } => {
                assert!(path.contains("rules.items[0].when"));
                assert!(reason.contains("nesting depth"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn two_level_nesting_is_accepted() {
        assert!(load_policy_str(
            r#"
schema_version: 13
phases:
  - name: main
    rules:
      items:
        - name: ok
          when:
            and:
              - not:
                  exists:
                    track_kind: audio
              - exists:
                  track_kind: subtitle
          then: []
"#,
        )
        .is_ok());
    }

    #[test]
    fn reserved_phase_name_is_rejected() {
        let err = load_policy_str(
            r#"
schema_version: 13
phases:
  - name: config
    audio_filter: {}
"#,
        )
        .unwrap_err();
        assert!(matches!(err, PolicyError::Semantic { .. }));
    }

    #[test]
    fn duplicate_phase_names_are_rejected() {
        let err = load_policy_str(
            r#"
schema_version: 13
phases:
  - name: pass1
    audio_filter: {}
  - name: pass1
    subtitle_filter: {}
"#,
        )
        .unwrap_err();
        match err {
            PolicyError::Semantic { reason, .. } => assert!(reason.contains("duplicate")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn bad_language_code_is_rejected() {
        let err = load_policy_str(
            r#"
schema_version: 13
audio_language_preference: [english]
"#,
        )
        .unwrap_err();
        match err {
            PolicyError::Semantic { path, .. } => {
                assert_eq!(path, "audio_language_preference[0]")
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn bad_commentary_regex_is_rejected() {
        let err = load_policy_str(
            r#"
schema_version: 13
commentary_patterns: ["(unclosed"]
"#,
        )
        .unwrap_err();
        assert!(matches!(err, PolicyError::RegexCompile { .. }));
    }

    #[test]
    fn crf_out_of_range_is_rejected() {
        let err = load_policy_str(
            r#"
schema_version: 13
transcode:
  video:
    target_codec: hevc
    quality:
      mode: crf
      crf: 60
"#,
        )
        .unwrap_err();
        match err {
            PolicyError::Semantic { reason, .. } => assert!(reason.contains("out of range")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn synthesis_name_with_path_separator_is_rejected() {
        let err = load_policy_str(
            r#"
schema_version: 13
audio_synthesis:
  - name: "a/b"
    codec: aac
"#,
        )
        .unwrap_err();
        assert!(matches!(err, PolicyError::Semantic { .. }));
    }
}
