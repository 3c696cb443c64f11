//! Condition evaluator.
//!
//! Pure function from (condition, inspection) to bool. The only failure
//! mode is an internal consistency check on AST depth, which load-time
//! validation makes unreachable; hitting it aborts the plan.

use crate::filters::{track_matches, CompiledPatterns};
use std::collections::BTreeMap;
use thiserror::Error;
use vpo_inspect::{Inspection, MetaValue, Track, TrackKind};
use vpo_policy::{CmpOp, Condition, MetaOp, TrackFilters};

/// Hard backstop on recursion; the loader limits boolean nesting to 2,
/// so reaching this means the AST did not come through the loader.
const MAX_EVAL_DEPTH: usize = 16;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("internal consistency: condition nesting exceeds {MAX_EVAL_DEPTH}")]
    DepthExceeded,
}

/// Evaluate a condition against an inspection.
pub fn evaluate(
    cond: &Condition,
    inspection: &Inspection,
    patterns: &CompiledPatterns,
) -> Result<bool, EvalError> {
    evaluate_at(cond, inspection, patterns, 0)
}

fn evaluate_at(
    cond: &Condition,
    inspection: &Inspection,
    patterns: &CompiledPatterns,
    depth: usize,
) -> Result<bool, EvalError> {
    if depth > MAX_EVAL_DEPTH {
        return Err(EvalError::DepthExceeded);
    }
    match cond {
        Condition::Exists {
            track_kind,
            filters,
        } => Ok(matching_tracks(inspection, *track_kind, filters, patterns).next().is_some()),
        Condition::Count {
            track_kind,
            filters,
            op,
            value,
        } => {
            let count = matching_tracks(inspection, *track_kind, filters, patterns).count();
            Ok(op.compare_i64(count as i64, *value))
        }
        Condition::And(children) => {
            for child in children {
                if !evaluate_at(child, inspection, patterns, depth + 1)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Condition::Or(children) => {
            for child in children {
                if evaluate_at(child, inspection, patterns, depth + 1)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Condition::Not(child) => Ok(!evaluate_at(child, inspection, patterns, depth + 1)?),
        Condition::AudioIsMultiLanguage {
            track_index,
            threshold,
            primary_language,
        } => Ok(audio_is_multi_language(
            inspection,
            *track_index,
            *threshold,
            primary_language.as_deref(),
        )),
        Condition::IsOriginal {
            value,
            min_confidence,
            language,
        } => Ok(provenance_matches(
            inspection,
            |t| t.original,
            *value,
            *min_confidence,
            language.as_deref(),
        )),
        Condition::IsDubbed {
            value,
            min_confidence,
            language,
        } => Ok(provenance_matches(
            inspection,
            |t| t.dubbed,
            *value,
            *min_confidence,
            language.as_deref(),
        )),
        Condition::PluginMetadata {
            plugin,
            field,
            op,
            value,
        } => Ok(meta_compare(
            inspection.plugin_field(plugin, field),
            *op,
            value.as_ref(),
        )),
        Condition::ContainerMetadata { field, op, value } => {
            let observed = inspection
                .container_metadata
                .get(field)
                .map(|s| MetaValue::String(s.clone()));
            Ok(meta_compare(observed.as_ref(), *op, value.as_ref()))
        }
    }
}

fn matching_tracks<'a>(
    inspection: &'a Inspection,
    kind: TrackKind,
    filters: &'a TrackFilters,
    patterns: &'a CompiledPatterns,
) -> impl Iterator<Item = &'a Track> {
    inspection
        .tracks_of(kind)
        .filter(move |track| track_matches(track, filters, patterns))
}

/// Audio spans at least two languages and the least-represented one has
/// a share of at least `threshold`. With `primary_language` set, that
/// language must also be the most-represented one.
fn audio_is_multi_language(
    inspection: &Inspection,
    track_index: Option<usize>,
    threshold: f64,
    primary_language: Option<&str>,
) -> bool {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    let mut total = 0usize;
    for track in inspection.audio_tracks() {
        if let Some(index) = track_index {
            if track.index != index {
                continue;
            }
        }
        if !track.has_language() {
            continue;
        }
        *counts.entry(track.language.as_str()).or_default() += 1;
        total += 1;
    }

    if counts.len() < 2 || total == 0 {
        return false;
    }
    let least = counts.values().copied().min().unwrap_or(0);
    if (least as f64) / (total as f64) < threshold {
        return false;
    }
    if let Some(primary) = primary_language {
        let primary = primary.to_lowercase();
        let max = counts.values().copied().max().unwrap_or(0);
        return counts.get(primary.as_str()).copied() == Some(max);
    }
    true
}

fn provenance_matches(
    inspection: &Inspection,
    verdict_of: impl Fn(&Track) -> Option<vpo_inspect::ProvenanceVerdict>,
    expected: bool,
    min_confidence: f64,
    language: Option<&str>,
) -> bool {
    inspection.audio_tracks().any(|track| {
        if let Some(language) = language {
            if track.language != language.to_lowercase() {
                return false;
            }
        }
        match verdict_of(track) {
            Some(verdict) => verdict.confidence >= min_confidence && verdict.value == expected,
            None => false,
        }
    })
}

/// Metadata operator semantics shared by plugin and container queries.
fn meta_compare(observed: Option<&MetaValue>, op: MetaOp, expected: Option<&MetaValue>) -> bool {
    match op {
        MetaOp::Exists => observed.is_some(),
        MetaOp::Eq | MetaOp::Neq => {
            let (Some(observed), Some(expected)) = (observed, expected) else {
                return false;
            };
            // Numeric fields compare as numbers when both sides parse.
            let equal = match (observed.as_number(), expected.as_number()) {
                (Some(a), Some(b)) => a == b,
                _ => observed.as_comparable_string() == expected.as_comparable_string(),
            };
            if op == MetaOp::Eq {
                equal
            } else {
                !equal
            }
        }
        MetaOp::Contains => {
            let (Some(observed), Some(expected)) = (observed, expected) else {
                return false;
            };
            observed
                .as_comparable_string()
                .to_lowercase()
                .contains(&expected.as_comparable_string().to_lowercase())
        }
        MetaOp::Lt | MetaOp::Lte | MetaOp::Gt | MetaOp::Gte => {
            let (Some(observed), Some(expected)) = (observed, expected) else {
                return false;
            };
            let (Some(a), Some(b)) = (observed.as_number(), expected.as_number()) else {
                return false;
            };
            let op = match op {
                MetaOp::Lt => CmpOp::Lt,
                MetaOp::Lte => CmpOp::Lte,
                MetaOp::Gt => CmpOp::Gt,
                _ => CmpOp::Gte,
            };
            // Compare as f64 without losing fractional parts.
            match op {
                CmpOp::Lt => a < b,
                CmpOp::Lte => a <= b,
                CmpOp::Gt => a > b,
                CmpOp::Gte => a >= b,
                CmpOp::Eq => a == b,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vpo_inspect::{ContainerKind, ProvenanceVerdict};

    fn inspection() -> Inspection {
        Inspection::new("/media/film.mkv", ContainerKind::Mkv)
            .with_tracks(vec![
                Track::video(0, "hevc").with_resolution(1920, 1080),
                Track::audio(1, "truehd", "jpn").with_channels(8),
                Track::audio(2, "aac", "eng").with_channels(2),
                Track::audio(3, "aac", "eng").with_channels(2),
                Track::subtitle(4, "subrip", "eng"),
            ])
            .with_container_tag("language", "jpn")
            .with_plugin_field("radarr", "edition", MetaValue::String("Theatrical".into()))
            .with_plugin_field("radarr", "year", MetaValue::Number(2019.0))
    }

    fn eval(cond: &Condition) -> bool {
        evaluate(cond, &inspection(), &CompiledPatterns::empty()).unwrap()
    }

    fn parse(yaml: &str) -> Condition {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn exists_and_count() {
        assert!(eval(&parse(
            "exists: {track_kind: audio, filters: {language: jpn}}"
        )));
        assert!(!eval(&parse(
            "exists: {track_kind: audio, filters: {language: fra}}"
        )));
        assert!(eval(&parse(
            "count: {track_kind: audio, filters: {language: eng}, op: eq, value: 2}"
        )));
        assert!(eval(&parse("count: {track_kind: video, op: lte, value: 1}")));
    }

    #[test]
    fn boolean_composites_short_circuit() {
        assert!(eval(&parse(
            r#"
and:
  - exists: {track_kind: audio, filters: {language: jpn}}
  - not:
      exists: {track_kind: audio, filters: {language: fra}}
"#
        )));
        assert!(eval(&parse(
            r#"
or:
  - exists: {track_kind: audio, filters: {language: fra}}
  - exists: {track_kind: subtitle, filters: {language: eng}}
"#
        )));
    }

    #[test]
    fn multi_language_counts_shares() {
        // jpn 1/3, eng 2/3: least share 0.33 over default threshold.
        assert!(eval(&parse("audio_is_multi_language: {}")));
        // Requiring jpn to be primary fails; eng dominates.
        assert!(!eval(&parse(
            "audio_is_multi_language: {primary_language: jpn}"
        )));
        assert!(eval(&parse(
            "audio_is_multi_language: {primary_language: eng}"
        )));
        // Threshold above the minority share fails.
        assert!(!eval(&parse("audio_is_multi_language: {threshold: 0.5}")));
    }

    #[test]
    fn is_original_needs_confident_verdict() {
        let mut ins = inspection();
        ins.tracks[1].original = Some(ProvenanceVerdict {
            value: true,
            confidence: 0.9,
        });
        let patterns = CompiledPatterns::empty();

        let cond = parse("is_original: {language: jpn}");
        assert!(evaluate(&cond, &ins, &patterns).unwrap());

        let low = parse("is_original: {language: jpn, min_confidence: 0.95}");
        assert!(!evaluate(&low, &ins, &patterns).unwrap());

        let wrong_lang = parse("is_original: {language: eng}");
        assert!(!evaluate(&wrong_lang, &ins, &patterns).unwrap());
    }

    #[test]
    fn plugin_metadata_operators() {
        assert!(eval(&parse(
            "plugin_metadata: {plugin: radarr, field: edition, op: exists}"
        )));
        assert!(eval(&parse(
            "plugin_metadata: {plugin: radarr, field: edition, op: contains, value: theatrical}"
        )));
        assert!(eval(&parse(
            "plugin_metadata: {plugin: radarr, field: year, op: gte, value: 2019}"
        )));
        // Non-numeric side makes ordering comparisons false, not an error.
        assert!(!eval(&parse(
            "plugin_metadata: {plugin: radarr, field: edition, op: lt, value: 5}"
        )));
        assert!(!eval(&parse(
            "plugin_metadata: {plugin: radarr, field: missing, op: exists}"
        )));
    }

    #[test]
    fn numeric_eq_compares_as_numbers() {
        // year stored as number, compared against string "2019".
        assert!(eval(&parse(
            "plugin_metadata: {plugin: radarr, field: year, op: eq, value: \"2019\"}"
        )));
        assert!(eval(&parse(
            "plugin_metadata: {plugin: radarr, field: year, op: neq, value: \"2020\"}"
        )));
    }

    #[test]
    fn container_metadata_lookup() {
        assert!(eval(&parse(
            "container_metadata: {field: language, op: eq, value: jpn}"
        )));
        assert!(!eval(&parse(
            "container_metadata: {field: studio, op: exists}"
        )));
    }
}
