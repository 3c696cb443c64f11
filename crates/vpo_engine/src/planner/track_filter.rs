//! Audio / subtitle / attachment filtering.
//!
//! The audio filter must never produce an empty keep set unless the
//! policy explicitly asked for an error or the source has no audio: a
//! would-be empty (or below-minimum) result triggers the configured
//! fallback before the action is emitted.

use super::PlanContext;
use std::collections::BTreeSet;
use vpo_inspect::{Inspection, Track, TrackKind};
use vpo_policy::{
    Action, AttachmentFilterPolicy, AudioFilterPolicy, FallbackMode, SubtitleFilterPolicy,
};

pub fn plan_audio(
    inspection: &Inspection,
    policy: &AudioFilterPolicy,
    ctx: &PlanContext<'_>,
) -> Result<Option<Action>, String> {
    let tracks: Vec<&Track> = inspection.audio_tracks().collect();
    if tracks.is_empty() {
        return Ok(None);
    }

    let mut kept: BTreeSet<usize> = BTreeSet::new();
    for track in &tracks {
        let classes = ctx.classify(track);
        let removed_by_class = (classes.music && !policy.keep_music_tracks)
            || (classes.sfx && !policy.keep_sfx_tracks)
            || (classes.non_speech && !policy.keep_non_speech_tracks);
        if removed_by_class {
            continue;
        }

        let always_keep = (classes.music && policy.exclude_music_from_language_filter)
            || (classes.sfx && policy.exclude_sfx_from_language_filter)
            || (classes.non_speech && policy.exclude_non_speech_from_language_filter);
        if always_keep {
            kept.insert(track.index);
            continue;
        }

        if language_matches(&policy.languages, track) {
            kept.insert(track.index);
        }
    }

    // Keep-at-least-one invariant: a result below the minimum (floor 1)
    // goes through the fallback.
    let need = policy.minimum.max(1);
    if kept.len() < need {
        match policy.fallback.map(|f| f.mode) {
            Some(FallbackMode::ContentLanguage) => {
                if let Some(declared) = inspection.content_language() {
                    for track in &tracks {
                        if track.language == declared {
                            kept.insert(track.index);
                        }
                    }
                }
                // The declared language may not exist on any audio track;
                // degrade to the most common audio language.
                if kept.len() < need {
                    if let Some(majority) = majority_audio_language(&tracks) {
                        for track in &tracks {
                            if track.language == majority {
                                kept.insert(track.index);
                            }
                        }
                    }
                }
            }
            Some(FallbackMode::KeepAll) => {
                kept.extend(tracks.iter().map(|t| t.index));
            }
            Some(FallbackMode::KeepFirst) => {
                if let Some(first) = tracks.iter().map(|t| t.index).min() {
                    kept.insert(first);
                }
            }
            Some(FallbackMode::Error) => {
                return Err(format!(
                    "audio filter kept {} of {} required track(s) for {}",
                    kept.len(),
                    need,
                    inspection.file_name()
                ));
            }
            None => {}
        }
    }

    // Keep-at-least-one backstop: only the error fallback may leave the
    // result empty while audio is present. Covers both the no-fallback
    // case and fallbacks that found nothing to add (e.g.
    // content_language against all-und tracks).
    if kept.is_empty() {
        if let Some(first) = tracks.iter().map(|t| t.index).min() {
            kept.insert(first);
        }
    }

    Ok(Some(Action::KeepTracks {
        kind: TrackKind::Audio,
        indices: kept,
    }))
}

pub fn plan_subtitles(inspection: &Inspection, policy: &SubtitleFilterPolicy) -> Option<Action> {
    if policy.remove_all {
        return Some(Action::KeepTracks {
            kind: TrackKind::Subtitle,
            indices: BTreeSet::new(),
        });
    }

    let tracks: Vec<&Track> = inspection.subtitle_tracks().collect();
    if tracks.is_empty() {
        return None;
    }

    let mut kept: BTreeSet<usize> = tracks
        .iter()
        .filter(|t| language_matches(&policy.languages, t))
        .map(|t| t.index)
        .collect();

    if policy.preserve_forced {
        kept.extend(tracks.iter().filter(|t| t.is_forced).map(|t| t.index));
    }

    Some(Action::KeepTracks {
        kind: TrackKind::Subtitle,
        indices: kept,
    })
}

pub fn plan_attachments(
    inspection: &Inspection,
    policy: &AttachmentFilterPolicy,
) -> Option<Action> {
    let _ = inspection;
    if policy.remove_all {
        Some(Action::KeepTracks {
            kind: TrackKind::Attachment,
            indices: BTreeSet::new(),
        })
    } else {
        None
    }
}

/// Empty preference list keeps any language.
fn language_matches(languages: &[String], track: &Track) -> bool {
    languages.is_empty()
        || languages
            .iter()
            .any(|lang| lang.to_lowercase() == track.language)
}

fn majority_audio_language(tracks: &[&Track]) -> Option<String> {
    let mut counts: std::collections::BTreeMap<&str, usize> = std::collections::BTreeMap::new();
    for track in tracks {
        if track.has_language() {
            *counts.entry(track.language.as_str()).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .max_by_key(|(_, n)| *n)
        .map(|(lang, _)| lang.to_string())
}
