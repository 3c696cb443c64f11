//! Default-flag computation.
//!
//! Produces a diff against the current (post-reorder, virtual) view:
//! actions are emitted only for tracks whose flag actually changes, each
//! pinned to its track index.

use super::PlanContext;
use std::collections::{BTreeMap, BTreeSet};
use vpo_inspect::{Inspection, Track, TrackKind};
use vpo_policy::{Action, DefaultFlagsPolicy};

pub fn plan(
    inspection: &Inspection,
    policy: &DefaultFlagsPolicy,
    ctx: &PlanContext<'_>,
) -> Vec<Action> {
    let mut desired_default: BTreeMap<usize, bool> = BTreeMap::new();
    let mut desired_forced: BTreeMap<usize, bool> = BTreeMap::new();
    let mut selected: BTreeSet<usize> = BTreeSet::new();

    if policy.set_first_video_default {
        let mut videos = inspection.video_tracks();
        if let Some(first) = videos.next() {
            desired_default.insert(first.index, true);
            selected.insert(first.index);
            for other in videos {
                desired_default.insert(other.index, false);
            }
        }
    }

    let audio: Vec<&Track> = inspection.audio_tracks().collect();
    let subtitles: Vec<&Track> = inspection.subtitle_tracks().collect();

    let chosen_audio = if policy.set_preferred_audio_default {
        let chosen = preferred_track(&audio, &ctx.policy.audio_language_preference, |track| {
            match &policy.preferred_audio_codec {
                Some(codecs) => codecs.contains_lowercase(&track.codec),
                None => true,
            }
        });
        if let Some(track) = chosen {
            desired_default.insert(track.index, true);
            selected.insert(track.index);
            for other in &audio {
                if other.index != track.index {
                    desired_default.insert(other.index, false);
                }
            }
        }
        chosen
    } else {
        None
    };

    if policy.set_preferred_subtitle_default {
        let chosen = preferred_track(&subtitles, &ctx.policy.subtitle_language_preference, |_| {
            true
        });
        if let Some(track) = chosen {
            desired_default.insert(track.index, true);
            selected.insert(track.index);
            for other in &subtitles {
                if other.index != track.index {
                    desired_default.insert(other.index, false);
                }
            }
        }
    }

    // Subtitle aid when the default audio is not in the file's language.
    if policy.set_subtitle_default_when_audio_differs
        || policy.set_subtitle_forced_when_audio_differs
    {
        let audio_language = chosen_audio
            .map(|t| t.language.clone())
            .or_else(|| {
                inspection
                    .audio_tracks()
                    .find(|t| t.is_default)
                    .map(|t| t.language.clone())
            })
            .or_else(|| inspection.audio_tracks().next().map(|t| t.language.clone()));
        let content = inspection.content_language();

        if let (Some(audio_language), Some(content)) = (audio_language, content) {
            if audio_language != content {
                if let Some(subtitle) = inspection
                    .subtitle_tracks()
                    .find(|t| t.language == content)
                {
                    if policy.set_subtitle_default_when_audio_differs {
                        desired_default.insert(subtitle.index, true);
                        selected.insert(subtitle.index);
                    }
                    if policy.set_subtitle_forced_when_audio_differs {
                        desired_forced.insert(subtitle.index, true);
                    }
                }
            }
        }
    }

    if policy.clear_other_defaults {
        for track in &inspection.tracks {
            if !selected.contains(&track.index) {
                desired_default.entry(track.index).or_insert(false);
            }
        }
    }

    emit_diffs(inspection, &desired_default, &desired_forced)
}

/// First track (in current order) matching the earliest preference entry
/// that matches anything, subject to an extra predicate.
fn preferred_track<'a>(
    tracks: &[&'a Track],
    preference: &[String],
    extra: impl Fn(&Track) -> bool,
) -> Option<&'a Track> {
    for lang in preference {
        let lang = lang.to_lowercase();
        if let Some(track) = tracks.iter().find(|t| t.language == lang && extra(t)).copied() {
            return Some(track);
        }
    }
    None
}

fn emit_diffs(
    inspection: &Inspection,
    desired_default: &BTreeMap<usize, bool>,
    desired_forced: &BTreeMap<usize, bool>,
) -> Vec<Action> {
    let mut actions = Vec::new();
    for track in &inspection.tracks {
        if let Some(&value) = desired_default.get(&track.index) {
            if track.is_default != value {
                actions.push(Action::SetDefault {
                    track_kind: track.kind,
                    language: Some(track.language.clone()),
                    value,
                    track_index: Some(track.index),
                });
            }
        }
        if let Some(&value) = desired_forced.get(&track.index) {
            if track.is_forced != value {
                actions.push(Action::SetForced {
                    track_kind: track.kind,
                    language: Some(track.language.clone()),
                    value,
                    track_index: Some(track.index),
                });
            }
        }
    }
    actions
}
