//! Audio-synthesis planning.
//!
//! Each spec selects exactly one source track: the first audio track in
//! source order matching every `source_prefer` criterion. A synthesis is
//! dropped when its `create_if` is false, when `skip_if_exists` matches
//! a surviving track, or when no source qualifies.

use super::{audio_tracks, PlanContext};
use crate::conditions::{evaluate, EvalError};
use vpo_inspect::{InspectionView, Track, TrackKind};
use vpo_policy::{
    Action, NamedSynthPosition, SkipIfExists, SourceCriterion, SynthPosition, SynthesisSpec,
};

pub(super) fn plan_one(
    view: &mut InspectionView,
    spec: &SynthesisSpec,
    ctx: &PlanContext<'_>,
) -> Result<Option<Action>, EvalError> {
    if let Some(create_if) = &spec.create_if {
        if !evaluate(create_if, view.current(), ctx.patterns)? {
            return Ok(None);
        }
    }

    let surviving = audio_tracks(view);
    if let Some(skip) = &spec.skip_if_exists {
        if surviving.iter().any(|t| exists_match(t, skip, ctx)) {
            return Ok(None);
        }
    }

    let mut by_source_index: Vec<&Track> = surviving.iter().collect();
    by_source_index.sort_by_key(|t| t.index);
    let source = by_source_index.into_iter().find(|track| {
        spec.source_prefer
            .iter()
            .all(|criterion| criterion_match(track, criterion, ctx))
    });

    match source {
        Some(source) => Ok(Some(Action::CreateSynthesizedTrack {
            spec: spec.clone(),
            source_index: source.index,
        })),
        None => Ok(None),
    }
}

/// Build the pseudo-track for a planned synthesis and insert it into the
/// view at the spec's position.
pub(crate) fn materialize(
    view: &mut InspectionView,
    spec: &SynthesisSpec,
    source_index: usize,
    _ctx: &PlanContext<'_>,
) {
    let Some(source) = view.current().track_by_index(source_index).cloned() else {
        return;
    };

    let index = view.allocate_index();
    let mut track = Track::new(index, TrackKind::Audio, spec.codec.clone());
    track.language = match spec.language.as_deref() {
        Some("inherit") | None => source.language.clone(),
        Some(lang) => lang.to_lowercase(),
    };
    track.title = match spec.title.as_deref() {
        Some("inherit") => source.title.clone(),
        Some(title) => title.to_string(),
        None => spec.name.clone(),
    };
    track.channels = spec.channels.or(source.channels);
    track.sample_rate = source.sample_rate;

    let position = insertion_position(view, spec.position, source_index);
    view.insert_track(track, position);
}

/// List position for the new track: `end` goes after the last audio
/// track, `after_source` right behind its source, an integer addresses a
/// slot among surviving audio tracks.
fn insertion_position(
    view: &InspectionView,
    position: SynthPosition,
    source_index: usize,
) -> usize {
    let tracks = &view.current().tracks;
    let audio_positions: Vec<usize> = tracks
        .iter()
        .enumerate()
        .filter(|(_, t)| t.kind == TrackKind::Audio)
        .map(|(pos, _)| pos)
        .collect();

    match position {
        SynthPosition::Named(NamedSynthPosition::End) => audio_positions
            .last()
            .map(|pos| pos + 1)
            .unwrap_or(tracks.len()),
        SynthPosition::Named(NamedSynthPosition::AfterSource) => tracks
            .iter()
            .position(|t| t.index == source_index)
            .map(|pos| pos + 1)
            .unwrap_or(tracks.len()),
        SynthPosition::Index(nth) => audio_positions
            .get(nth)
            .copied()
            .or_else(|| audio_positions.last().map(|pos| pos + 1))
            .unwrap_or(tracks.len()),
    }
}

fn criterion_match(track: &Track, criterion: &SourceCriterion, ctx: &PlanContext<'_>) -> bool {
    if let Some(language) = &criterion.language {
        if track.language != language.to_lowercase() {
            return false;
        }
    }
    if let Some(codec) = &criterion.codec {
        if track.codec != codec.to_lowercase() {
            return false;
        }
    }
    if criterion.not_commentary == Some(true) && ctx.patterns.is_commentary(track) {
        return false;
    }
    if let Some(cmp) = &criterion.channels {
        match track.channels {
            Some(channels) => {
                if !cmp.matches(i64::from(channels)) {
                    return false;
                }
            }
            None => return false,
        }
    }
    true
}

/// All present fields of `skip_if_exists` must match for a surviving
/// track to suppress the synthesis.
fn exists_match(track: &Track, skip: &SkipIfExists, ctx: &PlanContext<'_>) -> bool {
    if let Some(codec) = &skip.codec {
        if track.codec != codec.to_lowercase() {
            return false;
        }
    }
    if let Some(cmp) = &skip.channels {
        match track.channels {
            Some(channels) => {
                if !cmp.matches(i64::from(channels)) {
                    return false;
                }
            }
            None => return false,
        }
    }
    if let Some(language) = &skip.language {
        if track.language != language.to_lowercase() {
            return false;
        }
    }
    if skip.not_commentary == Some(true) && ctx.patterns.is_commentary(track) {
        return false;
    }
    true
}
