//! Application of planned actions to the working view.
//!
//! Keeps the virtual inspection in lockstep with the emitted plan so
//! every later step and phase sees the net effect of what was planned.

use super::PlanContext;
use crate::planner::synthesis;
use vpo_inspect::{InspectionView, TrackKind};
use vpo_policy::Action;

pub(crate) fn apply_action(view: &mut InspectionView, action: &Action, ctx: &PlanContext<'_>) {
    match action {
        Action::KeepTracks { kind, indices } => view.retain_tracks(*kind, indices),
        Action::ReorderTracks { permutation } => view.reorder(permutation),
        Action::SetDefault {
            track_kind,
            language,
            value,
            track_index,
        } => {
            for index in select_indices(view, *track_kind, language.as_deref(), *track_index) {
                view.set_default(index, *value);
            }
        }
        Action::SetForced {
            track_kind,
            language,
            value,
            track_index,
        } => {
            for index in select_indices(view, *track_kind, language.as_deref(), *track_index) {
                view.set_forced(index, *value);
            }
        }
        Action::SetLanguage {
            track_kind,
            new_language,
            match_language,
            track_index,
        } => {
            for index in select_indices(view, *track_kind, match_language.as_deref(), *track_index)
            {
                view.set_language(index, new_language);
            }
        }
        Action::SetContainerMetadata { field, value } => {
            view.set_container_tag(field, value.as_deref());
        }
        Action::ConvertContainer { target, .. } => view.set_container(*target),
        Action::TranscodeVideo { params } => {
            let indices: Vec<usize> = view
                .current()
                .video_tracks()
                .map(|t| t.index)
                .collect();
            for index in indices {
                view.set_codec(index, &params.codec);
            }
        }
        Action::TranscodeAudio {
            track_index, to, ..
        } => view.set_codec(*track_index, to),
        Action::CreateSynthesizedTrack { spec, source_index } => {
            synthesis::materialize(view, spec, *source_index, ctx);
        }
        // No virtual effect.
        Action::SkipOperation { .. } | Action::Warn { .. } | Action::Fail { .. } => {}
    }
}

/// Resolve the tracks a flag/language edit addresses: an explicit index
/// when pinned, otherwise every track of the kind matching the language
/// selector.
fn select_indices(
    view: &InspectionView,
    kind: TrackKind,
    language: Option<&str>,
    track_index: Option<usize>,
) -> Vec<usize> {
    if let Some(index) = track_index {
        return vec![index];
    }
    view.current()
        .tracks_of(kind)
        .filter(|t| match language {
            Some(lang) => t.language == lang.to_lowercase(),
            None => true,
        })
        .map(|t| t.index)
        .collect()
}
