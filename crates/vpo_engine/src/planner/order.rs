//! Track ordering.
//!
//! For each declared category, append the surviving tracks that fall in
//! it; anything uncategorized follows in source order. The result is a
//! full permutation of surviving track indices.

use super::PlanContext;
use std::collections::BTreeSet;
use vpo_inspect::{Inspection, Track, TrackKind};
use vpo_policy::TrackCategory;

pub fn plan(
    inspection: &Inspection,
    categories: &[TrackCategory],
    ctx: &PlanContext<'_>,
) -> Vec<usize> {
    let mut permutation = Vec::with_capacity(inspection.tracks.len());
    let mut placed: BTreeSet<usize> = BTreeSet::new();

    for category in categories {
        for index in members(inspection, *category, ctx) {
            if placed.insert(index) {
                permutation.push(index);
            }
        }
    }

    // Uncategorized survivors, in source order.
    let mut rest: Vec<usize> = inspection
        .tracks
        .iter()
        .map(|t| t.index)
        .filter(|i| !placed.contains(i))
        .collect();
    rest.sort_unstable();
    permutation.extend(rest);
    permutation
}

/// Surviving members of one category. Source-index order, except
/// `subtitle_main` which prefers the earliest language of the subtitle
/// preference list.
fn members(
    inspection: &Inspection,
    category: TrackCategory,
    ctx: &PlanContext<'_>,
) -> Vec<usize> {
    let commentary = |t: &Track| ctx.patterns.is_commentary(t);
    let main_audio_language = ctx
        .policy
        .audio_language_preference
        .first()
        .map(|s| s.to_lowercase());

    let mut selected: Vec<&Track> = inspection
        .tracks
        .iter()
        .filter(|t| match category {
            TrackCategory::Video => t.kind == TrackKind::Video,
            TrackCategory::AudioMain => {
                t.kind == TrackKind::Audio
                    && !commentary(t)
                    && main_audio_language.as_deref() == Some(t.language.as_str())
            }
            TrackCategory::AudioAlternate => {
                t.kind == TrackKind::Audio
                    && !commentary(t)
                    && main_audio_language.as_deref() != Some(t.language.as_str())
            }
            TrackCategory::AudioCommentary => t.kind == TrackKind::Audio && commentary(t),
            TrackCategory::SubtitleMain => {
                t.kind == TrackKind::Subtitle && !t.is_forced && !commentary(t)
            }
            TrackCategory::SubtitleForced => t.kind == TrackKind::Subtitle && t.is_forced,
            TrackCategory::SubtitleCommentary => t.kind == TrackKind::Subtitle && commentary(t),
            TrackCategory::Attachment => t.kind == TrackKind::Attachment,
        })
        .collect();

    if category == TrackCategory::SubtitleMain {
        let rank = |t: &Track| {
            ctx.policy
                .subtitle_language_preference
                .iter()
                .position(|lang| lang.to_lowercase() == t.language)
                .unwrap_or(usize::MAX)
        };
        selected.sort_by_key(|t| (rank(t), t.index));
    } else {
        selected.sort_by_key(|t| t.index);
    }

    selected.into_iter().map(|t| t.index).collect()
}
