//! Virtual view of an inspection across planning phases.
//!
//! Each phase plans against the inspection *as if* earlier phases had
//! already executed: removed tracks disappear, reorderings apply, flag
//! and language edits are visible, and synthesized tracks appear as
//! pseudo-tracks. No external tool has run at this point.
//!
//! Original source indices stay stable: removing a track never renumbers
//! the survivors, and synthesized pseudo-tracks are assigned fresh
//! indices above the source range.

use crate::types::{Inspection, Track, TrackKind};
use std::collections::BTreeSet;

/// Mutable overlay over an immutable base inspection.
#[derive(Debug, Clone)]
pub struct InspectionView {
    current: Inspection,
    next_synth_index: usize,
}

impl InspectionView {
    pub fn new(base: &Inspection) -> Self {
        let next_synth_index = base
            .tracks
            .iter()
            .map(|t| t.index + 1)
            .max()
            .unwrap_or(0);
        Self {
            current: base.clone(),
            next_synth_index,
        }
    }

    /// The inspection as the next phase will see it.
    pub fn current(&self) -> &Inspection {
        &self.current
    }

    /// Consume the view, yielding the final virtual inspection.
    pub fn into_inspection(self) -> Inspection {
        self.current
    }

    /// Next free index for a synthesized pseudo-track.
    pub fn allocate_index(&mut self) -> usize {
        let idx = self.next_synth_index;
        self.next_synth_index += 1;
        idx
    }

    /// Drop every track of `kind` whose index is not in `keep`.
    pub fn retain_tracks(&mut self, kind: TrackKind, keep: &BTreeSet<usize>) {
        self.current
            .tracks
            .retain(|t| t.kind != kind || keep.contains(&t.index));
    }

    /// Reorder tracks to the given index permutation. Indices absent from
    /// the permutation keep their relative order after the permuted ones;
    /// the executor never produces such a permutation, but the view stays
    /// total anyway.
    pub fn reorder(&mut self, permutation: &[usize]) {
        let mut reordered = Vec::with_capacity(self.current.tracks.len());
        for &index in permutation {
            if let Some(pos) = self.current.tracks.iter().position(|t| t.index == index) {
                reordered.push(self.current.tracks.remove(pos));
            }
        }
        reordered.append(&mut self.current.tracks);
        self.current.tracks = reordered;
    }

    pub fn set_default(&mut self, index: usize, value: bool) {
        if let Some(track) = self.track_mut(index) {
            track.is_default = value;
        }
    }

    pub fn set_forced(&mut self, index: usize, value: bool) {
        if let Some(track) = self.track_mut(index) {
            track.is_forced = value;
        }
    }

    pub fn set_language(&mut self, index: usize, language: &str) {
        if let Some(track) = self.track_mut(index) {
            track.language = language.to_lowercase();
        }
    }

    /// Virtual effect of a planned transcode: the track's codec changes.
    pub fn set_codec(&mut self, index: usize, codec: &str) {
        if let Some(track) = self.track_mut(index) {
            track.codec = codec.to_lowercase();
        }
    }

    pub fn set_container(&mut self, container: crate::types::ContainerKind) {
        self.current.container = container;
    }

    /// Set or delete a container-level metadata tag.
    pub fn set_container_tag(&mut self, field: &str, value: Option<&str>) {
        match value {
            Some(v) => {
                self.current
                    .container_metadata
                    .insert(field.to_string(), v.to_string());
            }
            None => {
                self.current.container_metadata.remove(field);
            }
        }
    }

    /// Insert a synthesized pseudo-track at `position` within the track
    /// list (clamped to the end).
    pub fn insert_track(&mut self, track: Track, position: usize) {
        let position = position.min(self.current.tracks.len());
        self.current.tracks.insert(position, track);
    }

    fn track_mut(&mut self, index: usize) -> Option<&mut Track> {
        self.current.tracks.iter_mut().find(|t| t.index == index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContainerKind;

    fn base() -> Inspection {
        Inspection::new("/media/show.mkv", ContainerKind::Mkv).with_tracks(vec![
            Track::video(0, "h264"),
            Track::audio(1, "dts", "eng"),
            Track::audio(2, "aac", "jpn"),
            Track::subtitle(3, "subrip", "eng"),
        ])
    }

    #[test]
    fn retain_keeps_only_listed_indices() {
        let ins = base();
        let mut view = InspectionView::new(&ins);
        let keep: BTreeSet<usize> = [2].into_iter().collect();
        view.retain_tracks(TrackKind::Audio, &keep);

        let audio: Vec<usize> = view.current().audio_tracks().map(|t| t.index).collect();
        assert_eq!(audio, vec![2]);
        // Other kinds untouched.
        assert_eq!(view.current().tracks.len(), 3);
    }

    #[test]
    fn reorder_applies_permutation() {
        let ins = base();
        let mut view = InspectionView::new(&ins);
        view.reorder(&[0, 2, 1, 3]);
        let order: Vec<usize> = view.current().tracks.iter().map(|t| t.index).collect();
        assert_eq!(order, vec![0, 2, 1, 3]);
    }

    #[test]
    fn synthesized_track_gets_fresh_index() {
        let ins = base();
        let mut view = InspectionView::new(&ins);
        let idx = view.allocate_index();
        assert_eq!(idx, 4);
        let track = Track::audio(idx, "aac", "eng").with_channels(2);
        view.insert_track(track, 3);
        assert_eq!(view.current().tracks[3].index, 4);
    }

    #[test]
    fn flag_edits_are_visible() {
        let ins = base();
        let mut view = InspectionView::new(&ins);
        view.set_default(2, true);
        view.set_forced(3, true);
        view.set_language(1, "FRA");
        let current = view.current();
        assert!(current.track_by_index(2).unwrap().is_default);
        assert!(current.track_by_index(3).unwrap().is_forced);
        assert_eq!(current.track_by_index(1).unwrap().language, "fra");
    }
}
