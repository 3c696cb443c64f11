//! Per-phase action planner.
//!
//! `plan_phase` runs the enabled operations of one phase in the
//! canonical order (container, filters, order, flags, rules, synthesis,
//! transcode, transcription), mutating the working view as it emits
//! actions so that each step and every later phase sees the virtual
//! result of everything planned before it.

mod apply;
mod container;
mod flags;
mod order;
mod rules;
mod synthesis;
mod track_filter;
mod transcode;

pub(crate) use apply::apply_action;

use crate::conditions::EvalError;
use crate::filters::{CompiledPatterns, TrackClasses};
use vpo_inspect::{InspectionView, Track, TrackKind};
use vpo_policy::{Action, Phase, Policy};

/// Everything a planning step needs besides the view.
pub struct PlanContext<'a> {
    pub policy: &'a Policy,
    pub patterns: &'a CompiledPatterns,
    /// External music/SFX/non-speech classifier; `None` falls back to
    /// the conservative title heuristic.
    pub classifier: Option<&'a dyn Fn(&Track) -> TrackClasses>,
    /// Template values of the file under evaluation.
    pub filename: String,
    pub path: String,
}

impl<'a> PlanContext<'a> {
    pub fn classify(&self, track: &Track) -> TrackClasses {
        match self.classifier {
            Some(classify) => classify(track),
            None => crate::filters::classify_track(track),
        }
    }
}

/// Skip flags raised by rule-issued `skip_operation` actions; consulted
/// by the transcode step of the same phase. A `track_filter` skip has
/// no planner-side effect since filters run before rules; the action
/// still reaches the execution engine.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SkipFlags {
    pub video_transcode: bool,
    pub audio_transcode: bool,
}

/// Result of planning one phase.
#[derive(Debug, Default)]
pub struct PhaseResult {
    pub actions: Vec<Action>,
    pub warnings: Vec<String>,
    pub notes: Vec<String>,
    /// A `Fail` fired or a filter was unsatisfiable; actions hold
    /// everything planned before the fail point.
    pub failure: Option<String>,
}

impl PhaseResult {
    fn push(&mut self, view: &mut InspectionView, ctx: &PlanContext<'_>, action: Action) {
        apply_action(view, &action, ctx);
        self.actions.push(action);
    }
}

/// Plan one phase against the current virtual view.
pub fn plan_phase(
    view: &mut InspectionView,
    phase: &Phase,
    ctx: &PlanContext<'_>,
) -> Result<PhaseResult, EvalError> {
    let mut out = PhaseResult::default();
    let mut skips = SkipFlags::default();
    let ops = &phase.ops;

    // 1. Container conversion decision.
    if let Some(container) = &ops.container {
        match container::plan(view.current(), container) {
            Ok(Some(action)) => out.push(view, ctx, action),
            Ok(None) => {}
            Err(message) => {
                out.failure = Some(message);
                return Ok(out);
            }
        }
    }

    // 2. Track filters.
    if let Some(audio) = &ops.audio_filter {
        match track_filter::plan_audio(view.current(), audio, ctx) {
            Ok(Some(action)) => out.push(view, ctx, action),
            Ok(None) => {}
            Err(message) => {
                out.failure = Some(message);
                return Ok(out);
            }
        }
    }
    if let Some(subs) = &ops.subtitle_filter {
        if let Some(action) = track_filter::plan_subtitles(view.current(), subs) {
            out.push(view, ctx, action);
        }
    }
    if let Some(attachments) = &ops.attachment_filter {
        if let Some(action) = track_filter::plan_attachments(view.current(), attachments) {
            out.push(view, ctx, action);
        }
    }

    // 3. Track ordering over survivors.
    if let Some(categories) = &ops.track_order {
        let permutation = order::plan(view.current(), categories, ctx);
        out.push(view, ctx, Action::ReorderTracks { permutation });
    }

    // 4. Default-flag diffs against the post-reorder view.
    if let Some(defaults) = &ops.default_flags {
        for action in flags::plan(view.current(), defaults, ctx) {
            out.push(view, ctx, action);
        }
    }

    // 5. Conditional rules.
    if let Some(rule_set) = &ops.rules {
        rules::run(view, rule_set, ctx, &mut out, &mut skips)?;
        if out.failure.is_some() {
            return Ok(out);
        }
    }

    // 6. Audio synthesis.
    if let Some(specs) = &ops.audio_synthesis {
        for spec in specs {
            if let Some(action) = synthesis::plan_one(view, spec, ctx)? {
                out.push(view, ctx, action);
            }
        }
    }

    // 7. Transcode decisions, video then audio.
    if let Some(transcode) = &ops.transcode {
        transcode::plan(view, transcode, ctx, &skips, &mut out);
    }

    // 8. Transcription emits an internal marker only.
    if let Some(transcription) = &ops.transcription {
        if transcription.enabled {
            let mut note = format!("transcription requested for {}", ctx.filename);
            if let Some(hint) = &transcription.language_hint {
                note.push_str(&format!(" (language hint: {})", hint));
            }
            out.notes.push(note);
        }
    }

    Ok(out)
}

/// Surviving audio tracks of a view, in current order.
pub(crate) fn audio_tracks(view: &InspectionView) -> Vec<Track> {
    view.current()
        .tracks_of(TrackKind::Audio)
        .cloned()
        .collect()
}
