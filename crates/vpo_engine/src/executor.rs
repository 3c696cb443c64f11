//! Phase executor.
//!
//! Drives the policy's phases in order against a working virtual view.
//! Each phase plans against the net effect of everything before it; a
//! failing phase is handled per `config.on_error`.

use crate::filters::{CompiledPatterns, TrackClasses};
use crate::plan::{Plan, PlanError};
use crate::planner::{plan_phase, PlanContext};
use tracing::{debug, warn};
use vpo_inspect::{Inspection, InspectionView, Track};
use vpo_policy::{OnErrorMode, Policy};

/// Knobs for one evaluation run.
#[derive(Default)]
pub struct EvalOptions<'a> {
    /// Music/SFX/non-speech classifier; defaults to the conservative
    /// title heuristic when absent.
    pub classifier: Option<&'a dyn Fn(&Track) -> TrackClasses>,
}

/// Evaluate a policy against an inspection, producing the plan.
pub fn build_plan(inspection: &Inspection, policy: &Policy) -> Result<Plan, PlanError> {
    build_plan_with(inspection, policy, &EvalOptions::default())
}

pub fn build_plan_with(
    inspection: &Inspection,
    policy: &Policy,
    options: &EvalOptions<'_>,
) -> Result<Plan, PlanError> {
    let patterns = CompiledPatterns::compile(policy);
    let ctx = PlanContext {
        policy,
        patterns: &patterns,
        classifier: options.classifier,
        filename: inspection.file_name(),
        path: inspection.path.display().to_string(),
    };

    let mut view = InspectionView::new(inspection);
    let mut plan = Plan::default();

    for phase in &policy.phases {
        let checkpoint = view.clone();
        let result = plan_phase(&mut view, phase, &ctx)
            .map_err(|e| PlanError::Internal(e.to_string()))?;

        plan.warnings.extend(result.warnings);
        plan.notes.extend(result.notes);

        match result.failure {
            None => {
                debug!(
                    phase = %phase.name,
                    actions = result.actions.len(),
                    "phase planned"
                );
                plan.actions.extend(result.actions);
            }
            Some(message) => match policy.config.on_error {
                OnErrorMode::Stop => {
                    return Err(PlanError::PhaseFailed {
                        phase: phase.name.clone(),
                        message,
                    });
                }
                OnErrorMode::Skip => {
                    warn!(phase = %phase.name, "phase failed, skipping: {}", message);
                    view = checkpoint;
                    plan.warnings
                        .push(format!("phase '{}' skipped: {}", phase.name, message));
                }
                OnErrorMode::Continue => {
                    warn!(phase = %phase.name, "phase failed, continuing: {}", message);
                    plan.actions.extend(result.actions);
                    plan.warnings
                        .push(format!("phase '{}' failed: {}", phase.name, message));
                }
            },
        }
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vpo_inspect::{ContainerKind, TrackKind};
    use vpo_policy::{load_policy_str, Action};

    fn inspection() -> Inspection {
        Inspection::new("/media/show.mkv", ContainerKind::Mkv).with_tracks(vec![
            Track::video(0, "hevc").with_resolution(1920, 1080),
            Track::audio(1, "aac", "eng").with_channels(2),
            Track::audio(2, "eac3", "jpn").with_channels(6),
            Track::subtitle(3, "subrip", "eng"),
        ])
    }

    #[test]
    fn plans_are_deterministic() {
        let policy = load_policy_str(
            r#"
schema_version: 13
audio_language_preference: [jpn, eng]
phases:
  - name: cleanup
    audio_filter:
      languages: [jpn, eng]
    track_order: [video, audio_main, audio_alternate, subtitle_main]
    default_flags:
      set_preferred_audio_default: true
"#,
        )
        .unwrap()
        .policy;
        let ins = inspection();
        let a = build_plan(&ins, &policy).unwrap();
        let b = build_plan(&ins, &policy).unwrap();
        assert_eq!(
            serde_json::to_string(&a.actions).unwrap(),
            serde_json::to_string(&b.actions).unwrap()
        );
    }

    #[test]
    fn later_phase_sees_earlier_phase_effects() {
        // Phase 1 removes eng audio; phase 2's rule must not see it.
        let policy = load_policy_str(
            r#"
schema_version: 13
phases:
  - name: strip
    audio_filter:
      languages: [jpn]
  - name: check
    rules:
      items:
        - name: eng_gone
          when:
            exists:
              track_kind: audio
              filters:
                language: eng
          then:
            - warn:
                message: "still there"
          else:
            - set_default:
                track_kind: audio
                language: jpn
                value: true
"#,
        )
        .unwrap()
        .policy;
        let plan = build_plan(&inspection(), &policy).unwrap();
        assert!(plan.warnings.is_empty());
        assert!(plan.actions.iter().any(|a| matches!(
            a,
            Action::SetDefault { track_kind: TrackKind::Audio, value: true, .. }
        )));
    }

    #[test]
    fn stop_mode_propagates_the_failure() {
        let policy = load_policy_str(
            r#"
schema_version: 13
config:
  on_error: stop
phases:
  - name: guard
    rules:
      items:
        - name: always
          when:
            exists:
              track_kind: video
          then:
            - fail:
                message: "rejected {filename}"
"#,
        )
        .unwrap()
        .policy;
        let err = build_plan(&inspection(), &policy).unwrap_err();
        match err {
            PlanError::PhaseFailed { phase, message } => {
                assert_eq!(phase, "guard");
                assert_eq!(message, "rejected show.mkv");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn continue_mode_keeps_actions_up_to_the_fail_point() {
        let policy = load_policy_str(
            r#"
schema_version: 13
config:
  on_error: continue
phases:
  - name: partial
    rules:
      match: all
      items:
        - name: first
          when:
            exists:
              track_kind: video
          then:
            - set_default:
                track_kind: video
                value: true
        - name: boom
          when:
            exists:
              track_kind: video
          then:
            - fail:
                message: "late failure"
"#,
        )
        .unwrap()
        .policy;
        let plan = build_plan(&inspection(), &policy).unwrap();
        assert!(plan
            .actions
            .iter()
            .any(|a| matches!(a, Action::SetDefault { .. })));
        assert!(plan.warnings.iter().any(|w| w.contains("late failure")));
    }
}
