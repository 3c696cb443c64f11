//! Conditional rule execution.
//!
//! With `match: first`, iteration stops after the first rule whose
//! `when` evaluates true; rules whose `when` is false still fire their
//! `else` branch and iteration continues past them. With `match: all`,
//! every rule is processed.

use super::{PhaseResult, PlanContext, SkipFlags};
use crate::conditions::{evaluate, EvalError};
use vpo_inspect::InspectionView;
use vpo_policy::{expand_template, Action, MatchMode, RuleSet, SkipKind, TemplateContext};

pub(super) fn run(
    view: &mut InspectionView,
    rule_set: &RuleSet,
    ctx: &PlanContext<'_>,
    out: &mut PhaseResult,
    skips: &mut SkipFlags,
) -> Result<(), EvalError> {
    for rule in &rule_set.items {
        let matched = evaluate(&rule.when, view.current(), ctx.patterns)?;
        let branch = if matched {
            Some(rule.then.as_slice())
        } else {
            rule.otherwise.as_deref()
        };

        if let Some(actions) = branch {
            let template_ctx = TemplateContext {
                filename: &ctx.filename,
                path: &ctx.path,
                rule_name: &rule.name,
            };
            for action in actions {
                match action {
                    Action::Warn { message } => {
                        out.warnings.push(expand_template(message, &template_ctx));
                        out.actions.push(action.clone());
                    }
                    Action::Fail { message } => {
                        out.failure = Some(expand_template(message, &template_ctx));
                        return Ok(());
                    }
                    Action::SkipOperation { kind } => {
                        match kind {
                            SkipKind::VideoTranscode => skips.video_transcode = true,
                            SkipKind::AudioTranscode => skips.audio_transcode = true,
                            // Filters already ran this phase; the skip
                            // only matters to the execution engine.
                            SkipKind::TrackFilter => {}
                        }
                        out.push(view, ctx, action.clone());
                    }
                    other => out.push(view, ctx, other.clone()),
                }
            }
        }

        if matched && rule_set.match_mode == MatchMode::First {
            break;
        }
    }
    Ok(())
}
