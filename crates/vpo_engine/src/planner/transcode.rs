//! Transcode decisions: video first, then per-track audio.

use super::{audio_tracks, PhaseResult, PlanContext, SkipFlags};
use vpo_inspect::{InspectionView, Track};
use vpo_policy::{
    parse_bitrate, resolution_bucket, Action, AudioTranscodePolicy, SkipKind, TranscodePolicy,
    VideoSkipIf, VideoTranscodeParams, VideoTranscodePolicy,
};

pub(super) fn plan(
    view: &mut InspectionView,
    policy: &TranscodePolicy,
    ctx: &PlanContext<'_>,
    skips: &SkipFlags,
    out: &mut PhaseResult,
) {
    if let Some(video) = &policy.video {
        plan_video(view, video, ctx, skips, out);
    }
    if let Some(audio) = &policy.audio {
        plan_audio(view, audio, ctx, skips, out);
    }
}

fn plan_video(
    view: &mut InspectionView,
    policy: &VideoTranscodePolicy,
    ctx: &PlanContext<'_>,
    skips: &SkipFlags,
    out: &mut PhaseResult,
) {
    let Some(target) = &policy.target_codec else {
        return;
    };
    if skips.video_transcode {
        return;
    }
    let Some(source) = view.current().video_tracks().next().cloned() else {
        return;
    };

    if let Some(skip_if) = &policy.skip_if {
        if skip_triggers(&source, skip_if) {
            out.push(
                view,
                ctx,
                Action::SkipOperation {
                    kind: SkipKind::VideoTranscode,
                },
            );
            return;
        }
    }

    let params = VideoTranscodeParams {
        codec: target.to_lowercase(),
        quality: policy.quality.clone(),
        scaling: policy.scaling.clone(),
        hardware_backend: policy
            .hardware_acceleration
            .as_ref()
            .map(|hw| hw.backend.clone()),
        fallback_to_cpu: policy
            .hardware_acceleration
            .as_ref()
            .map(|hw| hw.fallback_to_cpu)
            .unwrap_or(false),
    };
    out.push(view, ctx, Action::TranscodeVideo { params });
}

/// All present sub-conditions must hold for the transcode to be skipped.
fn skip_triggers(source: &Track, skip: &VideoSkipIf) -> bool {
    let mut any_present = false;

    if let Some(codecs) = &skip.codec_matches {
        any_present = true;
        if !codecs.contains_lowercase(&source.codec) {
            return false;
        }
    }
    if let Some(bucket) = &skip.resolution_within {
        any_present = true;
        match (resolution_bucket(bucket), source.width, source.height) {
            (Some((max_w, max_h)), Some(w), Some(h)) if w <= max_w && h <= max_h => {}
            _ => return false,
        }
    }
    if let Some(limit) = &skip.bitrate_under {
        any_present = true;
        // Unknown source bitrate means the condition does not hold.
        match (parse_bitrate(limit), source.bitrate) {
            (Some(limit), Some(bitrate)) if bitrate < limit => {}
            _ => return false,
        }
    }
    any_present
}

fn plan_audio(
    view: &mut InspectionView,
    policy: &AudioTranscodePolicy,
    ctx: &PlanContext<'_>,
    skips: &SkipFlags,
    out: &mut PhaseResult,
) {
    if skips.audio_transcode {
        return;
    }
    let preserve: Vec<String> = policy
        .preserve_codecs
        .iter()
        .map(|c| c.to_lowercase())
        .collect();

    for track in audio_tracks(view) {
        if preserve.iter().any(|codec| *codec == track.codec) {
            // Stream-copy is implied; nothing to plan.
            continue;
        }
        out.push(
            view,
            ctx,
            Action::TranscodeAudio {
                track_index: track.index,
                to: policy.transcode_to.to_lowercase(),
                bitrate: policy.transcode_bitrate.clone(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vpo_policy::StringList;

    fn hevc_1080p(bitrate: Option<u64>) -> Track {
        let mut t = Track::video(0, "hevc").with_resolution(1920, 1080);
        t.bitrate = bitrate;
        t
    }

    #[test]
    fn skip_needs_all_present_conditions() {
        let skip = VideoSkipIf {
            codec_matches: Some(StringList(vec!["hevc".into()])),
            resolution_within: None,
            bitrate_under: Some("5M".into()),
        };
        assert!(skip_triggers(&hevc_1080p(Some(4_000_000)), &skip));
        // Bitrate over the limit: no skip.
        assert!(!skip_triggers(&hevc_1080p(Some(6_000_000)), &skip));
        // Unknown bitrate: condition false, no skip.
        assert!(!skip_triggers(&hevc_1080p(None), &skip));
    }

    #[test]
    fn resolution_bucket_is_a_max_box() {
        let skip = VideoSkipIf {
            codec_matches: None,
            resolution_within: Some("1080p".into()),
            bitrate_under: None,
        };
        assert!(skip_triggers(&hevc_1080p(None), &skip));
        let mut uhd = hevc_1080p(None);
        uhd.width = Some(3840);
        uhd.height = Some(2160);
        assert!(!skip_triggers(&uhd, &skip));
    }

    #[test]
    fn empty_skip_if_never_triggers() {
        assert!(!skip_triggers(&hevc_1080p(Some(1)), &VideoSkipIf::default()));
    }
}
