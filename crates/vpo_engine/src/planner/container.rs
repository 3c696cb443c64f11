//! Container conversion decision.

use vpo_inspect::{ContainerKind, Inspection, Track, TrackKind};
use vpo_policy::{Action, ContainerPolicy, OnIncompatible};

/// Decide whether to convert the container. Returns `Err` with a message
/// when incompatible tracks exist and the policy says to fail.
pub fn plan(
    inspection: &Inspection,
    policy: &ContainerPolicy,
) -> Result<Option<Action>, String> {
    if inspection.container == policy.target {
        return Ok(None);
    }

    let incompatible: Vec<&Track> = inspection
        .tracks
        .iter()
        .filter(|t| !carries(policy.target, t))
        .collect();

    if !incompatible.is_empty() {
        match policy.on_incompatible {
            OnIncompatible::Error => {
                let listing: Vec<String> = incompatible
                    .iter()
                    .map(|t| format!("#{} {} ({})", t.index, t.codec, t.kind))
                    .collect();
                return Err(format!(
                    "cannot convert to {}: incompatible tracks: {}",
                    policy.target,
                    listing.join(", ")
                ));
            }
            OnIncompatible::Skip => return Ok(None),
            // The execution engine transcodes incompatible streams.
            OnIncompatible::Transcode => {}
        }
    }

    Ok(Some(Action::ConvertContainer {
        target: policy.target,
        on_incompatible: policy.on_incompatible,
        preserve_metadata: policy.preserve_metadata,
    }))
}

/// Whether `target` can carry the track without re-encoding.
fn carries(target: ContainerKind, track: &Track) -> bool {
    let codec = track.codec.as_str();
    match target {
        // Matroska takes everything.
        ContainerKind::Mkv => true,
        ContainerKind::Mp4 => match track.kind {
            TrackKind::Video => !matches!(codec, "theora"),
            TrackKind::Audio => !matches!(codec, "truehd" | "mlp" | "pcm_s16le" | "pcm_s24le"),
            TrackKind::Subtitle => matches!(codec, "mov_text" | "tx3g"),
            TrackKind::Attachment => false,
        },
        ContainerKind::Webm => match track.kind {
            TrackKind::Video => matches!(codec, "vp8" | "vp9" | "av1"),
            TrackKind::Audio => matches!(codec, "opus" | "vorbis"),
            TrackKind::Subtitle => matches!(codec, "webvtt"),
            TrackKind::Attachment => false,
        },
        // No compatibility model for unknown targets; let it through.
        ContainerKind::Other => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mkv_with_pgs() -> Inspection {
        Inspection::new("/m/x.mkv", ContainerKind::Mkv).with_tracks(vec![
            Track::video(0, "h264"),
            Track::audio(1, "aac", "eng"),
            Track::subtitle(2, "hdmv_pgs_subtitle", "eng"),
        ])
    }

    #[test]
    fn same_container_is_a_no_op() {
        let policy = ContainerPolicy {
            target: ContainerKind::Mkv,
            on_incompatible: OnIncompatible::Error,
            preserve_metadata: true,
        };
        assert!(plan(&mkv_with_pgs(), &policy).unwrap().is_none());
    }

    #[test]
    fn incompatible_with_error_mode_fails() {
        let policy = ContainerPolicy {
            target: ContainerKind::Mp4,
            on_incompatible: OnIncompatible::Error,
            preserve_metadata: true,
        };
        let err = plan(&mkv_with_pgs(), &policy).unwrap_err();
        assert!(err.contains("hdmv_pgs_subtitle"));
    }

    #[test]
    fn incompatible_with_skip_mode_drops_the_conversion() {
        let policy = ContainerPolicy {
            target: ContainerKind::Mp4,
            on_incompatible: OnIncompatible::Skip,
            preserve_metadata: true,
        };
        assert!(plan(&mkv_with_pgs(), &policy).unwrap().is_none());
    }

    #[test]
    fn incompatible_with_transcode_mode_converts_anyway() {
        let policy = ContainerPolicy {
            target: ContainerKind::Mp4,
            on_incompatible: OnIncompatible::Transcode,
            preserve_metadata: false,
        };
        let action = plan(&mkv_with_pgs(), &policy).unwrap().unwrap();
        assert!(matches!(
            action,
            Action::ConvertContainer {
                target: ContainerKind::Mp4,
                on_incompatible: OnIncompatible::Transcode,
                preserve_metadata: false,
            }
        ));
    }
}
