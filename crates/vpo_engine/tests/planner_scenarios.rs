//! End-to-end planning scenarios over loaded policies.

use vpo_engine::build_plan;
use vpo_inspect::{ContainerKind, Inspection, Track, TrackKind};
use vpo_policy::{load_policy_str, Action, SkipKind};

fn load(text: &str) -> vpo_policy::Policy {
    load_policy_str(text).expect("policy loads").policy
}

#[test]
fn first_match_rule_wins() {
    let inspection = Inspection::new("/media/film.mkv", ContainerKind::Mkv).with_tracks(vec![
        Track::audio(0, "aac", "eng").with_channels(2),
        Track::audio(1, "eac3", "jpn").with_channels(6),
    ]);
    let policy = load(
        r#"
schema_version: 13
phases:
  - name: defaults
    rules:
      match: first
      items:
        - name: prefer_jpn
          when:
            exists:
              track_kind: audio
              filters:
                language: jpn
          then:
            - set_default:
                track_kind: audio
                language: jpn
                value: true
        - name: fallback_eng
          when:
            exists:
              track_kind: audio
              filters:
                language: eng
          then:
            - set_default:
                track_kind: audio
                language: eng
                value: true
"#,
    );

    let plan = build_plan(&inspection, &policy).unwrap();
    let defaults: Vec<&Action> = plan
        .actions
        .iter()
        .filter(|a| matches!(a, Action::SetDefault { .. }))
        .collect();
    assert_eq!(defaults.len(), 1);
    match defaults[0] {
        Action::SetDefault {
            track_kind,
            language,
            value,
            ..
        } => {
            assert_eq!(*track_kind, TrackKind::Audio);
            assert_eq!(language.as_deref(), Some("jpn"));
            assert!(*value);
        }
        other => panic!("unexpected action: {:?}", other),
    }
}

#[test]
fn audio_filter_falls_back_to_content_language() {
    let inspection = Inspection::new("/media/film.mkv", ContainerKind::Mkv)
        .with_tracks(vec![Track::audio(0, "aac", "fra").with_channels(2)])
        .with_container_tag("language", "eng");
    let policy = load(
        r#"
schema_version: 13
audio_filter:
  languages: [eng]
  minimum: 1
  fallback:
    mode: content_language
"#,
    );

    let plan = build_plan(&inspection, &policy).unwrap();
    let keep = plan
        .actions
        .iter()
        .find_map(|a| match a {
            Action::KeepTracks {
                kind: TrackKind::Audio,
                indices,
            } => Some(indices),
            _ => None,
        })
        .expect("audio keep action");
    assert!(keep.contains(&0));
    assert!(plan.warnings.is_empty());
}

#[test]
fn synthesis_skips_when_equivalent_track_exists() {
    let inspection = Inspection::new("/media/film.mkv", ContainerKind::Mkv).with_tracks(vec![
        Track::audio(0, "truehd", "eng").with_channels(6),
        Track::audio(1, "aac", "eng").with_channels(2),
    ]);
    let policy = load(
        r#"
schema_version: 13
audio_synthesis:
  - name: stereo
    codec: aac
    channels: 2
    source_prefer:
      - language: eng
    skip_if_exists:
      codec: aac
      channels:
        op: eq
        value: 2
      language: eng
"#,
    );

    let plan = build_plan(&inspection, &policy).unwrap();
    assert!(!plan
        .actions
        .iter()
        .any(|a| matches!(a, Action::CreateSynthesizedTrack { .. })));
}

#[test]
fn synthesis_fires_and_selects_first_matching_source() {
    let inspection = Inspection::new("/media/film.mkv", ContainerKind::Mkv).with_tracks(vec![
        Track::audio(0, "truehd", "eng").with_channels(8),
        Track::audio(1, "truehd", "jpn").with_channels(8),
    ]);
    let policy = load(
        r#"
schema_version: 13
audio_synthesis:
  - name: stereo
    codec: aac
    channels: 2
    source_prefer:
      - language: eng
    skip_if_exists:
      codec: aac
      channels:
        op: eq
        value: 2
"#,
    );

    let plan = build_plan(&inspection, &policy).unwrap();
    match plan
        .actions
        .iter()
        .find(|a| matches!(a, Action::CreateSynthesizedTrack { .. }))
    {
        Some(Action::CreateSynthesizedTrack { source_index, spec }) => {
            assert_eq!(*source_index, 0);
            assert_eq!(spec.name, "stereo");
        }
        other => panic!("expected synthesis, got {:?}", other),
    }
}

#[test]
fn transcode_skipped_when_bitrate_is_under_limit() {
    let mut video = Track::video(0, "hevc").with_resolution(1920, 1080);
    video.bitrate = Some(4_000_000);
    let inspection =
        Inspection::new("/media/film.mkv", ContainerKind::Mkv).with_tracks(vec![video]);
    let policy = load(
        r#"
schema_version: 13
transcode:
  video:
    target_codec: hevc
    skip_if:
      codec_matches: [hevc]
      bitrate_under: 5M
"#,
    );

    let plan = build_plan(&inspection, &policy).unwrap();
    assert!(plan.actions.iter().any(|a| matches!(
        a,
        Action::SkipOperation {
            kind: SkipKind::VideoTranscode
        }
    )));
    assert!(!plan
        .actions
        .iter()
        .any(|a| matches!(a, Action::TranscodeVideo { .. })));
}

#[test]
fn failing_phase_is_skipped_and_later_phases_still_plan() {
    let inspection = Inspection::new("/media/film.mkv", ContainerKind::Mkv).with_tracks(vec![
        Track::video(0, "hevc"),
        Track::audio(1, "aac", "eng"),
    ]);
    let policy = load(
        r#"
schema_version: 13
config:
  on_error: skip
phases:
  - name: p1
    rules:
      items:
        - name: reject
          when:
            exists:
              track_kind: video
          then:
            - fail:
                message: "no good"
  - name: p2
    track_order: [video, audio_main, audio_alternate]
"#,
    );

    let plan = build_plan(&inspection, &policy).unwrap();
    assert!(plan
        .actions
        .iter()
        .any(|a| matches!(a, Action::ReorderTracks { .. })));
    // Nothing from the failed phase survives.
    assert!(!plan.actions.iter().any(|a| matches!(a, Action::Fail { .. })));
}

#[test]
fn reorder_permutation_covers_exactly_the_survivors() {
    let inspection = Inspection::new("/media/film.mkv", ContainerKind::Mkv).with_tracks(vec![
        Track::video(0, "hevc"),
        Track::audio(1, "aac", "eng"),
        Track::audio(2, "aac", "fra"),
        Track::subtitle(3, "subrip", "eng"),
    ]);
    let policy = load(
        r#"
schema_version: 13
audio_language_preference: [eng]
audio_filter:
  languages: [eng]
track_order: [video, audio_main, subtitle_main]
"#,
    );

    let plan = build_plan(&inspection, &policy).unwrap();
    let permutation = plan
        .actions
        .iter()
        .find_map(|a| match a {
            Action::ReorderTracks { permutation } => Some(permutation.clone()),
            _ => None,
        })
        .expect("reorder action");

    // fra audio was filtered out before ordering.
    let mut sorted = permutation.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, vec![0, 1, 3]);
    // No duplicates.
    let unique: std::collections::BTreeSet<usize> = permutation.iter().copied().collect();
    assert_eq!(unique.len(), permutation.len());
}

#[test]
fn synthesized_track_is_visible_to_later_phases() {
    let inspection = Inspection::new("/media/film.mkv", ContainerKind::Mkv)
        .with_tracks(vec![Track::audio(0, "truehd", "eng").with_channels(8)]);
    let policy = load(
        r#"
schema_version: 13
phases:
  - name: synth
    audio_synthesis:
      - name: stereo
        codec: aac
        channels: 2
        source_prefer:
          - language: eng
  - name: check
    rules:
      items:
        - name: has_stereo_aac
          when:
            exists:
              track_kind: audio
              filters:
                codec: aac
                channels:
                  op: eq
                  value: 2
          then:
            - set_default:
                track_kind: audio
                language: eng
                value: true
          else:
            - fail:
                message: "synthesized track missing"
"#,
    );

    let plan = build_plan(&inspection, &policy).unwrap();
    assert!(plan
        .actions
        .iter()
        .any(|a| matches!(a, Action::SetDefault { .. })));
}
