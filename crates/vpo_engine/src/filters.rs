//! Track filter matching and commentary/class detection.
//!
//! All user-supplied regexes are compiled once per loaded policy and
//! cached in [`CompiledPatterns`]; evaluation only does lookups.

use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use vpo_inspect::Track;
use vpo_policy::{CommentaryPattern, Condition, Policy, TitleMatch, TrackFilters};

enum CommentaryMatcher {
    /// Lowercased needle for case-insensitive substring match.
    Contains(String),
    Regex(Regex),
}

/// Per-policy compiled pattern cache: commentary patterns plus every
/// `title.regex` filter appearing anywhere in the policy.
pub struct CompiledPatterns {
    commentary: Vec<CommentaryMatcher>,
    title_regexes: HashMap<String, Regex>,
}

impl CompiledPatterns {
    /// Compile every pattern in the policy. Load-time validation has
    /// already proven each pattern compiles; patterns that fail anyway
    /// are dropped rather than panicking mid-evaluation.
    pub fn compile(policy: &Policy) -> Self {
        let mut commentary = Vec::new();
        for pattern in &policy.commentary_patterns {
            match pattern {
                CommentaryPattern::Tagged(TitleMatch::Contains(needle)) => {
                    commentary.push(CommentaryMatcher::Contains(needle.to_lowercase()));
                }
                other => {
                    if let Some(source) = other.regex_source() {
                        if let Ok(re) = compile_ci(source) {
                            commentary.push(CommentaryMatcher::Regex(re));
                        }
                    }
                }
            }
        }

        let mut title_regexes = HashMap::new();
        let mut collect = |filters: &TrackFilters| {
            if let Some(TitleMatch::Regex(source)) = &filters.title {
                if !title_regexes.contains_key(source) {
                    if let Ok(re) = compile_ci(source) {
                        title_regexes.insert(source.clone(), re);
                    }
                }
            }
        };
        for_each_filters(policy, &mut collect);

        Self {
            commentary,
            title_regexes,
        }
    }

    /// An empty cache, for contexts without a policy (tests mostly).
    pub fn empty() -> Self {
        Self {
            commentary: Vec::new(),
            title_regexes: HashMap::new(),
        }
    }

    /// A track is commentary iff the plugin explicitly said so, or —
    /// absent a plugin verdict — its title matches a commentary pattern.
    pub fn is_commentary(&self, track: &Track) -> bool {
        if let Some(flag) = track.commentary_override {
            return flag;
        }
        let title_lower = track.title.to_lowercase();
        self.commentary.iter().any(|matcher| match matcher {
            CommentaryMatcher::Contains(needle) => title_lower.contains(needle),
            CommentaryMatcher::Regex(re) => re.is_match(&track.title),
        })
    }

    fn title_matches(&self, title: &str, matcher: &TitleMatch) -> bool {
        match matcher {
            TitleMatch::Contains(needle) => {
                title.to_lowercase().contains(&needle.to_lowercase())
            }
            TitleMatch::Regex(source) => match self.title_regexes.get(source) {
                Some(re) => re.is_match(title),
                // Not pre-collected (e.g. a hand-built filter); compile on
                // the spot, treating an invalid pattern as no match.
                None => compile_ci(source).map(|re| re.is_match(title)).unwrap_or(false),
            },
        }
    }
}

fn compile_ci(source: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(source).case_insensitive(true).build()
}

/// Visit every `TrackFilters` reachable from the policy (rule conditions
/// and synthesis `create_if` conditions).
fn for_each_filters(policy: &Policy, visit: &mut dyn FnMut(&TrackFilters)) {
    let mut on_condition = |cond: &Condition| {
        cond.walk(&mut |node| match node {
            Condition::Exists { filters, .. } | Condition::Count { filters, .. } => visit(filters),
            _ => {}
        });
    };
    for phase in &policy.phases {
        if let Some(rules) = &phase.ops.rules {
            for rule in &rules.items {
                on_condition(&rule.when);
            }
        }
        if let Some(specs) = &phase.ops.audio_synthesis {
            for spec in specs {
                if let Some(create_if) = &spec.create_if {
                    on_condition(create_if);
                }
            }
        }
    }
}

/// True iff all present sub-predicates of `filters` hold for `track`.
/// Unset predicates are vacuously true; a set predicate against a
/// missing track field is false.
pub fn track_matches(track: &Track, filters: &TrackFilters, patterns: &CompiledPatterns) -> bool {
    if let Some(languages) = &filters.language {
        if !languages.contains_lowercase(&track.language) {
            return false;
        }
    }
    if let Some(codecs) = &filters.codec {
        if !codecs.contains_lowercase(&track.codec) {
            return false;
        }
    }
    if let Some(expected) = filters.is_default {
        if track.is_default != expected {
            return false;
        }
    }
    if let Some(expected) = filters.is_forced {
        if track.is_forced != expected {
            return false;
        }
    }
    if filters.not_commentary == Some(true) && patterns.is_commentary(track) {
        return false;
    }
    if let Some(cmp) = &filters.channels {
        match track.channels {
            Some(channels) => {
                if !cmp.matches(i64::from(channels)) {
                    return false;
                }
            }
            None => return false,
        }
    }
    if let Some(cmp) = &filters.width {
        match track.width {
            Some(width) => {
                if !cmp.matches(i64::from(width)) {
                    return false;
                }
            }
            None => return false,
        }
    }
    if let Some(cmp) = &filters.height {
        match track.height {
            Some(height) => {
                if !cmp.matches(i64::from(height)) {
                    return false;
                }
            }
            None => return false,
        }
    }
    if let Some(matcher) = &filters.title {
        if !patterns.title_matches(&track.title, matcher) {
            return false;
        }
    }
    true
}

/// Music / SFX / non-speech classification of an audio track.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackClasses {
    pub music: bool,
    pub sfx: bool,
    pub non_speech: bool,
}

const MUSIC_HINTS: &[&str] = &["music", "song", "score", "soundtrack"];
const SFX_HINTS: &[&str] = &["sfx", "effects only", "sound effects"];
const NON_SPEECH_HINTS: &[&str] = &["no dialog", "no dialogue", "no speech", "ambient"];

/// Conservative title-keyword classifier. Callers with a better signal
/// (plugin data) pass their own classifier through the evaluation
/// options; with neither signal, every class is false.
pub fn classify_track(track: &Track) -> TrackClasses {
    let title = track.title.to_lowercase();
    if title.is_empty() {
        return TrackClasses::default();
    }
    TrackClasses {
        music: MUSIC_HINTS.iter().any(|hint| title.contains(hint)),
        sfx: SFX_HINTS.iter().any(|hint| title.contains(hint)),
        non_speech: NON_SPEECH_HINTS.iter().any(|hint| title.contains(hint)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vpo_policy::{CmpOp, NumCmp, StringList};

    fn track() -> Track {
        Track::audio(1, "aac", "eng")
            .with_channels(6)
            .with_title("Surround Mix")
    }

    #[test]
    fn empty_filters_match_everything() {
        let patterns = CompiledPatterns::empty();
        assert!(track_matches(&track(), &TrackFilters::default(), &patterns));
    }

    #[test]
    fn language_filter_matches_any_of_list() {
        let patterns = CompiledPatterns::empty();
        let filters = TrackFilters {
            language: Some(StringList(vec!["jpn".into(), "eng".into()])),
            ..Default::default()
        };
        assert!(track_matches(&track(), &filters, &patterns));

        let miss = TrackFilters {
            language: Some(StringList(vec!["fra".into()])),
            ..Default::default()
        };
        assert!(!track_matches(&track(), &miss, &patterns));
    }

    #[test]
    fn und_matches_only_itself() {
        let patterns = CompiledPatterns::empty();
        let filters = TrackFilters {
            language: Some(StringList(vec!["und".into()])),
            ..Default::default()
        };
        assert!(!track_matches(&track(), &filters, &patterns));
        let untagged = Track::audio(2, "aac", "und");
        assert!(track_matches(&untagged, &filters, &patterns));
    }

    #[test]
    fn missing_field_against_set_filter_is_false() {
        let patterns = CompiledPatterns::empty();
        let filters = TrackFilters {
            channels: Some(NumCmp {
                op: CmpOp::Gte,
                value: 2,
            }),
            ..Default::default()
        };
        let subtitle = Track::subtitle(3, "subrip", "eng");
        assert!(!track_matches(&subtitle, &filters, &patterns));
    }

    #[test]
    fn title_contains_is_case_insensitive() {
        let patterns = CompiledPatterns::empty();
        let filters = TrackFilters {
            title: Some(TitleMatch::Contains("surround".into())),
            ..Default::default()
        };
        assert!(track_matches(&track(), &filters, &patterns));
    }

    #[test]
    fn title_regex_is_not_anchored() {
        let patterns = CompiledPatterns::empty();
        let filters = TrackFilters {
            title: Some(TitleMatch::Regex("Mix$".into())),
            ..Default::default()
        };
        assert!(track_matches(&track(), &filters, &patterns));
    }

    #[test]
    fn plugin_override_beats_title_patterns() {
        let policy: Policy = serde_yaml::from_str(
            r#"
schema_version: 13
commentary_patterns: ["commentary"]
"#,
        )
        .unwrap();
        let patterns = CompiledPatterns::compile(&policy);

        let by_title = Track::audio(1, "aac", "eng").with_title("Director's Commentary");
        assert!(patterns.is_commentary(&by_title));

        let mut overridden = by_title.clone();
        overridden.commentary_override = Some(false);
        assert!(!patterns.is_commentary(&overridden));

        let mut plain = Track::audio(2, "aac", "eng");
        plain.commentary_override = Some(true);
        assert!(patterns.is_commentary(&plain));
    }

    #[test]
    fn classifier_flags_music_titles_only() {
        let music = Track::audio(1, "flac", "und").with_title("Isolated Score");
        assert!(classify_track(&music).music);
        let plain = Track::audio(2, "aac", "eng").with_title("Main");
        assert_eq!(classify_track(&plain), TrackClasses::default());
    }
}
