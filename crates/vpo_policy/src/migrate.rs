//! Schema-version migrations.
//!
//! Every supported on-disk version (1..=LATEST) is upgraded step by step
//! into the latest shape before deserialization. Migrations are total and
//! pure: they operate on the parsed document value, never on evaluation
//! types. Most version bumps were additive (new optional sections picked
//! up by serde defaults); the steps below only rewrite where the shape
//! itself changed.
//!
//! Version history:
//!   V1-V2   base filtering / ordering / defaults
//!   V3      transcode section
//!   V5      transcription section
//!   V6      hardware-accel sub-options (bare backend string -> mapping)
//!   V7      set_forced / set_default / set_language rule actions
//!   V8      not_commentary filter, skip_if_exists on synthesis
//!   V9      audio-synthesis full shape (source_prefer criteria list)
//!   V10     music / sfx / non-speech classification options
//!   V11     phases + config.on_error
//!   V12     is_original / is_dubbed, plugin/container metadata, set_container_metadata
//!   V13     rules becomes {match, items} instead of a bare list

use crate::error::{PolicyError, Result};
use serde_yaml::{Mapping, Value};

/// Latest schema version this build understands.
pub const LATEST_SCHEMA_VERSION: u32 = 13;

/// Read and check the document's declared schema version.
pub fn schema_version_of(doc: &Value) -> Result<u64> {
    let map = doc
        .as_mapping()
        .ok_or_else(|| PolicyError::structural("", "a mapping at the document root"))?;
    let version = map
        .get(&Value::from("schema_version"))
        .ok_or_else(|| PolicyError::structural("schema_version", "a required integer field"))?;
    version
        .as_u64()
        .filter(|v| *v >= 1)
        .ok_or_else(|| PolicyError::structural("schema_version", "a positive integer"))
}

/// Upgrade a parsed document to the latest schema shape.
///
/// Unknown versions above `LATEST_SCHEMA_VERSION` are a hard error;
/// anything at or below is upgraded in single-version steps.
pub fn upgrade_to_latest(mut doc: Value) -> Result<Value> {
    let mut version = schema_version_of(&doc)?;
    if version > u64::from(LATEST_SCHEMA_VERSION) {
        return Err(PolicyError::UnsupportedSchema {
            version,
            latest: LATEST_SCHEMA_VERSION,
        });
    }

    while version < u64::from(LATEST_SCHEMA_VERSION) {
        doc = migrate_step(doc, version)?;
        version += 1;
        set_schema_version(&mut doc, version);
    }
    Ok(doc)
}

fn migrate_step(doc: Value, from: u64) -> Result<Value> {
    match from {
        5 => migrate_v5_to_v6(doc),
        8 => migrate_v8_to_v9(doc),
        12 => migrate_v12_to_v13(doc),
        // All other bumps were purely additive.
        _ => Ok(doc),
    }
}

fn set_schema_version(doc: &mut Value, version: u64) {
    if let Value::Mapping(map) = doc {
        map.insert(Value::from("schema_version"), Value::from(version));
    }
}

/// V6: `hardware_acceleration: vaapi` becomes
/// `hardware_acceleration: {backend: vaapi}`.
fn migrate_v5_to_v6(mut doc: Value) -> Result<Value> {
    if let Some(video) = lookup_mut(&mut doc, &["transcode", "video"]) {
        if let Value::Mapping(video_map) = video {
            let key = Value::from("hardware_acceleration");
            if let Some(Value::String(backend)) = video_map.get(&key).cloned() {
                let mut hw = Mapping::new();
                hw.insert(Value::from("backend"), Value::from(backend));
                video_map.insert(key, Value::Mapping(hw));
            }
        }
    }
    Ok(doc)
}

/// V9: partial synthesis shape (`source_language` / `source_codec`)
/// becomes the `source_prefer` criteria list.
fn migrate_v8_to_v9(mut doc: Value) -> Result<Value> {
    if let Some(Value::Sequence(specs)) = lookup_mut(&mut doc, &["audio_synthesis"]) {
        for spec in specs.iter_mut() {
            let Value::Mapping(map) = spec else { continue };
            let mut criterion = Mapping::new();
            if let Some(lang) = map.remove(&Value::from("source_language")) {
                criterion.insert(Value::from("language"), lang);
            }
            if let Some(codec) = map.remove(&Value::from("source_codec")) {
                criterion.insert(Value::from("codec"), codec);
            }
            if !criterion.is_empty() && !map.contains_key(&Value::from("source_prefer")) {
                map.insert(
                    Value::from("source_prefer"),
                    Value::Sequence(vec![Value::Mapping(criterion)]),
                );
            }
        }
    }
    Ok(doc)
}

/// V13: a bare rule list becomes `{match: first, items: [...]}`, both at
/// the top level and inside every phase.
fn migrate_v12_to_v13(mut doc: Value) -> Result<Value> {
    if let Value::Mapping(map) = &mut doc {
        wrap_bare_rules(map);
        if let Some(Value::Sequence(phases)) = map.get_mut(&Value::from("phases")) {
            for phase in phases.iter_mut() {
                if let Value::Mapping(phase_map) = phase {
                    wrap_bare_rules(phase_map);
                }
            }
        }
    }
    Ok(doc)
}

fn wrap_bare_rules(map: &mut Mapping) {
    for key in ["rules", "conditional"] {
        let key = Value::from(key);
        if let Some(Value::Sequence(items)) = map.get(&key).cloned() {
            let mut wrapped = Mapping::new();
            wrapped.insert(Value::from("match"), Value::from("first"));
            wrapped.insert(Value::from("items"), Value::Sequence(items));
            map.insert(key, Value::Mapping(wrapped));
        }
    }
}

fn lookup_mut<'a>(doc: &'a mut Value, path: &[&str]) -> Option<&'a mut Value> {
    let mut current = doc;
    for segment in path {
        current = match current {
            Value::Mapping(map) => map.get_mut(&Value::from(*segment))?,
            _ => return None,
        };
    }
    Some(current)
}
