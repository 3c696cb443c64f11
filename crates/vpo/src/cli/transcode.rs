//! `vpo transcode` - queue media files for processing under a policy.

use super::error::CliError;
use anyhow::{anyhow, Context};
use clap::Args;
use std::path::{Path, PathBuf};
use vpo_db::{JobKind, JobStore, NewJob};
use vpo_policy::load_policy_str;

const MEDIA_EXTENSIONS: &[&str] = &["mkv", "mp4", "m4v", "mov", "webm", "avi", "ts"];

#[derive(Args, Debug)]
pub struct TranscodeArgs {
    /// Policy file to evaluate against each input
    #[arg(long, conflicts_with = "profile")]
    policy: Option<PathBuf>,

    /// Named profile under ~/.vpo/profiles/
    #[arg(long)]
    profile: Option<String>,

    /// Ad-hoc target codec (used when no policy/profile is given)
    #[arg(long)]
    codec: Option<String>,

    /// Ad-hoc CRF quality (0-51)
    #[arg(long)]
    crf: Option<u8>,

    /// Ad-hoc resolution cap, e.g. 1080p
    #[arg(long)]
    max_resolution: Option<String>,

    /// Output directory for processed files
    #[arg(long)]
    output: Option<PathBuf>,

    /// Recurse into directories
    #[arg(long)]
    recursive: bool,

    /// Show what would be queued without queueing it
    #[arg(long)]
    dry_run: bool,

    /// Queue priority (lower runs earlier)
    #[arg(long, default_value_t = 0)]
    priority: i64,

    #[arg(long)]
    json: bool,

    /// Files or directories to process
    #[arg(required = true)]
    paths: Vec<PathBuf>,
}

pub async fn run(args: TranscodeArgs, db_path: &Path) -> Result<(), CliError> {
    let policy_ref = resolve_policy(&args).await?;

    let mut files = Vec::new();
    for path in &args.paths {
        collect_media(path, args.recursive, &mut files).map_err(CliError::Generic)?;
    }
    files.sort();
    files.dedup();
    if files.is_empty() {
        return Err(CliError::Generic(anyhow!("no valid input files")));
    }

    if args.dry_run {
        for file in &files {
            println!("would queue: {} (policy {})", file.display(), policy_ref);
        }
        return Ok(());
    }

    let store = JobStore::open(db_path).await?;
    let mut queued = Vec::new();
    for file in &files {
        let target_path = args.output.as_ref().and_then(|dir| {
            file.file_name()
                .map(|name| dir.join(name).to_string_lossy().into_owned())
        });
        let record = store
            .enqueue(NewJob {
                kind: JobKind::Transcode,
                source_path: file.to_string_lossy().into_owned(),
                target_path,
                policy_ref: policy_ref.clone(),
                priority: args.priority,
            })
            .await?;
        queued.push(record);
    }

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&queued).context("serializing queued jobs")?
        );
    } else {
        println!("queued {} job(s)", queued.len());
        for job in &queued {
            println!("  {}  {}", job.id, job.source_path);
        }
    }
    Ok(())
}

/// Resolve the policy reference: explicit file, named profile, or an
/// ad-hoc policy synthesized from the transcode flags. The referenced
/// policy is loaded once up front so a broken one is rejected before
/// anything is queued.
async fn resolve_policy(args: &TranscodeArgs) -> Result<String, CliError> {
    let path = if let Some(policy) = &args.policy {
        policy.clone()
    } else if let Some(profile) = &args.profile {
        let path = vpo_logging::vpo_home()
            .join("profiles")
            .join(format!("{}.yaml", profile));
        if !path.exists() {
            return Err(CliError::Generic(anyhow!(
                "no such profile: {} (expected {})",
                profile,
                path.display()
            )));
        }
        path
    } else {
        write_adhoc_policy(args).map_err(CliError::Generic)?
    };

    let text = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("reading {}", path.display()))
        .map_err(CliError::Generic)?;
    let loaded = load_policy_str(&text)?;
    for warning in &loaded.warnings {
        eprintln!("warning: {}", warning);
    }
    Ok(path.to_string_lossy().into_owned())
}

fn write_adhoc_policy(args: &TranscodeArgs) -> Result<PathBuf, anyhow::Error> {
    let codec = args.codec.as_deref().unwrap_or("hevc");
    let mut text = String::from("schema_version: 13\ntranscode:\n  video:\n");
    text.push_str(&format!("    target_codec: {}\n", codec));
    text.push_str(&format!("    skip_if:\n      codec_matches: [{}]\n", codec));
    if let Some(crf) = args.crf {
        text.push_str(&format!(
            "    quality:\n      mode: crf\n      crf: {}\n",
            crf
        ));
    }
    if let Some(resolution) = &args.max_resolution {
        text.push_str(&format!(
            "    scaling:\n      max_resolution: {}\n",
            resolution
        ));
    }

    let dir = vpo_logging::vpo_home().join("policies");
    std::fs::create_dir_all(&dir).context("creating policies directory")?;
    let path = dir.join(format!("adhoc-{}.yaml", uuid::Uuid::new_v4()));
    std::fs::write(&path, text).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

fn collect_media(
    path: &Path,
    recursive: bool,
    out: &mut Vec<PathBuf>,
) -> Result<(), anyhow::Error> {
    if path.is_file() {
        if is_media(path) {
            out.push(path.to_path_buf());
        }
        return Ok(());
    }
    if path.is_dir() {
        for entry in std::fs::read_dir(path)
            .with_context(|| format!("reading directory {}", path.display()))?
            .flatten()
        {
            let entry_path = entry.path();
            if entry_path.is_dir() {
                if recursive {
                    collect_media(&entry_path, true, out)?;
                }
            } else if is_media(&entry_path) {
                out.push(entry_path);
            }
        }
        return Ok(());
    }
    Err(anyhow!("no such file or directory: {}", path.display()))
}

fn is_media(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| MEDIA_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_extension_check() {
        assert!(is_media(Path::new("/m/a.mkv")));
        assert!(is_media(Path::new("/m/a.MP4")));
        assert!(!is_media(Path::new("/m/a.srt")));
        assert!(!is_media(Path::new("/m/noext")));
    }

    #[test]
    fn collect_skips_non_media_and_recurses_on_request() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.mkv"), b"x").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/c.mp4"), b"x").unwrap();

        let mut flat = Vec::new();
        collect_media(dir.path(), false, &mut flat).unwrap();
        assert_eq!(flat.len(), 1);

        let mut deep = Vec::new();
        collect_media(dir.path(), true, &mut deep).unwrap();
        assert_eq!(deep.len(), 2);
    }
}
