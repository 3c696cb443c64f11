//! `vpo policy` - validate policies and dry-run plans.

use super::error::CliError;
use anyhow::{anyhow, Context};
use clap::Subcommand;
use comfy_table::{presets::UTF8_FULL_CONDENSED, Table};
use std::path::PathBuf;
use vpo_engine::Plan;
use vpo_policy::load_policy_str;
use vpo_worker::InspectionProvider;

#[derive(Subcommand, Debug)]
pub enum PolicyCommand {
    /// Load a policy and report warnings and the effective shape
    Validate {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },

    /// Evaluate a policy against a file and print the plan (no job is
    /// queued, nothing is executed)
    Plan {
        #[arg(long)]
        policy: PathBuf,
        /// Use a saved inspection JSON instead of probing the file
        #[arg(long)]
        inspection: Option<PathBuf>,
        /// Media file to probe (requires a configured probe command)
        path: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
}

pub async fn run(command: PolicyCommand) -> Result<(), CliError> {
    match command {
        PolicyCommand::Validate { file, json } => validate(&file, json).await,
        PolicyCommand::Plan {
            policy,
            inspection,
            path,
            json,
        } => plan(&policy, inspection.as_deref(), path.as_deref(), json).await,
    }
}

async fn validate(file: &std::path::Path, json: bool) -> Result<(), CliError> {
    let text = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("reading {}", file.display()))
        .map_err(CliError::Generic)?;
    let loaded = load_policy_str(&text)?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&loaded.policy).context("serializing policy")?
        );
    } else {
        println!(
            "{}: ok (schema v{}, {} phase(s))",
            file.display(),
            loaded.policy.schema_version,
            loaded.policy.phases.len()
        );
        for phase in &loaded.policy.phases {
            println!("  phase {}", phase.name);
        }
    }
    for warning in &loaded.warnings {
        eprintln!("warning: {}", warning);
    }
    Ok(())
}

async fn plan(
    policy_path: &std::path::Path,
    inspection: Option<&std::path::Path>,
    media: Option<&std::path::Path>,
    json: bool,
) -> Result<(), CliError> {
    let text = tokio::fs::read_to_string(policy_path)
        .await
        .with_context(|| format!("reading {}", policy_path.display()))
        .map_err(CliError::Generic)?;
    let loaded = load_policy_str(&text)?;

    let inspection = match (inspection, media) {
        (Some(file), _) => {
            let raw = std::fs::read_to_string(file)
                .with_context(|| format!("reading {}", file.display()))
                .map_err(CliError::Generic)?;
            serde_json::from_str::<vpo_inspect::Inspection>(&raw)
                .with_context(|| format!("parsing inspection {}", file.display()))
                .map_err(CliError::Generic)?
        }
        (None, Some(path)) => {
            let probe = crate::tools::ProbeInspectionProvider::from_env();
            probe
                .inspect(path)
                .map_err(|e| CliError::Generic(anyhow!("inspect {}: {}", path.display(), e)))?
        }
        (None, None) => {
            return Err(CliError::Generic(anyhow!(
                "pass a media path or --inspection <json>"
            )))
        }
    };

    let plan = vpo_engine::build_plan(&inspection, &loaded.policy)
        .map_err(|e| CliError::Generic(anyhow!(e)))?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&plan).context("serializing plan")?
        );
    } else {
        print_plan(&plan);
    }
    Ok(())
}

fn print_plan(plan: &Plan) {
    if plan.is_empty() {
        println!("plan is empty: nothing to do");
    } else {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL_CONDENSED);
        table.set_header(vec!["#", "action", "detail"]);
        for (i, action) in plan.actions.iter().enumerate() {
            let detail = serde_json::to_string(action).unwrap_or_default();
            table.add_row(vec![
                i.to_string(),
                action.kind_str().to_string(),
                detail,
            ]);
        }
        println!("{}", table);
    }
    for warning in &plan.warnings {
        println!("warning: {}", warning);
    }
    for note in &plan.notes {
        println!("note: {}", note);
    }
}
