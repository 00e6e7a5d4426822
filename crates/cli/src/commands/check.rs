//! Stage file checks

use anyhow::Result;
use clap::Args;
use ostester_common::StageSet;
use ostester_runner::sync::load_references;
use std::path::PathBuf;
use tracing::debug;

use super::CommandError;
use crate::output::{print_list, print_success, print_warning, OutputFormat, Transition};

#[derive(Args)]
pub struct CheckArgs {
    /// Stage definition file (YAML)
    #[arg(long, env = "OSTESTER_STAGES")]
    pub stages: PathBuf,
}

/// Validate the stage file and every reference image it names
pub async fn execute(args: CheckArgs, format: OutputFormat) -> Result<()> {
    let stages = StageSet::from_file(&args.stages).map_err(|source| CommandError::Definition {
        path: args.stages.clone(),
        source,
    })?;

    let mut references = 0;
    for stage in stages.iter() {
        let loaded = load_references(stage)?;
        debug!("Stage '{}': {} reference image(s) ok", stage.name, loaded.len());
        references += loaded.len();
    }

    let unresolved: Vec<Transition> = stages
        .unresolved_transitions()
        .into_iter()
        .map(|(from, to)| Transition { from, to })
        .collect();
    if !unresolved.is_empty() {
        print_warning("Some paths lead to stages that do not exist:");
        print_list(&unresolved, format);
        return Err(CommandError::UnresolvedTransitions {
            count: unresolved.len(),
        }
        .into());
    }

    print_success(&format!(
        "{}: {} stage(s), {} reference image(s)",
        args.stages.display(),
        stages.len(),
        references
    ));
    Ok(())
}
