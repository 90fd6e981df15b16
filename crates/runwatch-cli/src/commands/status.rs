//! `runwatch status` command.

use anyhow::Result;
use clap::Args;
use runwatch::ControlPlane;

use crate::opts::GlobalOpts;
use crate::output::print_success;

use super::{control_call, describe_record};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Run identifier
    pub run_id: String,
}

pub async fn cmd_status(opts: &GlobalOpts, args: &StatusArgs) -> Result<()> {
    let config = opts.watch_config()?;
    let plane = opts.control_plane(&config)?;
    let record = control_call(
        plane.fetch_run(&args.run_id).await,
        &format!("fetch run {}", args.run_id),
    )?;
    let data = serde_json::to_value(&record)?;
    print_success(opts, data, &describe_record(&record), vec![])
}
