//! `runwatch cancel` command.

use anyhow::Result;
use clap::Args;
use runwatch::ControlPlane;
use serde_json::json;

use crate::opts::GlobalOpts;
use crate::output::print_success;

use super::control_call;

#[derive(Args, Debug)]
pub struct CancelArgs {
    /// Run identifier
    pub run_id: String,
}

pub async fn cmd_cancel(opts: &GlobalOpts, args: &CancelArgs) -> Result<()> {
    let config = opts.watch_config()?;
    let plane = opts.control_plane(&config)?;
    control_call(
        plane.cancel_run(&args.run_id).await,
        &format!("cancel run {}", args.run_id),
    )?;
    print_success(
        opts,
        json!({ "run_id": args.run_id, "cancel_requested": true }),
        &format!("cancellation requested for run {}", args.run_id),
        vec![],
    )
}
