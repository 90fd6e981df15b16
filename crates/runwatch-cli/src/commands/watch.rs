//! `runwatch watch` command.

use anyhow::Result;
use clap::Args;
use runwatch::{ControlPlane, Counters, Observer, Phase, RunRecord, RunStatus, RunView};
use serde::Serialize;
use serde_json::json;

use crate::opts::GlobalOpts;
use crate::output::{notice, print_success};

use super::{control_call, describe_record};

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Run identifier
    pub run_id: String,
}

/// The part of a view worth a new output line when it changes.
#[derive(Clone, Debug, PartialEq, Serialize)]
struct Progress {
    run_id: String,
    phase: Option<Phase>,
    detail: String,
    counters: Counters,
    connected: bool,
    done: bool,
}

impl Progress {
    fn of(view: &RunView) -> Self {
        Self {
            run_id: view.run_id.clone(),
            phase: view.current_phase,
            detail: view.detail.clone(),
            counters: view.counters,
            connected: view.is_connected,
            done: view.is_done,
        }
    }

    fn human(&self) -> String {
        let phase = self.phase.map(Phase::label).unwrap_or("Waiting for events");
        let mut line = format!("[{phase}] {}", self.detail);
        let c = &self.counters;
        if c.total_files > 0 || c.approaches_tested > 0 || c.candidates_validated > 0 {
            line.push_str(&format!(
                " | files {}/{} opportunities {} approaches {} accepted {}/{}",
                c.files_analysed,
                c.total_files,
                c.opportunities_found,
                c.approaches_tested,
                c.candidates_accepted,
                c.candidates_validated
            ));
        }
        line
    }
}

pub async fn cmd_watch(opts: &GlobalOpts, args: &WatchArgs) -> Result<()> {
    let config = opts.watch_config()?;
    let plane = opts.control_plane(&config)?;
    let record = control_call(
        plane.fetch_run(&args.run_id).await,
        &format!("fetch run {}", args.run_id),
    )?;

    if record.status.is_terminal() {
        notice(opts, "run already finished; no live events")?;
        return finish(opts, &record, None);
    }

    let mut observer = Observer::new(plane, opts.token_source(), config);
    let mut views = observer.observe(&args.run_id, true);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut last: Option<Progress> = None;
    let mut reconnects = 0;
    let settled = loop {
        let view = views.borrow_and_update().clone();

        if view.reconnect_attempts > reconnects {
            reconnects = view.reconnect_attempts;
            notice(
                opts,
                &format!("event stream dropped; reconnecting (attempt {reconnects})"),
            )?;
        }
        let progress = Progress::of(&view);
        let has_content = progress.phase.is_some() || !progress.detail.is_empty();
        if has_content && last.as_ref() != Some(&progress) {
            print_success(opts, serde_json::to_value(&progress)?, &progress.human(), vec![])?;
            last = Some(progress);
        }

        if view.is_settled() {
            break Some(view);
        }

        tokio::select! {
            changed = views.changed() => {
                if changed.is_err() {
                    anyhow::bail!("observation of run {} ended unexpectedly", args.run_id);
                }
            }
            _ = &mut ctrl_c => {
                notice(opts, "interrupted; stopping observation")?;
                break None;
            }
        }
    };
    observer.stop();

    match settled {
        Some(view) => {
            let latest = view.run.clone().unwrap_or(record);
            finish(opts, &latest, Some(&view))
        }
        None => Ok(()),
    }
}

/// Print the closing summary; a failed run is reported as an error.
fn finish(opts: &GlobalOpts, record: &RunRecord, view: Option<&RunView>) -> Result<()> {
    let mut data = json!({ "run": record });
    if let Some(view) = view {
        data["events"] = json!(view.envelopes.len());
        data["counters"] = serde_json::to_value(view.counters)?;
        data["phases"] = serde_json::to_value(&view.phases)?;
    }
    print_success(opts, data, &describe_record(record), vec![])?;
    if record.status == RunStatus::Failed {
        anyhow::bail!(
            "run {} failed{}",
            record.id,
            record
                .error_message
                .as_deref()
                .map(|m| format!(": {m}"))
                .unwrap_or_default()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_line_shows_counters_once_files_are_selected() {
        let mut progress = Progress {
            run_id: "r1".into(),
            phase: Some(Phase::Clone),
            detail: "Cloning repository...".into(),
            counters: Counters::default(),
            connected: true,
            done: false,
        };
        assert_eq!(progress.human(), "[Cloning repository] Cloning repository...");

        progress.phase = Some(Phase::Discovery);
        progress.detail = "Selected 4 files for analysis".into();
        progress.counters.total_files = 4;
        assert_eq!(
            progress.human(),
            format!(
                "[{}] Selected 4 files for analysis | files 0/4 opportunities 0 approaches 0 accepted 0/0",
                Phase::Discovery.label()
            )
        );
    }
}
