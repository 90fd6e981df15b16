//! Shared output helpers for human and JSON modes.
//!
//! Human mode prints primary data to stdout and notices to stderr.
//! JSON mode wraps responses in `{ data, warnings? }` and respects
//! `--pretty` and `--quiet`.

use std::io::Write;

use anyhow::Result;
use serde_json::{Value, json};

use crate::opts::GlobalOpts;

/// Print one result. `human` is what human mode shows in place of `data`.
pub fn print_success(
    opts: &GlobalOpts,
    data: Value,
    human: &str,
    mut warnings: Vec<String>,
) -> Result<()> {
    if opts.quiet {
        warnings.clear();
    }
    if opts.json_mode() {
        print_json(opts, data, warnings)
    } else {
        for w in warnings {
            notice(opts, &w)?;
        }
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{human}")?;
        stdout.flush()?;
        Ok(())
    }
}

fn print_json(opts: &GlobalOpts, data: Value, warnings: Vec<String>) -> Result<()> {
    let mut root = json!({ "data": data });
    if !warnings.is_empty() {
        if let Some(obj) = root.as_object_mut() {
            obj.insert(
                "warnings".into(),
                warnings.into_iter().map(Value::String).collect(),
            );
        }
    }
    let text = if opts.pretty {
        serde_json::to_string_pretty(&root)?
    } else {
        serde_json::to_string(&root)?
    };
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{text}")?;
    stdout.flush()?;
    Ok(())
}

/// Side-channel message on stderr; dropped under `--quiet`.
pub fn notice(opts: &GlobalOpts, message: &str) -> Result<()> {
    if opts.quiet {
        return Ok(());
    }
    let mut stderr = std::io::stderr();
    writeln!(stderr, "notice: {message}")?;
    Ok(())
}
