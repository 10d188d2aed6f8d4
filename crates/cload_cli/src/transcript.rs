//! `cload log` prints the build transcript of a module.
//!
//! Read-only: nothing is built and nothing in the cache is modified.

use std::io::Write;

use cload_cache::UnitCache;

use crate::project::project_loader;
use crate::{GlobalArgs, LogArgs};

/// Runs the `cload log` command.
///
/// Prints the most recent attempt, or every retained attempt with `--all`.
/// Returns exit code 1 when the module is unknown or was never built.
pub fn run(args: &LogArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let stdout = std::io::stdout();
    write_transcript(args, global, &mut stdout.lock())
}

fn write_transcript(
    args: &LogArgs,
    global: &GlobalArgs,
    out: &mut impl Write,
) -> Result<i32, Box<dyn std::error::Error>> {
    let loader = project_loader(global)?;
    let Some(unit) = loader.resolve(&args.module) else {
        eprintln!("error: no foreign-source module named '{}'", args.module);
        return Ok(1);
    };
    let settings = loader.settings();
    let cache = UnitCache::open(
        unit.identity,
        unit.role,
        &settings.cache_dir_name,
        settings.transcript_retain,
    );
    let log = cache.transcript();

    let entries = if args.all {
        log.read_all()?
    } else {
        log.read()?.into_iter().collect()
    };
    if entries.is_empty() {
        if !global.quiet {
            eprintln!(
                "no build attempts recorded for '{}' ({})",
                args.module,
                settings.role
            );
        }
        return Ok(1);
    }

    for entry in &entries {
        if !global.quiet {
            eprintln!("==> attempt {} ({})", entry.attempt, log.path().display());
        }
        write!(out, "{}", entry.text)?;
    }
    out.flush()?;
    Ok(0)
}
