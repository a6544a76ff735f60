#![warn(clippy::all)]

//! timefix - timing reconstruction for CCD photometry runs.
//!
//! Reads the raw timing bytes of an observing run, repairs corrupted,
//! missing or out-of-sequence timestamp records, and reports what was
//! corrected. Optionally writes the reconciled timestamps as JSON lines
//! for the downstream photometry stages.

mod config;
mod file_ops;
mod timing;

use std::path::PathBuf;
use std::process::ExitCode;

use config::{RunContext, Verbosity};

/// Parsed command line.
struct CliArgs {
    run_path: PathBuf,
    out_path: Option<PathBuf>,
    compare_path: Option<PathBuf>,
    ctx: RunContext,
    json: bool,
}

const USAGE: &str = "usage: timefix <run-file> [options]
  --cadence SECS       nominal frame interval (default 1.0)
  --max-cycle-diff C   cadence tolerance in cycles (default 0.2)
  --trivial-tol C      jitter accepted outright, in cycles (default 0.02)
  --max-pending N      bad-record run length before extrapolation (default 64)
  --min-sats N         minimum satellite lock for a valid record (default 3)
  --out FILE           write reconciled records as JSON lines
  --compare FILE       report per-frame timestamp differences against a
                       second timing dump instead of reconstructing
  --detailed           per-span report instead of a one-line summary
  --json               emit the report as JSON";

fn parse_args(args: &[String]) -> Result<CliArgs, String> {
    let mut run_path = None;
    let mut out_path = None;
    let mut compare_path = None;
    let mut ctx = RunContext::default();
    let mut json = false;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let mut value_for = |flag: &str| {
            iter.next()
                .cloned()
                .ok_or_else(|| format!("{} requires a value", flag))
        };
        match arg.as_str() {
            "--cadence" => {
                ctx.cadence_secs = parse_value(&value_for("--cadence")?, "--cadence")?;
            }
            "--max-cycle-diff" => {
                let value = parse_value(&value_for("--max-cycle-diff")?, "--max-cycle-diff")?;
                ctx = ctx.with_max_cycle_difference(value);
            }
            "--trivial-tol" => {
                let value = parse_value(&value_for("--trivial-tol")?, "--trivial-tol")?;
                ctx = ctx.with_trivial_tolerance(value);
            }
            "--max-pending" => {
                let value = parse_value(&value_for("--max-pending")?, "--max-pending")?;
                ctx = ctx.with_max_pending(value);
            }
            "--min-sats" => {
                let value = parse_value(&value_for("--min-sats")?, "--min-sats")?;
                ctx = ctx.with_min_satellites(value);
            }
            "--out" => {
                out_path = Some(PathBuf::from(value_for("--out")?));
            }
            "--compare" => {
                compare_path = Some(PathBuf::from(value_for("--compare")?));
            }
            "--detailed" => {
                ctx = ctx.with_verbosity(Verbosity::Detailed);
            }
            "--json" => {
                json = true;
            }
            flag if flag.starts_with("--") => {
                return Err(format!("unknown option {}", flag));
            }
            path => {
                if run_path.replace(PathBuf::from(path)).is_some() {
                    return Err("more than one run file given".to_string());
                }
            }
        }
    }

    let run_path = run_path.ok_or_else(|| "no run file given".to_string())?;
    if ctx.cadence_secs <= 0.0 {
        return Err("--cadence must be positive".to_string());
    }

    Ok(CliArgs {
        run_path,
        out_path,
        compare_path,
        ctx,
        json,
    })
}

fn parse_value<T: std::str::FromStr>(value: &str, flag: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("invalid value {:?} for {}", value, flag))
}

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = match parse_args(&args) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("timefix: {}", e);
            eprintln!("{}", USAGE);
            return ExitCode::from(2);
        }
    };

    let blocks = match file_ops::read_run_file(&cli.run_path) {
        Ok(blocks) => blocks,
        Err(e) => {
            log::error!("failed to read {}: {}", cli.run_path.display(), e);
            return ExitCode::FAILURE;
        }
    };
    log::info!("read {} timing blocks from {}", blocks.len(), cli.run_path.display());

    // Comparison mode bypasses reconstruction entirely.
    if let Some(compare_path) = &cli.compare_path {
        let other = match file_ops::read_run_file(compare_path) {
            Ok(blocks) => blocks,
            Err(e) => {
                log::error!("failed to read {}: {}", compare_path.display(), e);
                return ExitCode::FAILURE;
            }
        };
        let comparison = timing::compare_runs(&blocks, &other);
        if comparison.is_identical() {
            log::info!("timing bytes are identical across {} frames", comparison.frames_compared);
        }
        if cli.json {
            match serde_json::to_string_pretty(&comparison) {
                Ok(json) => println!("{}", json),
                Err(e) => {
                    log::error!("failed to serialize comparison: {}", e);
                    return ExitCode::FAILURE;
                }
            }
        } else {
            println!("{}", comparison.render());
        }
        return ExitCode::SUCCESS;
    }

    let output = match timing::process_run(&blocks, &cli.ctx) {
        Ok(output) => output,
        Err(e) => {
            // Fatal for the run: the raw stream itself is broken.
            log::error!("run aborted: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if cli.json {
        match serde_json::to_string_pretty(&output.report) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                log::error!("failed to serialize report: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        println!("{}", output.report.render(cli.ctx.verbosity));
    }

    if let Some(out_path) = &cli.out_path {
        if let Err(e) = file_ops::write_reconciled(out_path, &output.records) {
            log::error!("failed to write {}: {}", out_path.display(), e);
            return ExitCode::FAILURE;
        }
    }

    // A run with zero usable timestamps is the only reconstruction
    // outcome that fails the process; everything else degrades into
    // the report.
    if output.summary.has_usable_timestamps() {
        ExitCode::SUCCESS
    } else {
        log::error!("run produced no usable timestamps");
        ExitCode::FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_minimal_args() {
        let cli = parse_args(&args(&["run0034.tbts"])).unwrap();
        assert_eq!(cli.run_path, PathBuf::from("run0034.tbts"));
        assert_eq!(cli.out_path, None);
        assert!(!cli.json);
        assert_eq!(cli.ctx.cadence_secs, 1.0);
    }

    #[test]
    fn test_parse_full_args() {
        let cli = parse_args(&args(&[
            "run0034.tbts",
            "--cadence",
            "0.25",
            "--max-pending",
            "16",
            "--out",
            "fixed.jsonl",
            "--detailed",
        ]))
        .unwrap();

        assert_eq!(cli.ctx.cadence_secs, 0.25);
        assert_eq!(cli.ctx.max_pending, 16);
        assert_eq!(cli.out_path, Some(PathBuf::from("fixed.jsonl")));
        assert_eq!(cli.ctx.verbosity, Verbosity::Detailed);
    }

    #[test]
    fn test_parse_compare_flag() {
        let cli = parse_args(&args(&["run0034.tbts", "--compare", "run0034_old.tbts"])).unwrap();
        assert_eq!(cli.compare_path, Some(PathBuf::from("run0034_old.tbts")));

        assert!(parse_args(&args(&["run0034.tbts", "--compare"])).is_err());
    }

    #[test]
    fn test_parse_rejects_missing_run_file() {
        assert!(parse_args(&args(&["--detailed"])).is_err());
    }

    #[test]
    fn test_parse_rejects_unknown_flag() {
        assert!(parse_args(&args(&["run.tbts", "--frobnicate"])).is_err());
    }

    #[test]
    fn test_parse_rejects_bad_cadence() {
        assert!(parse_args(&args(&["run.tbts", "--cadence", "fast"])).is_err());
        assert!(parse_args(&args(&["run.tbts", "--cadence", "0"])).is_err());
    }
}
