//! CLI Commands
//!
//! `gpuprov` runs phase 1; `gpuprov --cont` runs phase 2 after the reboot.

pub mod prompt;
pub mod provision;


use clap::Parser;
use serde::Serialize;

const ENVIRONMENT_HELP: &str = "Environment:
  GPUPROV_DRIVER_VERSION  pin a driver version (empty = latest production branch)
  GPUPROV_CONFIG          JSON config file (default /etc/gpuprov.json)
  GPUPROV_LOG_FILE        log file (default /var/log/gpuprov.log)
  RUST_LOG                log filter (default info)";

/// Without flags, phase 1: install prerequisites, disable nouveau and rebuild the boot image
#[derive(Parser, Debug)]
#[command(name = "gpuprov", version, long_about = None, after_help = ENVIRONMENT_HELP)]
pub struct Cli {
    /// Phase 2 (after reboot): download, install and verify the NVIDIA driver
    #[arg(long = "cont", visible_alias = "continue")]
    cont: bool,

    /// Any other argument; one containing `--cont` also selects phase 2
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, hide = true)]
    rest: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    PreReboot,
    PostReboot,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::PreReboot => "phase1",
            Phase::PostReboot => "phase2",
        }
    }
}

/// What the command line asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub phase: Phase,
    pub unrecognized: Vec<String>,
}

impl Invocation {
    pub fn from_cli(cli: Cli) -> Self {
        let (continued, unrecognized): (Vec<String>, Vec<String>) =
            cli.rest.into_iter().partition(|arg| arg.contains("--cont"));
        let phase = if cli.cont || !continued.is_empty() {
            Phase::PostReboot
        } else {
            Phase::PreReboot
        };
        Invocation { phase, unrecognized }
    }

    /// Parse `args` (program name first). `--help` and `--version` come back
    /// as the clap error that renders them.
    pub fn try_from_args<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Cli::try_parse_from(args).map(Self::from_cli)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    fn parse(list: &[&str]) -> Invocation {
        Invocation::try_from_args(std::iter::once("gpuprov").chain(list.iter().copied())).unwrap()
    }

    #[test]
    fn test_no_args_is_phase_one() {
        let inv = parse(&[]);
        assert_eq!(inv.phase, Phase::PreReboot);
        assert!(inv.unrecognized.is_empty());
    }

    #[test]
    fn test_cont_and_alias_select_phase_two() {
        assert_eq!(parse(&["--cont"]).phase, Phase::PostReboot);
        assert_eq!(parse(&["--continue"]).phase, Phase::PostReboot);
    }

    #[test]
    fn test_cont_substring_selects_phase_two() {
        let inv = parse(&["--contt"]);
        assert_eq!(inv.phase, Phase::PostReboot);
        assert!(inv.unrecognized.is_empty());
    }

    #[test]
    fn test_unknown_args_are_collected() {
        let inv = parse(&["--verbose", "extra"]);
        assert_eq!(inv.phase, Phase::PreReboot);
        assert_eq!(inv.unrecognized, vec!["--verbose".to_string(), "extra".to_string()]);
    }

    #[test]
    fn test_help_is_rendered_by_clap() {
        let err = Invocation::try_from_args(["gpuprov", "--help"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        let text = err.to_string();
        assert!(text.contains("--cont"));
        assert!(text.contains("GPUPROV_DRIVER_VERSION"));
    }
}
