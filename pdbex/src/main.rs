//! `pdbex`: the CLI façade (`spec.md` §6 CLI surface; `SPEC_FULL.md` §6.4).
//! Parses arguments, opens the PDB via `pdbex-pdb`, drives
//! `pdbex_core::pipeline::reconstruct`, and writes the result to stdout or a
//! file, in the idiom of `pdbtool/src/main.rs`: `clap` derive parsing,
//! `tracing-subscriber` log configuration, a single top-level error message
//! mapped to exit code 1 (`spec.md` §7).

use std::fs::File;
use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use pdbex_core::reconstruct::{ExpansionPolicy, Settings};

/// `-e n|i|a`: nested-structure expansion policy (§4.3 "Emission model").
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum ExpansionArg {
    N,
    I,
    A,
}

impl From<ExpansionArg> for ExpansionPolicy {
    fn from(value: ExpansionArg) -> Self {
        match value {
            ExpansionArg::N => ExpansionPolicy::None,
            ExpansionArg::I => ExpansionPolicy::InlineUnnamed,
            ExpansionArg::A => ExpansionPolicy::InlineAll,
        }
    }
}

/// `pdbex <path> [-o <file>] [-e n|i|a] [-u prefix] [-s prefix] [-r prefix]
/// [-g suffix] [-p[-]] [-x[-]] [-b[-]] [-d[-]]` (`spec.md` §6). The four
/// trailing-dash toggles (`-p`, `-x`, `-b`, `-d`) are modeled as options
/// that take an optional attached value: bare `-p` means "on", `-p-` means
/// "off" (clap attaches a short option's value without a space, so `-p-`
/// parses as flag `p` with value `"-"`), and omitting the flag entirely
/// keeps the documented default.
#[derive(clap::Parser)]
#[command(name = "pdbex", about = "Reconstructs a C-style header from a PDB's type information")]
struct Cli {
    /// The PDB file to read.
    pdb: PathBuf,

    /// Write the reconstructed header here instead of stdout.
    #[arg(short = 'o')]
    output: Option<PathBuf>,

    /// Nested-structure expansion policy: n(one), i(nline unnamed, default), a(ll).
    #[arg(short = 'e', value_enum, default_value = "i")]
    expansion: ExpansionArg,

    /// Unnamed-union prefix (used in combination with `-d-`).
    #[arg(short = 'u')]
    union_prefix: Option<String>,

    /// Unnamed-struct prefix (used in combination with `-d-`).
    #[arg(short = 's')]
    struct_prefix: Option<String>,

    /// Prefix applied to every emitted symbol name.
    #[arg(short = 'r')]
    symbol_prefix: Option<String>,

    /// Suffix applied to every emitted symbol name.
    #[arg(short = 'g')]
    symbol_suffix: Option<String>,

    /// Create padding members. Default on; `-p-` turns it off.
    #[arg(short = 'p', num_args = 0..=1, default_missing_value = "on")]
    padding: Option<String>,

    /// Show member offset comments. Default on; `-x-` turns it off.
    #[arg(short = 'x', num_args = 0..=1, default_missing_value = "on")]
    offsets: Option<String>,

    /// Allow bitfields packed inside a union. Default off; `-b` turns it on.
    #[arg(short = 'b', num_args = 0..=1, default_missing_value = "on")]
    bitfields_in_union: Option<String>,

    /// Allow anonymous nested aggregates to stay unnamed. Default on; `-d-` turns it off.
    #[arg(short = 'd', num_args = 0..=1, default_missing_value = "on")]
    anonymous_data_types: Option<String>,

    /// Reduce logging to warnings and errors only.
    #[arg(long)]
    quiet: bool,

    /// Turn on debug-level logging.
    #[arg(long)]
    verbose: bool,
}

/// Resolves one of the four trailing-dash toggles: absent keeps `default`,
/// present-without-value (`default_missing_value` kicked in) is "on",
/// present with an attached `-` is "off".
fn resolve_toggle(flag: &Option<String>, default: bool) -> bool {
    match flag.as_deref() {
        None => default,
        Some("-") => false,
        Some(_) => true,
    }
}

fn settings_from_cli(cli: &Cli) -> Settings {
    let defaults = Settings::default();
    Settings {
        member_struct_expansion: cli.expansion.into(),
        anonymous_union_prefix: cli
            .union_prefix
            .clone()
            .unwrap_or(defaults.anonymous_union_prefix),
        anonymous_struct_prefix: cli
            .struct_prefix
            .clone()
            .unwrap_or(defaults.anonymous_struct_prefix),
        symbol_prefix: cli.symbol_prefix.clone().unwrap_or(defaults.symbol_prefix),
        symbol_suffix: cli.symbol_suffix.clone().unwrap_or(defaults.symbol_suffix),
        create_padding_members: resolve_toggle(&cli.padding, defaults.create_padding_members),
        show_offsets: resolve_toggle(&cli.offsets, defaults.show_offsets),
        allow_bitfields_in_union: resolve_toggle(
            &cli.bitfields_in_union,
            defaults.allow_bitfields_in_union,
        ),
        allow_anonymous_data_types: resolve_toggle(
            &cli.anonymous_data_types,
            defaults.allow_anonymous_data_types,
        ),
        ..defaults
    }
}

fn configure_tracing(cli: &Cli) {
    use tracing_subscriber::filter::LevelFilter;

    let max_level = if cli.quiet {
        LevelFilter::WARN
    } else if cli.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    tracing_subscriber::fmt().with_max_level(max_level).init();
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let graph = pdbex_pdb::open_and_populate(&cli.pdb)?;
    let settings = settings_from_cli(cli);
    let result = pdbex_core::pipeline::reconstruct(&graph, settings)?;

    for err in &result.skipped {
        tracing::warn!(error = %err, "symbol skipped during reconstruction");
    }

    match &cli.output {
        Some(path) => {
            let mut file = File::create(path)?;
            file.write_all(result.header.as_bytes())?;
        }
        None => {
            print!("{}", result.header);
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    configure_tracing(&cli);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("pdbex: {err}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_dash_turns_a_toggle_off() {
        let cli = Cli::try_parse_from(["pdbex", "a.pdb", "-p-"]).unwrap();
        assert!(!resolve_toggle(&cli.padding, true));
    }

    #[test]
    fn bare_toggle_turns_it_on() {
        let cli = Cli::try_parse_from(["pdbex", "a.pdb", "-b"]).unwrap();
        assert!(resolve_toggle(&cli.bitfields_in_union, false));
    }

    #[test]
    fn absent_toggle_keeps_the_default() {
        let cli = Cli::try_parse_from(["pdbex", "a.pdb"]).unwrap();
        assert!(resolve_toggle(&cli.padding, true));
        assert!(!resolve_toggle(&cli.bitfields_in_union, false));
    }

    #[test]
    fn expansion_policy_round_trips() {
        let cli = Cli::try_parse_from(["pdbex", "a.pdb", "-e", "a"]).unwrap();
        assert!(matches!(
            ExpansionPolicy::from(cli.expansion),
            ExpansionPolicy::InlineAll
        ));
    }

    #[test]
    fn output_path_is_parsed() {
        let cli = Cli::try_parse_from(["pdbex", "a.pdb", "-o", "out.h"]).unwrap();
        assert_eq!(cli.output, Some(PathBuf::from("out.h")));
    }
}
