//! b0norm: 对涡流校正后的 4D DWI 做按回波时间分组的 b=0 基线归一化.

mod summary;

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, ValueEnum};
use dwi_berry::config::protocol_dir_from_env_or_home;
use dwi_berry::consts::{units, CLAMP_FLOOR};
use dwi_berry::echo::MAX_TE_DECIMALS;
use dwi_berry::prelude::*;
use log::LevelFilter;
use simple_logger::SimpleLogger;

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser, Debug)]
#[command(name = "b0norm")]
#[command(about = "Normalize a 4D DWI volume by the mean b=0 image of each echo time")]
#[command(version)]
struct Cli {
    /// Input 4D NIfTI volume (.nii / .nii.gz), usually the eddy-corrected DWI.
    input: PathBuf,

    /// Output NIfTI volume.
    #[arg(required_unless_present = "stage_output")]
    output: Option<PathBuf>,

    /// Derive the output path: `.../3_eddy_corrected/F` -> `.../4_normalized_for_TE/F`.
    #[arg(long, conflicts_with = "output")]
    stage_output: bool,

    /// Directory holding `all.bval`, `small_delta.txt` and `big_delta.txt`.
    /// Defaults to `$DWI_PROTOCOL_DIR`, then `$HOME/dataset/protocol`.
    #[arg(long)]
    protocol_dir: Option<PathBuf>,

    /// b-value table (s/mm²). Overrides the protocol directory.
    #[arg(long)]
    bvals: Option<PathBuf>,

    /// Small delta table (ms). Overrides the protocol directory.
    #[arg(long)]
    small_delta: Option<PathBuf>,

    /// Big delta table (ms). Overrides the protocol directory.
    #[arg(long)]
    big_delta: Option<PathBuf>,

    /// Group echo times after rounding to this many decimals (seconds)
    /// instead of exact equality. Changes grouping semantics.
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=MAX_TE_DECIMALS as i64))]
    te_decimals: Option<u32>,

    /// Samples below this value are set to 0 before normalization.
    #[arg(long, default_value_t = CLAMP_FLOOR)]
    clamp_floor: f32,

    /// b-value scale factor to SI units.
    #[arg(long, default_value_t = units::B_VALUE_TO_SI)]
    b_scale: f64,

    /// Timing scale factor from table units to seconds.
    #[arg(long, default_value_t = units::MS_TO_S)]
    time_scale: f64,

    /// Fixed echo time offset in seconds.
    #[arg(long, default_value_t = units::TE_OFFSET_S)]
    te_offset: f64,

    /// Spatial transform written to the output header.
    #[arg(long, value_enum, default_value_t = GeometryArg::Identity)]
    geometry: GeometryArg,

    /// Write the normalization report as JSON.
    #[arg(long)]
    report: Option<PathBuf>,

    /// Divide frames on all cores (needs the `rayon` feature).
    #[arg(long)]
    parallel: bool,

    /// More logging (-v debug, -vv trace). `RUST_LOG` overrides.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors.
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum GeometryArg {
    /// Identity matrix, unit voxels.
    Identity,
    /// Keep the input orientation and voxel size.
    Inherit,
}

impl From<GeometryArg> for OutputGeometry {
    fn from(g: GeometryArg) -> Self {
        match g {
            GeometryArg::Identity => OutputGeometry::Identity,
            GeometryArg::Inherit => OutputGeometry::Inherit,
        }
    }
}

impl Cli {
    fn level(&self) -> LevelFilter {
        match (self.quiet, self.verbose) {
            (true, _) => LevelFilter::Warn,
            (false, 0) => LevelFilter::Info,
            (false, 1) => LevelFilter::Debug,
            (false, _) => LevelFilter::Trace,
        }
    }

    fn protocol_paths(&self) -> CliResult<ProtocolPaths> {
        let dir = match &self.protocol_dir {
            Some(d) => Some(d.clone()),
            None => protocol_dir_from_env_or_home(),
        };
        let table = |flag: &Option<PathBuf>, name: &str| -> CliResult<PathBuf> {
            match (flag, &dir) {
                (Some(p), _) => Ok(p.clone()),
                (None, Some(d)) => Ok(d.join(name)),
                (None, None) => Err(format!("cannot locate `{name}`: no protocol directory").into()),
            }
        };
        Ok(ProtocolPaths {
            bvals: table(&self.bvals, dwi_berry::consts::files::BVALS)?,
            small_delta: table(&self.small_delta, dwi_berry::consts::files::SMALL_DELTA)?,
            big_delta: table(&self.big_delta, dwi_berry::consts::files::BIG_DELTA)?,
        })
    }

    fn output_path(&self) -> CliResult<PathBuf> {
        match &self.output {
            Some(p) => Ok(p.clone()),
            None => stage_output_path(&self.input).ok_or_else(|| {
                format!(
                    "`{}` is not inside a `3_eddy_corrected` directory, give OUTPUT explicitly",
                    self.input.display()
                )
                .into()
            }),
        }
    }

    fn config(&self) -> CliResult<NormalizeConfig> {
        let mut config = NormalizeConfig::new(&self.input, self.output_path()?, self.protocol_paths()?);
        config.units = UnitScales {
            b_to_si: self.b_scale,
            ms_to_s: self.time_scale,
            te_offset_s: self.te_offset,
        };
        config.clamp_floor = self.clamp_floor;
        config.grouping = match self.te_decimals {
            Some(decimals) => TeGrouping::Rounded { decimals },
            None => TeGrouping::Exact,
        };
        config.geometry = self.geometry.into();
        config.parallel = self.parallel;
        Ok(config)
    }
}

fn execute(cli: &Cli) -> CliResult<()> {
    let config = cli.config()?;
    log::info!("Normalizing `{}`", config.input.display());
    log::debug!("{config:?}");
    if let TeGrouping::Rounded { decimals } = config.grouping {
        log::warn!("grouping echo times rounded to {decimals} decimals instead of exact equality");
    }

    let report = run(&config)?;
    log::info!("Normalized volume written to `{}`", config.output.display());

    summary::describe_into(&report, &mut io::stdout().lock())?;
    if let Some(path) = &cli.report {
        let w = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(w, &report)?;
        log::info!("Report written to `{}`", path.display());
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = SimpleLogger::new().with_level(cli.level()).env().init() {
        eprintln!("logger initialization failed: {e}");
    }

    let start = Instant::now();
    let code = match execute(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            let mut source = e.source();
            while let Some(s) = source {
                log::error!("    caused by: {s}");
                source = s.source();
            }
            ExitCode::FAILURE
        }
    };
    log::info!("Execution time: {:.2} seconds", start.elapsed().as_secs_f64());
    code
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("b0norm").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&["in.nii.gz", "out.nii.gz", "--protocol-dir", "/p"]);
        let c = cli.config().unwrap();
        assert_eq!(c.output, PathBuf::from("out.nii.gz"));
        assert_eq!(c.protocol, ProtocolPaths::in_dir("/p"));
        assert_eq!(c.units, UnitScales::default());
        assert_eq!(c.grouping, TeGrouping::Exact);
        assert_eq!(c.geometry, OutputGeometry::Identity);
        assert_eq!(c.clamp_floor, 1.0);
        assert_eq!(cli.level(), LevelFilter::Info);
    }

    #[test]
    fn test_table_flags_override_dir() {
        let cli = parse(&[
            "in.nii",
            "out.nii",
            "--protocol-dir",
            "/p",
            "--bvals",
            "/q/dwi.bval",
        ]);
        let p = cli.protocol_paths().unwrap();
        assert_eq!(p.bvals, PathBuf::from("/q/dwi.bval"));
        assert_eq!(p.small_delta, PathBuf::from("/p/small_delta.txt"));
    }

    #[test]
    fn test_stage_output() {
        let cli = parse(&["/d/3_eddy_corrected/s.nii.gz", "--stage-output", "--protocol-dir", "/p"]);
        assert_eq!(
            cli.output_path().unwrap(),
            PathBuf::from("/d/4_normalized_for_TE/s.nii.gz")
        );

        let cli = parse(&["/d/other/s.nii.gz", "--stage-output"]);
        assert!(cli.output_path().is_err());
    }

    #[test]
    fn test_output_required() {
        assert!(Cli::try_parse_from(["b0norm", "in.nii"]).is_err());
        assert!(Cli::try_parse_from(["b0norm", "in.nii", "out.nii", "--stage-output"]).is_err());
    }

    #[test]
    fn test_te_decimals_range() {
        let args = |d: &'static str| ["b0norm", "in.nii", "out.nii", "--te-decimals", d];
        assert!(Cli::try_parse_from(args("15")).is_ok());
        assert!(Cli::try_parse_from(args("16")).is_err());
        assert!(Cli::try_parse_from(args("400")).is_err());
        assert!(Cli::try_parse_from(args("-1")).is_err());
    }

    #[test]
    fn test_options() {
        let cli = parse(&[
            "in.nii",
            "out.nii",
            "--protocol-dir",
            "/p",
            "--te-decimals",
            "6",
            "--geometry",
            "inherit",
            "--time-scale",
            "0.001",
            "-vv",
        ]);
        let c = cli.config().unwrap();
        assert_eq!(c.grouping, TeGrouping::Rounded { decimals: 6 });
        assert_eq!(c.geometry, OutputGeometry::Inherit);
        assert_eq!(c.units.ms_to_s, 0.001);
        assert_eq!(cli.level(), LevelFilter::Trace);
    }
}
