use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use log::debug;

use jaeger_nwb::config::{DEFAULT_BUFFER_FRAMES, DEFAULT_HEADER_PREFIX, DEFAULT_TRIALS};
use jaeger_nwb::{
    ArchiveReader, ConversionConfig, ConvertError, Experiment, ImagingOptions, Metadata, Pipeline, Sections, SignConvention,
};

#[derive(Parser)]
#[command(author, version, about = "Convert Jaeger lab recordings to an NWB archive", long_about = None)]
struct Cli {
    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Clone)]
struct Common {
    /// Output file, e.g. session.nwb
    output: PathBuf,
    /// YAML metafile
    metafile: PathBuf,
}

#[derive(Args, Clone, Copy)]
struct SectionFlags {
    /// Add imaging data
    #[arg(long = "add-ophys", alias = "add_ophys")]
    add_ophys: bool,
    /// Add Intan electrophysiology
    #[arg(long = "add-ecephys", alias = "add_ecephys")]
    add_ecephys: bool,
    /// Add behavioral data
    #[arg(long = "add-behavior", alias = "add_behavior")]
    add_behavior: bool,
}

impl From<SectionFlags> for Sections {
    fn from(flags: SectionFlags) -> Self {
        Sections {
            ophys: flags.add_ophys,
            ecephys: flags.add_ecephys,
            behavior: flags.add_behavior,
        }
    }
}

#[derive(Args, Clone)]
struct ImagingArgs {
    /// Trial identifiers in acquisition order, comma separated
    #[arg(long, value_delimiter = ',', default_values_t = DEFAULT_TRIALS.map(String::from))]
    trials: Vec<String>,
    /// File name prefix of the trial headers
    #[arg(long, default_value = DEFAULT_HEADER_PREFIX)]
    header_prefix: String,
    /// Sign applied to raw frames: inverted or as-recorded
    #[arg(long, default_value = "inverted", value_parser = parse_sign)]
    sign: SignConvention,
    /// Frames per stored chunk
    #[arg(long, default_value_t = DEFAULT_BUFFER_FRAMES)]
    buffer_frames: usize,
}

fn parse_sign(s: &str) -> Result<SignConvention, String> {
    s.parse::<SignConvention>().map_err(|e| e.to_string())
}

#[derive(Subcommand, Clone)]
enum Command {
    /// Bpod behavior session
    Bpod {
        #[command(flatten)]
        common: Common,
        /// Bpod .mat session file
        session_file: PathBuf,
        #[command(flatten)]
        flags: SectionFlags,
    },
    /// VSFP FRET imaging with optional Intan recordings
    Fret {
        #[command(flatten)]
        common: Common,
        /// Directory holding the .rsh/.rsd trial files
        imaging_dir: PathBuf,
        /// Directory holding .rhd files
        ecephys_dir: Option<PathBuf>,
        #[command(flatten)]
        flags: SectionFlags,
        #[command(flatten)]
        imaging: ImagingArgs,
    },
    /// LabView behavior
    Labview {
        #[command(flatten)]
        common: Common,
        /// Directory holding the *_tr.txt summary and lick file
        behavior_dir: PathBuf,
        #[command(flatten)]
        flags: SectionFlags,
    },
    /// Treadmill and nose traces
    Treadmill {
        #[command(flatten)]
        common: Common,
        treadmill_file: PathBuf,
        nose_file: PathBuf,
        /// Directory holding .rhd files
        #[arg(long)]
        ecephys_dir: Option<PathBuf>,
        /// Directory holding LabView files
        #[arg(long)]
        behavior_dir: Option<PathBuf>,
        #[command(flatten)]
        flags: SectionFlags,
    },
    /// Single Intan file with LabView behavior
    Lisu {
        #[command(flatten)]
        common: Common,
        /// Intan .rhd file
        ecephys_file: PathBuf,
        /// Directory holding LabView files
        behavior_dir: Option<PathBuf>,
        #[command(flatten)]
        flags: SectionFlags,
    },
    /// Summarize a written archive
    Inspect {
        /// Archive to read
        file: PathBuf,
    },
}

fn build_config(command: Command) -> jaeger_nwb::Result<ConversionConfig> {
    let (experiment, common, flags, imaging) = match command {
        Command::Bpod {
            common,
            session_file,
            flags,
        } => (Experiment::Bpod { session_file }, common, flags, None),
        Command::Fret {
            common,
            imaging_dir,
            ecephys_dir,
            flags,
            imaging,
        } => (
            Experiment::Fret {
                imaging_dir,
                ecephys_dir,
            },
            common,
            flags,
            Some(imaging),
        ),
        Command::Labview {
            common,
            behavior_dir,
            flags,
        } => (Experiment::Labview { behavior_dir }, common, flags, None),
        Command::Treadmill {
            common,
            treadmill_file,
            nose_file,
            ecephys_dir,
            behavior_dir,
            flags,
        } => (
            Experiment::Treadmill {
                treadmill_file,
                nose_file,
                ecephys_dir,
                behavior_dir,
            },
            common,
            flags,
            None,
        ),
        Command::Lisu {
            common,
            ecephys_file,
            behavior_dir,
            flags,
        } => (
            Experiment::Lisu {
                ecephys_file,
                behavior_dir,
            },
            common,
            flags,
            None,
        ),
        Command::Inspect { .. } => {
            return Err(ConvertError::Config("inspect does not run a conversion".to_string()))
        }
    };

    let imaging = imaging.map_or_else(ImagingOptions::default, |args| ImagingOptions {
        trials: args.trials,
        header_prefix: args.header_prefix,
        sign: args.sign,
        buffer_frames: args.buffer_frames,
    });

    Ok(ConversionConfig {
        experiment,
        sections: flags.into(),
        imaging,
        output: common.output,
        metadata: Metadata::from_file(&common.metafile)?,
    })
}

fn inspect(file: &Path) -> jaeger_nwb::Result<()> {
    let mut archive = ArchiveReader::open(file)?;
    let manifest = archive.manifest()?;
    println!("identifier:         {}", manifest["identifier"]);
    println!("session start time: {}", manifest["session_start_time"]);
    println!("trials:             {}", manifest["intervals"]["trials"]["count"]);
    println!("electrodes:         {}", manifest["electrodes"].as_array().map_or(0, Vec::len));
    if let Some(acquisition) = manifest["acquisition"].as_array() {
        for entry in acquisition {
            println!("acquisition:        {} ({})", entry["name"], entry["type"]);
        }
    }
    debug!("{} archive entries", archive.entry_names().len());
    Ok(())
}

fn run(command: Command) -> jaeger_nwb::Result<()> {
    if let Command::Inspect { file } = &command {
        return inspect(file);
    }

    let report = Pipeline::new(build_config(command)?).run()?;
    println!(
        "NWB file saved with size: {:.3} MB ({})",
        report.size_mb(),
        report.path.display()
    );
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
