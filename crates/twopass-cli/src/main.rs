use clap::{Arg, Command, ValueHint};

mod external;
mod input;
mod runner;

use input::Input;
use runner::Runner;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::default()
        .filter_level(log::LevelFilter::Error)
        .parse_env(
            env_logger::Env::default().filter_or("TWOPASS_LOG", "error,twopass=info,twopass_core=info"),
        )
        .init();

    let matches = Command::new("twopass")
        .version(clap::crate_version!())
        .about(
            "Two-pass spectrum re-scoring with cross-run match transfer \
             and picked protein group FDR",
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .required(true)
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help("Path to configuration parameters (JSON file)")
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("output_directory")
                .short('o')
                .long("output_directory")
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help(
                    "Path where all pipeline results will be written. \
                     Overrides the directory specified in the configuration file.",
                )
                .value_hint(ValueHint::DirPath),
        )
        .get_matches();

    let input = Input::from_arguments(matches)?;
    let settings = input.build()?;
    Runner::new(settings).run()
}
