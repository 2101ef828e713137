mod soak;

use clap::Parser;
use std::path::PathBuf;
use tether_runtime::Config;

#[derive(Parser)]
#[command(name = "tether-soak")]
#[command(about = "Attaches and drops handles from many threads and checks the reference counts", long_about = None)]
struct Cli {
    #[arg(long, default_value_t = 8, help = "Number of threads")]
    threads: usize,

    #[arg(long, default_value_t = 10_000, help = "Total number of handles per round")]
    handles: usize,

    #[arg(long, default_value_t = 1, help = "Number of rounds")]
    rounds: usize,

    #[arg(long, default_value = tether_runtime::config::FILENAME, help = "Path to the config")]
    config: PathBuf,
}

pub fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = Config::read(&cli.config)?;

    log::info!(
        "Soaking {} handles on {} threads for {} rounds",
        cli.handles,
        cli.threads,
        cli.rounds
    );
    let plan = soak::Plan {
        threads: cli.threads,
        handles: cli.handles,
        rounds: cli.rounds,
    };
    let report = soak::run(&plan, config)?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    anyhow::ensure!(report.consistent, "Reference counts are inconsistent");
    Ok(())
}
