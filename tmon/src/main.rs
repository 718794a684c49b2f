use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use tmon::console::Console;
use tmon::demos;
use tmon::machine::{Machine, MachineConfig, DEFAULT_MAX_STEPS};
use tmon::queue::{MIN_QUEUE_CAPACITY, QUEUE_CAPACITY};
use tmon::snapshot::load_snapshot_from_path;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Slots of the expected trap queue
    #[arg(long, default_value_t = QUEUE_CAPACITY, value_parser = parse_capacity)]
    queue_capacity: usize,

    /// Operations a program may retire before it is stopped
    #[arg(long, default_value_t = DEFAULT_MAX_STEPS)]
    max_steps: u64,

    /// SRAM size in KiB
    #[arg(long, default_value_t = 1024)]
    sram_kib: usize,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the demo programs
    List,

    /// Run demo programs in order, stopping at the first failure
    Run {
        #[arg(required = true)]
        demos: Vec<String>,

        /// Save a snapshot of the machine after each program to this path
        #[arg(long)]
        dump: Option<PathBuf>,
    },

    /// Print the summary of a saved snapshot
    Show { snapshot: PathBuf },
}

fn parse_capacity(arg: &str) -> Result<usize, String> {
    let capacity: usize = arg.parse().map_err(|e| format!("{}", e))?;
    if capacity < MIN_QUEUE_CAPACITY {
        return Err(format!("the queue needs at least {} slots", MIN_QUEUE_CAPACITY));
    }
    Ok(capacity)
}

fn exit_code(status: i32) -> ExitCode {
    ExitCode::from(status as u8)
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let sram_size = args
        .sram_kib
        .checked_mul(1024)
        .ok_or("Requested SRAM size is too large")?;
    let config = MachineConfig {
        queue_capacity: args.queue_capacity,
        sram_size,
        max_steps: args.max_steps,
    };

    match args.command {
        Command::List => {
            for demo in demos::list() {
                println!("{:<16} {}", demo.name, demo.about);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Run { demos: names, dump } => {
            for name in &names {
                let demo = demos::find(name).ok_or_else(|| format!("unknown demo '{}'", name))?;
                println!("== {}: {}", demo.name, demo.about);

                let mut machine = Machine::new(config.clone());
                machine.console = Console::stdout();
                let status = machine.run(demo.program);

                if let Some(path) = &dump {
                    machine.save_snapshot_to_path(path)?;
                    log::info!("snapshot saved to {}", path.display());
                }
                if status != 0 {
                    if let Some(halt) = machine.last_halt() {
                        eprintln!("{}: {}", demo.name, halt);
                    }
                    return Ok(exit_code(status));
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Show { snapshot } => {
            let snap = load_snapshot_from_path(&snapshot)?;
            for line in snap.summary() {
                println!("{}", line);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_capacity_flag_needs_two_slots() {
        assert_eq!(parse_capacity("128"), Ok(128));
        assert_eq!(parse_capacity("2"), Ok(2));
        assert!(parse_capacity("1").is_err());
        assert!(parse_capacity("lots").is_err());
    }

    #[test]
    fn run_command_parses() {
        let args = Args::try_parse_from(["tmon", "--queue-capacity", "8", "run", "priv", "smpu"]).unwrap();
        assert_eq!(args.queue_capacity, 8);
        assert!(matches!(args.command, Command::Run { ref demos, .. } if demos.len() == 2));
        assert!(Args::try_parse_from(["tmon", "--queue-capacity", "1", "list"]).is_err());
    }
}
