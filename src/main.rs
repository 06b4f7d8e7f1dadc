use anyhow::{bail, Context, Result};

use postreel::RunOptions;
use postreel::sources::{self, SourceKey};

fn main() {
    let options = match handle_cli_flags() {
        Ok(Some(options)) => options,
        Ok(None) => return,
        Err(err) => {
            eprintln!("error: {err:?}");
            std::process::exit(2);
        }
    };

    if let Err(err) = postreel::run_with(options) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

/// Returns `None` when a flag was handled and the viewer should not start.
fn handle_cli_flags() -> Result<Option<RunOptions>> {
    let mut options = RunOptions::default();
    let mut saw_flag = false;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("postreel {}", postreel::VERSION);
                saw_flag = true;
            }
            "--help" | "-h" => {
                println!(
                    "postreel - Step through a year of embedded posts from the terminal.\n\n  --year <YEAR>        Start on the given year\n  --list-years         List available years and exit\n  --version, -V        Show version and exit\n  --help,    -h        Show this help message"
                );
                saw_flag = true;
            }
            "--list-years" => {
                for entry in sources::list() {
                    println!("{}\t{}", entry.key, entry.url);
                }
                saw_flag = true;
            }
            "--year" => {
                let value = args.next().context("--year needs a value")?;
                let key: SourceKey = value
                    .parse()
                    .with_context(|| format!("invalid year {value:?}"))?;
                if sources::find(key).is_none() {
                    bail!("no post list for year {key}; see --list-years");
                }
                options.year = Some(key);
            }
            _ => {}
        }
    }
    Ok(if saw_flag { None } else { Some(options) })
}
