use jobsh::{Interpreter, ShellConfig};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Logs go to stderr so they never mix with command output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("JOBSH_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config: ShellConfig = argh::from_env();
    let mut shell = Interpreter::new(config.clone())?;
    tracing::debug!(?config, "starting jobsh");

    match config.command.as_deref() {
        Some(line) => {
            shell.run_line(line);
        }
        None => {
            if !config.quiet {
                println!("=== jobsh ===");
                println!("Type 'help' for commands or 'exit' to quit.");
                println!();
            }
            shell.repl()?;
        }
    }

    let status = shell.shutdown();
    std::process::exit(status)
}
