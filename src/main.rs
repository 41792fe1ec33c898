use clap::Parser;
use gpuprov_lib::commands::prompt::TerminalPrompt;
use gpuprov_lib::commands::Cli;
use gpuprov_lib::runner::SystemRunner;
use gpuprov_lib::setup::downloader::HttpFetcher;
use gpuprov_lib::setup::paths::HostPaths;
use gpuprov_lib::{logging, Config, Invocation, Provisioner};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // --help and --version print and exit here
    let invocation = Invocation::from_cli(Cli::parse());

    // 1. Config: defaults, then /etc/gpuprov.json, then environment
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("[ERROR] {}", e);
            std::process::exit(1);
        }
    };

    // 2. Logging to stderr and the append-only log file
    logging::init(&config.log_file);
    for arg in &invocation.unrecognized {
        tracing::warn!("Ignoring unrecognized argument '{}'", arg);
    }

    let fetcher = match HttpFetcher::new() {
        Ok(fetcher) => fetcher,
        Err(e) => {
            tracing::error!("Could not initialize HTTP client: {}", e);
            std::process::exit(1);
        }
    };

    // 3. Run the requested phase against the real host
    let provisioner = Provisioner::new(SystemRunner, fetcher, TerminalPrompt, HostPaths::system(), config);
    let report = provisioner.run(invocation.phase).await;
    std::process::exit(report.exit_code());
}
