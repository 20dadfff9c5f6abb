use anyhow::Result;
use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use sprout::app::App;
use sprout::cli::Cli;
use sprout::model::config::AppConfig;

fn main() {
    let cli = Cli::parse();
    let debug = cli.debug;
    let guard = init_logging(debug);

    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("sprout: {e:#}");
            if debug {
                eprintln!("{e:?}");
            }
            1
        }
    };

    // Flush buffered log lines; process::exit skips destructors.
    drop(guard);
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let config = AppConfig::load(&cli.overrides())?;
    let availability = cli.availability();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async move {
        let app = App::new(config, availability)?;
        Ok::<_, anyhow::Error>(app.run(cli.command).await)
    })
}

/// Logs go to stderr so stdout stays free for plugin output.
fn init_logging(debug: bool) -> WorkerGuard {
    let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
    let default = if debug { "sprout=debug" } else { "sprout=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_env_filter(filter)
        .with_target(debug)
        .without_time()
        .init();
    guard
}
