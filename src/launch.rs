use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use argh::FromArgs;
use exitcode::ExitCode;
use logforge::config::Config;
use logforge::{app, get_version, signal, trace};
use tracing::{error, info};

fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[derive(FromArgs)]
#[argh(
    description = "Logforge receives syslog messages over UDP and TCP and stores them in PostgreSQL",
    help_triggers("-h", "--help")
)]
pub struct RootCommand {
    #[argh(switch, short = 'v', description = "show version")]
    version: bool,

    #[argh(
        option,
        short = 'c',
        long = "config",
        description = "read configuration from a YAML file, environment variables override it"
    )]
    config: Option<PathBuf>,

    #[argh(
        option,
        short = 'l',
        default = "\"info\".to_string()",
        description = "log level, LOGFORGE_LOG takes precedence"
    )]
    log_level: String,

    #[argh(switch, description = "write logs as JSON")]
    log_json: bool,

    #[argh(
        option,
        short = 't',
        default = "default_worker_threads()",
        description = "specify how many threads the Tokio runtime will use"
    )]
    threads: usize,
}

impl RootCommand {
    #![allow(clippy::print_stdout)]
    fn show_version(&self) {
        println!("Logforge {}", get_version());
    }

    pub fn run(&self) -> Result<(), ExitCode> {
        if self.version {
            self.show_version();
            return Ok(());
        }

        let levels =
            std::env::var("LOGFORGE_LOG").unwrap_or_else(|_| trace::levels(&self.log_level));
        let color = std::io::stderr().is_terminal();
        trace::init(color, self.log_json, &levels);

        let config = Config::load(self.config.as_deref()).map_err(|err| {
            error!(message = "Load configuration failed", %err);
            exitcode::CONFIG
        })?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .thread_name("logforge-worker")
            .worker_threads(self.threads.max(1))
            .enable_io()
            .enable_time()
            .build()
            .map_err(|err| {
                error!(message = "Build runtime failed", %err);
                exitcode::OSERR
            })?;

        info!(
            message = "Start logforge",
            version = %get_version(),
            threads = self.threads,
            config = ?self.config,
        );

        let code = runtime.block_on(async move {
            let signals = signal::os_signals().map_err(|err| {
                error!(message = "Install signal handlers failed", %err);
                exitcode::OSERR
            })?;

            Ok::<_, ExitCode>(app::run(config, signals).await)
        })?;

        runtime.shutdown_timeout(Duration::from_secs(5));

        match code {
            exitcode::OK => Ok(()),
            code => Err(code),
        }
    }
}
