use gdrived::daemon::{DaemonConfig, DaemonRuntime, init_logging};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Run,
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Run;
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "--help" | "-h" => mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    if parse_cli_mode(std::env::args())? == CliMode::Help {
        println!("Usage: gdrived [--help]");
        println!("  Runs the Google Drive transfer daemon with a JSON-RPC endpoint.");
        println!("  Configuration is read from GDRIVE_* and GDRIVED_* environment variables.");
        return Ok(());
    }
    init_logging()?;
    let config = DaemonConfig::from_env()?;
    let daemon = DaemonRuntime::bootstrap(config).await?;
    daemon.run().await
}
