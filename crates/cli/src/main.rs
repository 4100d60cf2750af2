// switchboard-agent entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;
use url::Url;

mod agent;
mod output;

use agent::{parse_gateway_url, AgentOptions, DEFAULT_GATEWAY_URL};
use output::OutputFormat;

#[derive(Parser)]
#[command(name = "switchboard-agent", about = "Connect to a switchboard gateway as a client")]
struct Cli {
    /// Gateway WebSocket endpoint.
    #[arg(
        long,
        env = "SWITCHBOARD_URL",
        default_value = DEFAULT_GATEWAY_URL,
        value_parser = parse_gateway_url
    )]
    url: Url,

    /// Message to send after the welcome frame (repeatable).
    #[arg(long = "send", value_name = "MESSAGE")]
    messages: Vec<String>,

    /// Keep the connection open and print pushed messages.
    #[arg(long)]
    listen: bool,

    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let format = OutputFormat::detect(cli.json);
    let options = AgentOptions { url: cli.url, messages: cli.messages, listen: cli.listen };

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    let result = runtime.block_on(agent::run(&options, format, &mut std::io::stdout()));
    if let Err(error) = &result {
        output::print_error(format, error);
    }
    result
}

// Logs go to stderr so stdout stays machine-readable.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::Cli;

    #[test]
    fn defaults_target_local_gateway() {
        let cli = Cli::try_parse_from(["switchboard-agent"]).expect("defaults should parse");
        assert_eq!(cli.url.as_str(), "ws://localhost:8080/ws/connect");
        assert!(cli.messages.is_empty());
        assert!(!cli.listen);
    }

    #[test]
    fn send_is_repeatable_and_order_preserving() {
        let cli = Cli::try_parse_from([
            "switchboard-agent",
            "--send",
            "first",
            "--send",
            "second",
            "--listen",
        ])
        .expect("flags should parse");
        assert_eq!(cli.messages, ["first", "second"]);
        assert!(cli.listen);
    }

    #[test]
    fn non_websocket_url_is_rejected() {
        assert!(Cli::try_parse_from(["switchboard-agent", "--url", "http://localhost:8080"]).is_err());
    }
}
