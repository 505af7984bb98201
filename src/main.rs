use clap::Parser;
use crm_gate::cli::{
    Args, Command, build_session, handle_serve, handle_session_command, init_logging,
    validate_api_url,
};
use std::time::Duration;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args.log_format);

    let ok = match &args.command {
        Command::Serve { port, dist } => handle_serve(*port, dist.clone()).await,
        command => {
            let Some(api_url) = validate_api_url(&args.api_url) else {
                std::process::exit(1);
            };
            let Some(session) = build_session(&args, api_url) else {
                std::process::exit(1);
            };
            let loading_timeout = Duration::from_millis(args.loading_timeout_ms);
            handle_session_command(&session, command, loading_timeout).await
        }
    };

    if !ok {
        std::process::exit(1);
    }
}
