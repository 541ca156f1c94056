use clap::Parser;
use log::info;
use server::network::MockServer;
use server::session::MockSession;
use tokio::sync::watch;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "38281")]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let address = format!("{}:{}", args.host, args.port);

    let server = MockServer::bind(&address, MockSession::sample()).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut server_handle = tokio::spawn(server.run(shutdown_rx));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
            let _ = shutdown_tx.send(true);
            let _ = (&mut server_handle).await;
        }
        _ = &mut server_handle => {}
    }

    Ok(())
}
