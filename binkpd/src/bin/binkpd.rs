use anyhow::Context as _;
use binkp_network::{Context, Registry};
use binkpd::{
    links::Links,
    network::{Network, Overrides},
    report::Report,
    storage::Storage,
    Config,
};
use std::{path::PathBuf, sync::Arc};
use structopt::StructOpt;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(StructOpt, Debug)]
struct Args {
    /// set log levels
    ///
    /// useful for trying to debug the sessions with the links
    #[structopt(long = "log-level", default_value = "info", global = true)]
    log_level: Level,

    /// path of the configuration file of the mailer
    #[structopt(long = "config")]
    config: PathBuf,

    #[structopt(flatten)]
    network: Overrides,
}

#[tokio::main]
async fn main() {
    if let Err(error) = main_run().await {
        eprintln!("{:?}", error);
        std::process::exit(1);
    }
}

async fn main_run() -> anyhow::Result<()> {
    let args = Args::from_args();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    let mut config = Config::from_file(&args.config).context("cannot load initial settings")?;
    args.network.apply(&mut config.network);

    if config.station.addresses.is_empty() {
        anyhow::bail!("the station needs at least one address");
    }

    let storage = Storage::new(config.storage.clone()).context("Cannot load storage")?;
    let links = Arc::new(Links::new(config.links.clone(), config.nodelist.clone()));
    let report = Arc::new(Report::default());

    let context = Context {
        config: Arc::new(config.engine()),
        registry: Registry::new(config.network.max_connections),
        nodes: links.clone(),
        outbound: storage.outbound(),
        inbound: storage.inbound(),
        events: report.clone(),
    };

    tracing::info!(
        address = %config.station.addresses[0],
        software = binkp_network::SOFTWARE,
        "starting the mailer"
    );

    let network = Network::new(context, links, storage, report, config.network)
        .await
        .context("Cannot load the network task")?;

    println!("ctrl-c to stop the node...");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shuting down via CTRL-C instruction")
        }
    }

    network
        .shutdown()
        .await
        .context("Cannot shutdown the network task")?;

    // give an extra 200ms for the running sessions to notice
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    Ok(())
}
