use anyhow::Context;
use clap::Parser;
use futures::FutureExt;
use std::path::PathBuf;
use std::time::Duration;

/// Agent is a daemon which curates station metadata submissions: it serves
/// the intake API and runs the lifecycle worker plus availability checker.
#[derive(Debug, Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Address to bind the API server on.
    #[clap(long, env = "SERVICE_HOST", default_value = "0.0.0.0")]
    host: String,
    /// Port to bind the API server on.
    #[clap(long, env = "SERVICE_PORT", default_value = "8080")]
    port: u16,
    /// Root directory of the content-addressed blob store.
    #[clap(long = "metadata-path", env = "METADATA_PATH", default_value = "./metadata")]
    metadata_path: PathBuf,
    /// Directory of the metadata index database.
    #[clap(long = "index-path", env = "INDEX_PATH", default_value = "./index")]
    index_path: PathBuf,
    /// Upload request body cap, in bytes.
    #[clap(long = "max-post-bytes", env = "MAX_POST_BYTES", default_value = "104857600")]
    max_post_bytes: u64,
    /// Daemon sleep between idle polls.
    #[clap(
        long = "poll-interval",
        env = "POLL_INTERVAL",
        default_value = "2s",
        value_parser = humantime::parse_duration,
    )]
    poll_interval: Duration,
    /// Cadence of the availability checker.
    #[clap(
        long = "availability-interval",
        env = "AVAILABILITY_INTERVAL",
        default_value = "60s",
        value_parser = humantime::parse_duration,
    )]
    availability_interval: Duration,
    /// Directory of network prototype documents, ingested at startup and
    /// via the admin RPC.
    #[clap(long = "prototype-dir", env = "PROTOTYPE_DIR")]
    prototype_dir: Option<PathBuf>,
    /// The external converter/merger executable.
    #[clap(long = "converter", env = "CONVERTER_BIN")]
    converter: Option<PathBuf>,
    /// Wall-clock limit per converter invocation.
    #[clap(
        long = "converter-timeout",
        env = "CONVERTER_TIMEOUT",
        default_value = "120s",
        value_parser = humantime::parse_duration,
    )]
    converter_timeout: Duration,
    /// Public FDSN station webservice used by the availability checker.
    #[clap(long = "fdsnws-url", env = "FDSNWS_URL")]
    fdsnws_url: Option<url::Url>,
    /// Identifier of this data-center node.
    #[clap(long = "node-id", env = "NODE_ID", default_value = "local")]
    node_id: String,
    /// Purge Deleted records and their unreferenced blobs.
    #[clap(long = "purge-deleted", env = "PURGE_DELETED")]
    purge_deleted: bool,
    /// Reconfigure and restart the downstream query service after each
    /// successful full merge.
    #[clap(long = "restart-on-merge", env = "RESTART_ON_MERGE")]
    restart_on_merge: bool,
    /// Create an administrator account with this password when the user
    /// collection is still empty.
    #[clap(
        long = "bootstrap-admin-password",
        env = "ADMIN_PASSWORD",
        hide_env_values = true
    )]
    bootstrap_admin_password: Option<Secret>,
}

/// A CLI secret whose value never reaches the logs.
#[derive(Clone)]
struct Secret(String);

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<redacted>")
    }
}

impl std::str::FromStr for Secret {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

fn main() -> Result<(), anyhow::Error> {
    // Use reasonable defaults for printing structured logs to stderr.
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting tracing default failed");

    let args = Args::parse();
    tracing::info!(?args, "started!");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let task = runtime.spawn(async move { async_main(args).await });
    let result = runtime.block_on(task);

    tracing::info!(?result, "main function completed, shutting down runtime");
    runtime.shutdown_timeout(std::time::Duration::from_secs(5));
    result?
}

async fn async_main(args: Args) -> Result<(), anyhow::Error> {
    // Bind early in the application lifecycle, to not fail requests which
    // may dispatch as soon as the process is up.
    let listener = tokio::net::TcpListener::bind((args.host.as_str(), args.port))
        .await
        .context("failed to bind server port")?;

    let config = agent::Config {
        metadata_path: args.metadata_path,
        max_post_bytes: args.max_post_bytes,
        poll_interval: args.poll_interval,
        availability_interval: args.availability_interval,
        prototype_dir: args.prototype_dir,
        converter: args.converter,
        converter_timeout: args.converter_timeout,
        fdsnws_url: args.fdsnws_url,
        node_id: args.node_id,
        purge_deleted: args.purge_deleted,
        restart_on_merge: args.restart_on_merge,
        ..Default::default()
    };

    tokio::fs::create_dir_all(&config.metadata_path)
        .await
        .context("creating the blob root")?;
    let store = store::Store::open(&args.index_path).context("opening the metadata index")?;
    let blobs = store::BlobStore::new(&config.metadata_path);

    if let Some(Secret(password)) = &args.bootstrap_admin_password {
        if store.accounts.users()?.is_empty() {
            let admin = store
                .accounts
                .create_user("admin", password, models::Role::Admin, None)?;
            tracing::info!(id = %admin.id, "bootstrapped administrator account");
        }
    }

    if let Some(dir) = &config.prototype_dir {
        let reports =
            agent::ingest_prototype_dir(&store, &blobs, config.executor().as_ref(), dir)
                .await
                .context("ingesting the prototype directory")?;
        tracing::info!(count = reports.len(), "ingested prototype directory");
    }

    // Share-able future which completes when the agent should exit.
    let shutdown = tokio::signal::ctrl_c().map(|_| ()).shared();

    let app = agent::api::App::new(store.clone(), blobs.clone(), config.clone());
    let router = agent::api::build_router(app);
    let api_server = axum::serve(listener, router).with_graceful_shutdown(shutdown.clone());
    let api_server = async move { anyhow::Result::Ok(api_server.await?) };

    let daemon = agent::Daemon::new(store.clone(), blobs.clone(), config.clone());
    let checker = agent::AvailabilityChecker::new(store.clone(), config.clone());

    let ((), (), ()) = tokio::try_join!(
        daemon.run(shutdown.clone()),
        checker.run(shutdown.clone()),
        api_server,
    )?;

    store.flush()?;
    Ok(())
}
