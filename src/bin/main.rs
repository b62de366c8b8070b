use ipgeo::builder::{CountryMetadataBuilder, Downloader, RangeTableBuilder};
use ipgeo::config::{parse_config, Config};
use ipgeo::geo::GeolocationStore;
use ipgeo::kv::KvStore;
use ipgeo::refresher::Refresher;
use ipgeo::service::{log_response, make_error_response, GeolocationService};

use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Server};
use std::convert::Infallible;
use std::path::Path;
use std::sync::Arc;

const DEFAULT_CONFIG_PATH: &str = "ipgeo.toml";
const USAGE: &str = "usage: ipgeo <serve|build-ranges|build-countries|lookup IP> [CONFIG]";

enum Command {
    Serve,
    BuildRanges,
    BuildCountries,
    Lookup(String),
}

fn parse_args<I>(mut args: I) -> anyhow::Result<(Command, Option<String>)>
where
    I: Iterator<Item = String>,
{
    let command = match args.next().as_deref() {
        Some("serve") => Command::Serve,
        Some("build-ranges") => Command::BuildRanges,
        Some("build-countries") => Command::BuildCountries,
        Some("lookup") => Command::Lookup(args.next().ok_or_else(|| anyhow::anyhow!(USAGE))?),
        _ => anyhow::bail!(USAGE),
    };
    Ok((command, args.next()))
}

fn load_config(path: Option<String>) -> anyhow::Result<Config> {
    match path {
        Some(path) => parse_config(path),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => parse_config(DEFAULT_CONFIG_PATH),
        None => Ok(Config::from_toml_str("")?.with_env_overrides(|name| std::env::var(name).ok())),
    }
}

async fn serve(config: Config, kv: Arc<dyn KvStore>) -> anyhow::Result<()> {
    let host = config.host;

    let store = Arc::new(GeolocationStore::new(kv));
    store.load().await;
    let _refresher = config
        .reload_interval
        .map(|interval| Refresher::start(store.clone(), interval.into()));
    let service = Arc::new(GeolocationService::from_config(&config, store));

    let make_service = make_service_fn(move |connection: &AddrStream| {
        let socket_remote_ip = connection.remote_addr().ip();
        let service = service.clone();
        let service = service_fn(move |request: Request<Body>| {
            let service = service.clone();
            async move {
                let response = service
                    .response(socket_remote_ip, &request)
                    .unwrap_or_else(make_error_response);
                log_response(socket_remote_ip, &request, &response);
                Ok::<_, Infallible>(response)
            }
        });
        async move { Ok::<_, Infallible>(service) }
    });

    let server = Server::try_bind(&host)?.serve(make_service);
    log::info!("listening on {host}");

    if let Err(e) = server.await {
        log::error!("server error: {}", e);
    }
    Err(anyhow::anyhow!("server exited"))
}

async fn async_main(command: Command, config: Config) -> anyhow::Result<()> {
    simple_logger::init_with_level(config.log_level)?;

    let store_config = config.store.clone();
    let kv: Arc<dyn KvStore> =
        Arc::new(tokio::task::spawn_blocking(move || store_config.open()).await??);

    match command {
        Command::Serve => serve(config, kv).await,
        Command::BuildRanges => {
            RangeTableBuilder::from_config(&config.ranges, kv, Downloader::new())?
                .build()
                .await?;
            Ok(())
        }
        Command::BuildCountries => {
            CountryMetadataBuilder::from_config(&config.countries, kv, Downloader::new())?
                .build()
                .await?;
            Ok(())
        }
        Command::Lookup(ip) => {
            let store = GeolocationStore::new(kv);
            store.load().await;
            let country = store.resolve_country(&ip)?;
            println!("{}", serde_json::to_string(&country)?);
            Ok(())
        }
    }
}

fn main() -> anyhow::Result<()> {
    let (command, config_path) = parse_args(std::env::args().skip(1))?;
    let config = load_config(config_path)?;

    #[cfg(feature = "multi-thread")]
    let mut runtime_builder = match config.threads.map(usize::from) {
        Some(1) => tokio::runtime::Builder::new_current_thread(),
        Some(threads) => {
            let mut builder = tokio::runtime::Builder::new_multi_thread();
            builder.worker_threads(threads);
            builder
        }
        None => tokio::runtime::Builder::new_multi_thread(),
    };
    #[cfg(not(feature = "multi-thread"))]
    let mut runtime_builder = tokio::runtime::Builder::new_current_thread();
    let runtime = runtime_builder.enable_all().build()?;

    runtime.block_on(async_main(command, config))
}
