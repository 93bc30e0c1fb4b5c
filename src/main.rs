use clustercode::api;
use clustercode::cancel::handler::CancellationHandler;
use clustercode::cleanup::service::CleanupPipeline;
use clustercode::cluster::facade::ClusterFacade;
use clustercode::config::NodeConfig;
use clustercode::media::profile::ProfileResolver;
use clustercode::media::scanner::FileMediaScanner;
use clustercode::media::selection::MediaSelector;
use clustercode::membership::gossip::GossipTransport;
use clustercode::membership::service::MembershipService;
use clustercode::progress::cache::ProgressCache;
use clustercode::registry::store::TaskRegistry;
use clustercode::shutdown;
use clustercode::transcode::process::ProcessTranscoder;
use clustercode::transcode::service::TranscodingService;
use clustercode::workflow::actions::WorkflowServices;
use clustercode::workflow::machine::WorkflowMachine;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

struct CliArgs {
    config_file: Option<PathBuf>,
    bind: Option<SocketAddr>,
    seeds: Vec<SocketAddr>,
}

fn parse_args() -> anyhow::Result<CliArgs> {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        config_file: None,
        bind: None,
        seeds: Vec::new(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" | "--seed" if i + 1 >= args.len() => {
                eprintln!("Usage: {} [config-file] [--bind <addr:port>] [--seed <addr:port>]...", args[0]);
                anyhow::bail!("{} requires a value", args[i]);
            }
            "--bind" => {
                cli.bind = Some(args[i + 1].parse()?);
                i += 2;
            }
            "--seed" => {
                cli.seeds.push(args[i + 1].parse()?);
                i += 2;
            }
            other => {
                if cli.config_file.is_none() && !other.starts_with("--") {
                    cli.config_file = Some(PathBuf::from(other));
                }
                i += 1;
            }
        }
    }

    Ok(cli)
}

fn load_dotenv(cli: &CliArgs) {
    let file = cli
        .config_file
        .clone()
        .or_else(|| std::env::var("CC_CONFIG_FILE").ok().map(PathBuf::from));

    match file {
        Some(path) => {
            if let Err(err) = dotenvy::from_path(&path) {
                eprintln!("Cannot load config file {}: {}", path.display(), err);
            }
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = parse_args()?;
    load_dotenv(&cli);
    init_tracing();

    // 1. Configuration (fatal before joining):
    let mut config = match NodeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("Invalid configuration: {}", err);
            std::process::exit(1);
        }
    };
    if let Some(bind) = cli.bind {
        config.bind_addr = bind.ip();
        config.bind_port = bind.port();
    }

    let mut seeds = match config.seeds() {
        Ok(seeds) => seeds,
        Err(err) => {
            tracing::error!("Invalid configuration: {}", err);
            std::process::exit(1);
        }
    };
    seeds.extend(cli.seeds);

    let member_name = config.member_name();
    tracing::info!("Starting node {} on {}", member_name, config.bind_socket());
    if seeds.is_empty() {
        tracing::info!("No seeds configured, starting as founder");
    } else {
        tracing::info!("Seed nodes: {:?}", seeds);
    }

    // 2. Cluster layer:
    let transport = GossipTransport::new(config.gossip_settings(member_name, seeds));
    let membership = MembershipService::new(Arc::new(transport));
    let registry = TaskRegistry::new(membership.clone(), config.orphan_timeout);

    let transcoder: Arc<dyn TranscodingService> =
        Arc::new(ProcessTranscoder::new(config.transcoder_settings()));
    let progress = Arc::new(ProgressCache::new());
    progress.clone().follow(transcoder.progress());

    let cancellation =
        CancellationHandler::new(membership.clone(), transcoder.clone(), config.cancel_timeout);
    let cluster = ClusterFacade::new(
        membership,
        registry,
        cancellation,
        progress,
        config.cluster_settings(),
    );

    // 3. Collaborators:
    let constraints = config.build_constraints()?;
    let services = WorkflowServices {
        cluster: cluster.clone(),
        scanner: Arc::new(FileMediaScanner::new(config.scan_settings())),
        selection: Arc::new(MediaSelector::new(constraints, cluster.clone())),
        profiles: Arc::new(ProfileResolver::from_kinds(
            &config.profile_matchers,
            &config.profile_settings(),
        )),
        transcoder,
        cleanup: Arc::new(CleanupPipeline::from_kinds(
            &config.cleanup,
            &config.cleanup_settings(),
        )),
    };

    // 4. Workflow:
    let workflow = WorkflowMachine::new(services, config.workflow_settings()).start();

    // 5. HTTP server:
    if let Some(http_addr) = config.rest_addr() {
        let app = api::router(cluster.clone());
        let listener = tokio::net::TcpListener::bind(http_addr).await?;
        tracing::info!("HTTP server listening on {}", http_addr);

        tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app).await {
                tracing::error!("HTTP server failed: {}", err);
            }
        });
    } else {
        tracing::info!("REST API disabled");
    }

    tracing::info!("Press Ctrl+C to shutdown");
    shutdown::signal().await;

    tracing::info!("Shutting down");
    workflow.shutdown().await;

    Ok(())
}
