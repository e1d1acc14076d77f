use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use doin_consensus_core::config::{MAINNET_PARAMS, SIMNET_PARAMS};
use doin_consensus_core::domain::PluginRegistry;
use doin_consensus_core::sign::keypair_from_secret;

use doin_core::core::Core;
use doin_core::log::init_logger;
use doin_core::signals::Signals;
use doin_core::{error, info};

use doin_consensus::processes::anchor::MemoryAnchorSink;

use doind::args::Args;
use doind::daemon::{DoinNode, NodeConfig, NodeService};
use doind::plugins::{quadratic_domain, quadratic_plugins};
use doind::transport::ChannelNetwork;

pub fn main() -> ExitCode {
    let args = Args::parse();
    init_logger(&args.log_level);
    info!("doind v{} starting", env!("CARGO_PKG_VERSION"));

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(RunError::Config(msg)) => {
            error!("configuration error: {msg}");
            ExitCode::from(2)
        }
        Err(RunError::Fatal(msg)) => {
            error!("fatal: {msg}");
            ExitCode::from(1)
        }
    }
}

enum RunError {
    Config(String),
    Fatal(String),
}

fn run(args: Args) -> Result<(), RunError> {
    let params = if args.simnet { SIMNET_PARAMS.clone() } else { MAINNET_PARAMS.clone() };
    params.validate().map_err(|e| RunError::Config(e.to_string()))?;

    let secret = match &args.secret_hex {
        Some(hex_str) => {
            let mut secret = [0u8; 32];
            hex::decode_to_slice(hex_str, &mut secret).map_err(|e| RunError::Config(format!("bad --secret: {e}")))?;
            secret
        }
        None => *doin_consensus_core::sign::signing_digest(uuid::Uuid::new_v4().as_bytes()).as_bytes(),
    };
    let keypair = keypair_from_secret(&secret).map_err(|e| RunError::Config(e.to_string()))?;
    let identity = doin_consensus_core::sign::peer_id_of(&keypair);

    let mut registry = PluginRegistry::new();
    registry.register(quadratic_domain(), quadratic_plugins()).map_err(|e| RunError::Config(e.to_string()))?;

    for domain in &args.evaluator_domains {
        if !registry.contains(domain) {
            return Err(RunError::Config(format!("unknown evaluator domain {domain}")));
        }
    }

    // transport seam: the daemon ships with the in-process mesh; a socket
    // layer plugs in here without touching the node
    let network = ChannelNetwork::new();
    let config = NodeConfig {
        params: params.clone(),
        evaluator_domains: args.evaluator_domains.clone(),
        generate_blocks: true,
        worker_threads: 2,
    };

    let transport = Box::new(network.join(identity));
    let mut node =
        DoinNode::new(keypair, config, registry, Arc::new(MemoryAnchorSink::new()), transport).map_err(|e| RunError::Fatal(e.to_string()))?;

    if let Some(appdir) = &args.appdir {
        let dir = PathBuf::from(appdir);
        std::fs::create_dir_all(&dir).map_err(|e| RunError::Config(format!("cannot create {}: {e}", dir.display())))?;
        node.attach_chain_log(&dir.join("chain.log")).map_err(|e| RunError::Fatal(e.to_string()))?;
    }

    let core = Arc::new(Core::new());
    let signals = Arc::new(Signals::new(core.clone()));
    signals.init();

    core.bind(Arc::new(NodeService::new(node)));
    core.run();

    info!("doind shut down cleanly");
    Ok(())
}
