mod api;
mod blockchain;
mod config;
mod consensus;
mod error;
mod events;
mod metrics;
mod network;
mod node;
mod transaction;

use actix_web::{App, HttpServer, web};
use dotenvy::dotenv;
use log::{error, info};

use api::AppState;
use config::{Config, Mechanism};
use consensus::{PowConsensus, RaftConsensus};
use node::LocalCluster;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let _ = dotenv();
    env_logger::init();

    let loaded = Config::from_env().and_then(|config| {
        let ids = config.node_ids()?;
        Ok((config, ids))
    });
    let (config, ids) = match loaded {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("{e}");
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, e));
        }
    };
    let host = config.host.clone();
    let port = config.port;

    println!(
        "⛓️ Starting {} consensus bench with {} nodes (stop at {} blocks), API at http://{host}:{port}",
        config.mechanism, config.network_size, config.total_blocks
    );

    let cluster = match config.mechanism {
        Mechanism::Pow => LocalCluster::launch(&ids, config.total_blocks, |id| {
            PowConsensus::new(id, config.difficulty, config.chain_window)
        }),
        Mechanism::Raft => LocalCluster::launch(&ids, config.total_blocks, |id| {
            RaftConsensus::new(id, &ids, config.election_timeout, config.chain_window)
        }),
    };
    let nodes = cluster.nodes().to_vec();
    let state = web::Data::new(AppState::new(config.mechanism, nodes.clone()));

    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(api::init_routes)
    })
    .bind((host.as_str(), port))?
    .run();

    let handle = server.handle();
    tokio::spawn(async move {
        cluster.wait().await;
        info!("all nodes finished, stopping API");
        handle.stop(true).await;
    });

    let served = server.await;
    for node in &nodes {
        node.stop();
    }
    served
}
