use actix_web::{HttpResponse, Responder, get, web};

use super::models::{AppState, NodeStatsResponse, StatsResponse};

/// Benchmark counters of every node.
#[get("/stats/")]
pub async fn get_stats(state: web::Data<AppState>) -> impl Responder {
    let nodes: Vec<NodeStatsResponse> = state
        .nodes
        .iter()
        .map(|node| {
            let stats = node.stats();
            NodeStatsResponse {
                node_id: node.id(),
                elapsed_ms: stats.elapsed_ms(),
                blocks_per_second: stats.blocks_per_second(),
                stats,
            }
        })
        .collect();
    let finished_nodes = nodes.iter().filter(|n| n.stats.is_finished()).count();

    HttpResponse::Ok().json(StatsResponse {
        mechanism: state.mechanism,
        network_size: state.nodes.len(),
        finished_nodes,
        nodes,
    })
}
