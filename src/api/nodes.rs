use actix_web::{HttpResponse, Responder, get, web};

use super::models::{AppState, NodeResponse, NodesResponse};

/// Driver status of every local node.
#[get("/nodes/")]
pub async fn list_nodes(state: web::Data<AppState>) -> impl Responder {
    let nodes = state
        .nodes
        .iter()
        .map(|node| NodeResponse {
            status: node.status(),
            running: node.is_running(),
        })
        .collect();
    HttpResponse::Ok().json(NodesResponse {
        mechanism: state.mechanism,
        nodes,
    })
}
