use actix_web::{HttpResponse, Responder, get, post, web};
use log::{info, warn};

use super::models::{AppState, ChainResponse, RequestedResponse};
use crate::transaction::NodeId;

/// Retained chain window of one node.
#[get("/nodes/{id}/chain/")]
pub async fn get_chain(state: web::Data<AppState>, path: web::Path<NodeId>) -> impl Responder {
    let id = path.into_inner();
    let node = match state.node(id) {
        Ok(node) => node,
        Err(e) => return HttpResponse::NotFound().body(e.to_string()),
    };
    let status = node.status();
    match node.chain() {
        Ok(chain) => HttpResponse::Ok().json(ChainResponse {
            node_id: id,
            length: status.chain_length,
            last_index: status.last_index,
            chain,
        }),
        Err(e) => {
            warn!("API - cannot serialize chain of node {id}: {e}");
            HttpResponse::InternalServerError().body(e.to_string())
        }
    }
}

/// Ask a node to produce a block (wakes the PoW miner; a Raft leader cuts one).
#[post("/nodes/{id}/blocks/")]
pub async fn request_block(state: web::Data<AppState>, path: web::Path<NodeId>) -> impl Responder {
    let id = path.into_inner();
    let node = match state.node(id) {
        Ok(node) => node,
        Err(e) => return HttpResponse::NotFound().body(e.to_string()),
    };
    match node.request_block() {
        Ok(()) => {
            info!("API - block requested on node {id}");
            HttpResponse::Accepted().json(RequestedResponse {
                node_id: id,
                event: "CreateBlock",
            })
        }
        Err(e) => HttpResponse::Conflict().body(format!("node {id} is not running: {e}")),
    }
}
