use actix_web::{HttpResponse, Responder, post, web};
use log::info;

use super::models::{AppState, RequestedResponse};
use crate::transaction::NodeId;

/// Ask a node to stamp and submit a fresh local transaction.
#[post("/nodes/{id}/transactions/")]
pub async fn request_transaction(
    state: web::Data<AppState>,
    path: web::Path<NodeId>,
) -> impl Responder {
    let id = path.into_inner();
    let node = match state.node(id) {
        Ok(node) => node,
        Err(e) => return HttpResponse::NotFound().body(e.to_string()),
    };
    match node.request_transaction() {
        Ok(()) => {
            info!("API - transaction requested on node {id}");
            HttpResponse::Accepted().json(RequestedResponse {
                node_id: id,
                event: "CreateTransaction",
            })
        }
        Err(e) => HttpResponse::Conflict().body(format!("node {id} is not running: {e}")),
    }
}
