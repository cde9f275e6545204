mod chain;
mod health;
pub mod models;
mod nodes;
mod stats;
mod tx;

use actix_web::web::{self, ServiceConfig};

pub use models::AppState;

pub fn init_routes(cfg: &mut ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(health::health_check)
            .service(nodes::list_nodes)
            .service(chain::get_chain)
            .service(chain::request_block)
            .service(tx::request_transaction)
            .service(stats::get_stats),
    );
}

#[cfg(test)]
mod tests {
    use super::{AppState, init_routes};
    use crate::config::Mechanism;
    use crate::consensus::PowConsensus;
    use crate::node::LocalCluster;
    use actix_web::{App, http::StatusCode, test, web};

    #[actix_web::test]
    async fn routes_expose_nodes_chain_and_stats() {
        let cluster = LocalCluster::launch(&[1, 2], 0, |id| PowConsensus::new(id, 1, 10));
        let state = web::Data::new(AppState::new(Mechanism::Pow, cluster.nodes().to_vec()));
        let app = test::init_service(App::new().app_data(state).configure(init_routes)).await;

        let req = test::TestRequest::get().uri("/api/v1/health/").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::get().uri("/api/v1/nodes/").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["mechanism"], "pow");
        assert_eq!(body["nodes"].as_array().map(Vec::len), Some(2));

        let req = test::TestRequest::get().uri("/api/v1/nodes/2/chain/").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["node_id"], 2);
        assert!(body["chain"].is_array());

        let req = test::TestRequest::get().uri("/api/v1/nodes/7/chain/").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::post().uri("/api/v1/nodes/1/transactions/").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::ACCEPTED);

        let req = test::TestRequest::get().uri("/api/v1/stats/").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["network_size"], 2);

        for node in cluster.nodes() {
            node.stop();
        }
        cluster.wait().await;
    }
}
