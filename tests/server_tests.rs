use duty_watch::config::Config;
use duty_watch::ledger::{
    DutyLedger, PROPOSER_DUTIES_FILE, SYNC_DUTIES_FILE, VALIDATOR_SNAPSHOT_FILE,
};
use duty_watch::server::{start_server, Context};
use duty_watch::types::{DutyRecord, DutyType, Epoch};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::oneshot;

struct Tester {
    data_dir: TempDir,
    addr: SocketAddr,
    client: reqwest::Client,
    _shutdown_tx: oneshot::Sender<()>,
}

impl Tester {
    fn new() -> Self {
        let data_dir = TempDir::new().unwrap();

        let mut config = Config::default();
        config.data_dir = data_dir.path().to_path_buf();
        config.server_listen_port = 0;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let ctx = Context { config };
        let (addr, server) = start_server(Arc::new(ctx), async {
            let _ = shutdown_rx.await;
        })
        .unwrap();
        tokio::spawn(server);

        Self {
            data_dir,
            addr,
            client: reqwest::Client::new(),
            _shutdown_tx: shutdown_tx,
        }
    }

    fn ledger(&self) -> DutyLedger {
        DutyLedger::new(self.data_dir.path().to_path_buf())
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.client.get(self.url(path)).send().await.unwrap()
    }

    async fn get_json(&self, path: &str) -> Value {
        let response = self.get(path).await;
        assert_eq!(response.status(), 200);
        response.json().await.unwrap()
    }
}

fn proposer_record(epoch: u64, validator_index: u64) -> DutyRecord {
    DutyRecord {
        duty_type: DutyType::Proposer,
        epoch: Epoch::new(epoch),
        validator_index,
        data: json!({
            "validator_index": validator_index.to_string(),
            "slot": (epoch * 32 + 7).to_string()
        }),
    }
}

#[tokio::test]
async fn absent_documents_serve_empty_arrays() {
    let tester = Tester::new();

    for path in ["/v1/validators", "/v1/duties/proposer", "/v1/duties/sync"] {
        assert_eq!(tester.get_json(path).await, json!([]));
    }
}

#[tokio::test]
async fn served_ledger_matches_persisted_records() {
    let tester = Tester::new();
    let ledger = tester.ledger();

    ledger
        .append(
            PROPOSER_DUTIES_FILE,
            vec![proposer_record(1, 7), proposer_record(2, 9)],
        )
        .unwrap();

    let served = tester.get_json("/v1/duties/proposer").await;
    let served = served.as_array().unwrap();
    assert_eq!(served.len(), 2);
    assert_eq!(served[0]["validator_index"], json!("7"));
    assert_eq!(served[1]["validator_index"], json!("9"));

    // The other ledger is untouched.
    assert_eq!(tester.get_json("/v1/duties/sync").await, json!([]));
}

#[tokio::test]
async fn serves_latest_document_after_rewrite() {
    let tester = Tester::new();
    let ledger = tester.ledger();

    ledger
        .append(SYNC_DUTIES_FILE, vec![proposer_record(1, 7)])
        .unwrap();
    assert_eq!(tester.get_json("/v1/duties/sync").await.as_array().unwrap().len(), 1);

    ledger
        .append(SYNC_DUTIES_FILE, vec![proposer_record(2, 8)])
        .unwrap();
    assert_eq!(tester.get_json("/v1/duties/sync").await.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn serves_validator_snapshot_document() {
    let tester = Tester::new();

    let snapshot = json!([{"index": "42", "status": "active_ongoing"}]);
    duty_watch::ledger::write_json_atomic(
        &tester.data_dir.path().join(VALIDATOR_SNAPSHOT_FILE),
        &snapshot,
    )
    .unwrap();

    assert_eq!(tester.get_json("/v1/validators").await, snapshot);
}

#[tokio::test]
async fn adds_server_header() {
    let tester = Tester::new();

    let response = tester.get("/v1/validators").await;
    assert_eq!(response.headers()["Server"], "duty_watch");
}

#[tokio::test]
async fn unknown_routes_are_not_found() {
    let tester = Tester::new();

    assert_eq!(tester.get("/v1/unknown").await.status(), 404);
    assert_eq!(tester.get("/v1/duties/proposer/extra").await.status(), 404);
}
