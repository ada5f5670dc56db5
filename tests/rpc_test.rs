use serde_json::json;
use utxo_indexer::utils::formatting::encode_hex_checksum;
use utxo_indexer::{HttpNodeRpc, Id, IndexerError, NodeRpc};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_get_reward_utxos_decodes_hex() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ext/bc/P"))
        .and(body_string_contains("platform.getRewardUTXOs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "result": {
                "numFetched": "2",
                "utxos": [encode_hex_checksum(b"first"), encode_hex_checksum(b"second")],
                "encoding": "hex"
            },
            "id": 1
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let rpc = HttpNodeRpc::new(&mock_server.uri()).unwrap();
    let utxos = rpc.get_reward_utxos(&Id::new([3; 32])).await.unwrap();

    assert_eq!(utxos, vec![b"first".to_vec(), b"second".to_vec()]);
}

#[tokio::test]
async fn test_request_carries_tx_id_and_encoding() {
    let mock_server = MockServer::start().await;
    let tx_id = Id::new([3; 32]);
    Mock::given(method("POST"))
        .and(body_string_contains(tx_id.to_string()))
        .and(body_string_contains("\"encoding\":\"hex\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "result": { "numFetched": "0", "utxos": [], "encoding": "hex" },
            "id": 1
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let rpc = HttpNodeRpc::new(&format!("{}/", mock_server.uri())).unwrap();
    assert!(rpc.get_reward_utxos(&tx_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rpc_error_is_reported() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "error": { "code": -32000, "message": "not found" },
            "id": 1
        })))
        .mount(&mock_server)
        .await;

    let rpc = HttpNodeRpc::new(&mock_server.uri()).unwrap();
    let err = rpc.get_reward_utxos(&Id::new([3; 32])).await.unwrap_err();

    match err {
        IndexerError::RpcError(msg) => assert!(msg.contains("not found")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_non_hex_encoding_is_rejected() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "result": { "numFetched": "1", "utxos": ["abc"], "encoding": "cb58" },
            "id": 1
        })))
        .mount(&mock_server)
        .await;

    let rpc = HttpNodeRpc::new(&mock_server.uri()).unwrap();
    let err = rpc.get_reward_utxos(&Id::new([3; 32])).await.unwrap_err();
    assert!(matches!(err, IndexerError::RpcError(_)));
}

#[tokio::test]
async fn test_bad_checksum_is_rejected() {
    let mock_server = MockServer::start().await;
    let mut corrupted = encode_hex_checksum(b"payload");
    corrupted.replace_range(2..4, "ff");
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "result": { "numFetched": "1", "utxos": [corrupted], "encoding": "hex" },
            "id": 1
        })))
        .mount(&mock_server)
        .await;

    let rpc = HttpNodeRpc::new(&mock_server.uri()).unwrap();
    assert!(rpc.get_reward_utxos(&Id::new([3; 32])).await.is_err());
}

#[tokio::test]
async fn test_http_failure_is_rpc_error() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let rpc = HttpNodeRpc::new(&mock_server.uri()).unwrap();
    let err = rpc.get_reward_utxos(&Id::new([3; 32])).await.unwrap_err();
    assert!(matches!(err, IndexerError::RpcError(_)));
}
