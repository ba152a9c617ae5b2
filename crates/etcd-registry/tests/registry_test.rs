// Integration tests for Registry against an HTTP store
// Covers join/lookup/leave over the keys API and failure when every member is down

use std::time::Duration;

use etcd_registry::{
    CacheSetting, Registry, RegistryConfig, RegistryError, ServiceDescriptor, ServiceRecord,
};
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LEASE_PATH: &str = r"^/v2/keys/services/test/[0-9a-f]{40}$";

fn dead_host() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}", port)
}

fn config_for(hosts: Vec<String>) -> RegistryConfig {
    RegistryConfig::with_hosts(hosts)
        .with_cache(CacheSetting::Disabled)
        .with_retry_delay(Duration::from_millis(10))
}

fn expected_record() -> ServiceRecord {
    serde_json::from_value(json!({
        "name": "test",
        "port": 1000,
        "hostname": "127.0.0.1",
        "host": "127.0.0.1:1000",
        "url": "http://127.0.0.1:1000"
    }))
    .unwrap()
}

#[tokio::test]
async fn test_join_lookup_leave() {
    let server = MockServer::start().await;
    let record = expected_record();
    let stored = serde_json::to_string(&record).unwrap();

    Mock::given(method("PUT"))
        .and(path_regex(LEASE_PATH))
        .and(body_string_contains("ttl=10"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "action": "set",
            "node": {"key": "/services/test/x", "value": stored, "modifiedIndex": 5, "createdIndex": 5, "ttl": 10}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v2/keys/updated"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "action": "set",
            "node": {"key": "/updated", "value": "now", "modifiedIndex": 6, "createdIndex": 6}
        })))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/keys/services/test"))
        .and(query_param("recursive", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "action": "get",
            "node": {
                "key": "/services/test",
                "dir": true,
                "nodes": [
                    {"key": "/services/test/x", "value": stored, "modifiedIndex": 5, "createdIndex": 5},
                    {"key": "/services/test/y", "value": "corrupt", "modifiedIndex": 4, "createdIndex": 4}
                ]
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path_regex(LEASE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "action": "delete",
            "node": {"key": "/services/test/x", "modifiedIndex": 7, "createdIndex": 5}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let registry = Registry::new(config_for(vec![server.uri()])).unwrap();

    let joined = registry
        .join("test", ServiceDescriptor::from(1000).with_hostname("127.0.0.1"))
        .await
        .unwrap();
    assert_eq!(joined, record);

    let found = registry.lookup(Some("test")).await.unwrap();
    assert_eq!(found, Some(record));
    assert_eq!(registry.list(Some("test")).await.unwrap().len(), 1);

    registry.leave(Some("test")).await.unwrap();
    assert!(registry.leases().is_empty());

    // PUT and DELETE target the same lease key
    let requests = server.received_requests().await.unwrap();
    let put = requests
        .iter()
        .find(|r| r.method.as_str() == "PUT" && r.url.path() != "/v2/keys/updated")
        .unwrap();
    let delete = requests
        .iter()
        .find(|r| r.method.as_str() == "DELETE")
        .unwrap();
    assert_eq!(put.url.path(), delete.url.path());
}

#[tokio::test]
async fn test_lookup_missing_service() {
    let server = MockServer::start().await;
    let registry = Registry::new(config_for(vec![server.uri()])).unwrap();

    assert!(registry.lookup(Some("nothing")).await.unwrap().is_none());
    assert!(registry.list(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_join_fails_when_every_host_is_down() {
    let registry = Registry::new(config_for(vec![dead_host(), dead_host()])).unwrap();

    let err = registry.join("test", 1000).await.unwrap_err();
    assert!(matches!(err, RegistryError::Transport { attempts: 2, .. }));
    assert!(registry.leases().is_empty());
}

#[tokio::test]
async fn test_join_surfaces_store_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "errorCode": 110,
            "message": "The request requires user authentication",
            "cause": "Insufficient credentials",
            "index": 0
        })))
        .mount(&server)
        .await;

    let registry = Registry::new(config_for(vec![server.uri()])).unwrap();
    let err = registry.join("test", 1000).await.unwrap_err();
    assert_eq!(err.status(), Some(403));
    assert!(registry.leases().is_empty());
}
