// etcd v2 keys API wire models

use serde::{Deserialize, Serialize};

/// A node in the etcd v2 key tree
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Node {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub dir: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<Node>,
    pub created_index: u64,
    pub modified_index: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration: Option<String>,
}

impl Node {
    pub fn leaf(key: &str, value: &str, index: u64) -> Self {
        Self {
            key: key.to_string(),
            value: Some(value.to_string()),
            created_index: index,
            modified_index: index,
            ..Default::default()
        }
    }

    pub fn directory(key: &str, nodes: Vec<Node>) -> Self {
        Self {
            key: key.to_string(),
            dir: true,
            nodes,
            ..Default::default()
        }
    }

    /// Non-empty value carried by this node, if any
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref().filter(|v| !v.is_empty())
    }
}

/// Response body of every successful keys API call
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KeysResponse {
    pub action: String,
    pub node: Node,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_node: Option<Node>,
}

/// Error body returned by etcd for non-2xx responses
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EtcdErrorBody {
    pub error_code: i64,
    pub message: String,
    pub cause: String,
    pub index: u64,
}

impl EtcdErrorBody {
    /// Human readable summary, e.g. `Key not found (/services/x)`
    pub fn describe(&self) -> String {
        if self.cause.is_empty() {
            self.message.clone()
        } else {
            format!("{} ({})", self.message, self.cause)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_recursive_get() {
        let body = r#"{
            "action": "get",
            "node": {
                "key": "/services/test",
                "dir": true,
                "nodes": [
                    {"key": "/services/test/abc", "value": "{\"name\":\"test\"}", "modifiedIndex": 7, "createdIndex": 7, "ttl": 9, "expiration": "2024-01-01T00:00:10Z"},
                    {"key": "/services/test/sub", "dir": true, "nodes": [], "modifiedIndex": 3, "createdIndex": 3}
                ],
                "modifiedIndex": 3,
                "createdIndex": 3
            }
        }"#;

        let resp: KeysResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.action, "get");
        assert!(resp.node.dir);
        assert_eq!(resp.node.nodes.len(), 2);
        assert_eq!(resp.node.nodes[0].value(), Some("{\"name\":\"test\"}"));
        assert_eq!(resp.node.nodes[0].ttl, Some(9));
        assert_eq!(resp.node.nodes[1].value(), None);
    }

    #[test]
    fn test_empty_value_is_none() {
        let node = Node::leaf("/k", "", 1);
        assert_eq!(node.value(), None);
    }

    #[test]
    fn test_error_body_describe() {
        let body = r#"{"errorCode":100,"message":"Key not found","cause":"/services/x","index":42}"#;
        let err: EtcdErrorBody = serde_json::from_str(body).unwrap();
        assert_eq!(err.error_code, 100);
        assert_eq!(err.index, 42);
        assert_eq!(err.describe(), "Key not found (/services/x)");
    }
}
