//! Inventory collaborator
//!
//! The management CLI prints the node inventory as JSON; the mapping of
//! instance OCID to hostname is cached for the life of the process since
//! inventory changes on human timescales, not pass timescales.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use hpcmaint_core::{Inventory, MaintError, Result};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::info;

use crate::cmd;

#[derive(Debug, Deserialize)]
struct NodeEntry {
    ocid: Option<String>,
    hostname: Option<String>,
}

/// Parse the management CLI node listing into an `ocid -> hostname` map.
/// Entries missing either field are dropped.
fn parse_host_map(raw: &str) -> Result<HashMap<String, String>> {
    let nodes: Vec<NodeEntry> = serde_json::from_str(raw)
        .map_err(|e| MaintError::transient(format!("inventory JSON: {e}")))?;
    Ok(nodes
        .into_iter()
        .filter_map(|n| Some((n.ocid?, n.hostname?)))
        .collect())
}

/// Management-CLI-backed inventory.
pub struct MgmtCli {
    command: Vec<String>,
    call_timeout: Duration,
    cache: Mutex<Option<HashMap<String, String>>>,
}

impl MgmtCli {
    pub fn new(command: Vec<String>, call_timeout: Duration) -> Self {
        Self {
            command,
            call_timeout,
            cache: Mutex::new(None),
        }
    }

    async fn host_map(&self) -> Result<HashMap<String, String>> {
        let mut cache = self.cache.lock().await;
        if let Some(map) = cache.as_ref() {
            return Ok(map.clone());
        }
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| MaintError::config("inventory command is empty"))?;
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let raw = cmd::run(program, &arg_refs, self.call_timeout).await?;
        let map = parse_host_map(&raw)?;
        info!(entries = map.len(), "loaded inventory host map");
        *cache = Some(map.clone());
        Ok(map)
    }
}

#[async_trait]
impl Inventory for MgmtCli {
    async fn resolve_host(&self, instance_id: &str) -> Result<Option<String>> {
        Ok(self.host_map().await?.get(instance_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_map() {
        let raw = r#"[
            {"ocid": "ocid1.instance.oc1..aaa", "hostname": "GPU-1"},
            {"ocid": "ocid1.instance.oc1..bbb", "hostname": "GPU-2"}
        ]"#;
        let map = parse_host_map(raw).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["ocid1.instance.oc1..aaa"], "GPU-1");
    }

    #[test]
    fn test_parse_host_map_drops_incomplete_entries() {
        let raw = r#"[
            {"ocid": "ocid1.instance.oc1..aaa"},
            {"hostname": "GPU-2"},
            {"ocid": "ocid1.instance.oc1..ccc", "hostname": "GPU-3"}
        ]"#;
        let map = parse_host_map(raw).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map["ocid1.instance.oc1..ccc"], "GPU-3");
    }

    #[test]
    fn test_parse_host_map_bad_json_is_transient() {
        let err = parse_host_map("not json").unwrap_err();
        assert_eq!(err.kind(), "TransientExternalError");
    }
}
