//! Cassandra Service
//!
//! Rewrites `cassandra.yaml` for the elected seed layout and reads node
//! status through `nodetool status`.

use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

use super::config_file::{single_quoted, CassandraYaml};
use super::{ClusterService, NodeStatus, SeedList};
use crate::config::SeedPilotConfig;
use crate::error::{Error, Result};

/// Cassandra node managed through its config file and `nodetool`
pub struct CassandraService {
    config_path: PathBuf,
    cluster_name: String,
    endpoint_snitch: String,
    nodetool: String,
    seeds: SeedList,
}

impl CassandraService {
    pub fn new(config: &SeedPilotConfig) -> Self {
        Self {
            config_path: config.service.config_path.clone(),
            cluster_name: config.cluster.name.clone(),
            endpoint_snitch: config.service.endpoint_snitch.clone(),
            nodetool: config.service.nodetool.clone(),
            seeds: SeedList::default(),
        }
    }

    /// Apply the managed fields to a config document
    pub fn render(&self, original: &str, listen_address: &str) -> Result<String> {
        let mut doc = CassandraYaml::parse(original);

        doc.set_seeds(&self.seeds.addresses(listen_address))?;
        if self.seeds.is_joining() {
            doc.set("auto_bootstrap", "false");
        }
        doc.set("cluster_name", &single_quoted(&self.cluster_name));
        doc.set("endpoint_snitch", &self.endpoint_snitch);
        doc.set("start_rpc", "true");
        doc.set("listen_address", listen_address);

        Ok(doc.to_string())
    }
}

#[async_trait::async_trait]
impl ClusterService for CassandraService {
    fn set_seeds(&mut self, seeds: SeedList) {
        self.seeds = seeds;
    }

    async fn update_config(&mut self, listen_address: &str) -> Result<()> {
        let original = tokio::fs::read_to_string(&self.config_path).await.map_err(|e| {
            Error::ServiceConfig(format!("cannot read {:?}: {}", self.config_path, e))
        })?;

        let updated = self.render(&original, listen_address)?;

        // Write beside the target and rename so readers never see half a file
        let tmp_path = self.config_path.with_extension("yaml.tmp");
        tokio::fs::write(&tmp_path, updated.as_bytes()).await?;
        tokio::fs::rename(&tmp_path, &self.config_path).await?;

        tracing::info!(
            "Updated {:?}: listen_address={}, seeds={:?}",
            self.config_path,
            listen_address,
            self.seeds.addresses(listen_address)
        );
        Ok(())
    }

    async fn node_status(&self, address: &str) -> Result<Option<NodeStatus>> {
        let output = Command::new(&self.nodetool)
            .arg("status")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::Service(format!("cannot run {}: {}", self.nodetool, e)))?;

        if !output.status.success() {
            return Err(Error::Service(format!(
                "{} status exited with {}: {}",
                self.nodetool,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_status_output(&stdout, address))
    }
}

/// Find the status code of `address` in `nodetool status` output
pub fn parse_status_output(output: &str, address: &str) -> Option<NodeStatus> {
    output.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        let code = fields.next()?;
        let node = fields.next()?;
        if node == address {
            NodeStatus::parse(code)
        } else {
            None
        }
    })
}
