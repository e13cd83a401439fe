//! Mech registry access and priority mech selection.

use crate::contracts::{ContentStore, MechRegistryClient};
use crate::retry::RetryPolicy;
use crate::types::MechInfo;
use crate::{MechInteractError, MechInteractResult};
use futures::future::try_join_all;
use mech_config::MechInteractConfig;
use mech_primitives::Address;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Mechs requested per registry page.
pub const QUERY_BATCH_SIZE: usize = 1000;

/// Key of the tool list inside a mech's metadata document.
pub const TOOLS_FIELD: &str = "tools";

#[derive(Debug, Deserialize)]
struct ToolsDocument {
    #[serde(default)]
    tools: Vec<String>,
}

/// Where a registry snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSource {
    /// Freshly fetched.
    Registry,
    /// Last agreed list, reused because the registry failed.
    Cache,
}

/// Mech list proposed by one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrySnapshot {
    /// Mechs with their relevant tools.
    pub mechs_info: Vec<MechInfo>,
    /// Origin of the list.
    pub source: SnapshotSource,
}

/// Fetches mechs and their tools.
pub struct MechRegistry {
    client: Arc<dyn MechRegistryClient>,
    content: Arc<dyn ContentStore>,
    config: Arc<MechInteractConfig>,
    retry: RetryPolicy,
}

impl MechRegistry {
    /// Creates a registry reader.
    pub fn new(
        client: Arc<dyn MechRegistryClient>,
        content: Arc<dyn ContentStore>,
        config: Arc<MechInteractConfig>,
    ) -> Self {
        let retry = RetryPolicy::from_config(&config);
        Self {
            client,
            content,
            config,
            retry,
        }
    }

    /// Fetches every listed mech, page by page.
    pub async fn fetch_all(&self) -> MechInteractResult<Vec<MechInfo>> {
        let ignored = &self.config.ignored_mechs;
        let mut mechs: Vec<MechInfo> = Vec::new();
        let mut id_gt = 0;

        loop {
            let page = self
                .retry
                .retry("registry page", || {
                    self.client.fetch_mechs(id_gt, QUERY_BATCH_SIZE, ignored)
                })
                .await?;
            let full_page = page.len() >= QUERY_BATCH_SIZE;
            debug!(id_gt, fetched = page.len(), "Fetched registry page");

            let Some(last_id) = page.last().map(|last| last.id) else {
                break;
            };
            mechs.extend(page.into_iter().filter(|info| !ignored.contains(&info.address)));

            if !full_page {
                break;
            }
            if last_id <= id_gt {
                warn!(id_gt, last_id, "Registry page did not advance, stopping");
                break;
            }
            id_gt = last_id;
        }

        Ok(mechs)
    }

    /// Tools of one mech minus the irrelevant ones.
    pub async fn fetch_tools(&self, info: &MechInfo) -> MechInteractResult<BTreeSet<String>> {
        let Some(id) = info.tools_content_id() else {
            debug!(mech = %info.address, "Mech has no metadata, no tools");
            return Ok(BTreeSet::new());
        };

        let bytes = self
            .retry
            .retry("mech tools", || self.content.get(&id))
            .await?;
        let document: ToolsDocument = serde_json::from_slice(&bytes)?;

        Ok(document
            .tools
            .into_iter()
            .filter(|tool| !self.config.irrelevant_tools.contains(tool))
            .collect())
    }

    /// Fetches the mechs and fills in their relevant tools.
    pub async fn fetch_mechs_info(&self) -> MechInteractResult<Vec<MechInfo>> {
        let mechs = self.fetch_all().await?;
        if mechs.is_empty() {
            return Err(MechInteractError::registry_unavailable(
                "registry listed no mechs",
            ));
        }

        let tools = try_join_all(mechs.iter().map(|info| self.fetch_tools(info))).await?;
        Ok(mechs
            .into_iter()
            .zip(tools)
            .map(|(info, relevant_tools)| MechInfo {
                relevant_tools,
                ..info
            })
            .collect())
    }

    /// Fresh mech list, or the cached one when the registry cannot be read.
    pub async fn refresh(&self, cached: &[MechInfo]) -> MechInteractResult<RegistrySnapshot> {
        match self.fetch_mechs_info().await {
            Ok(mechs_info) => {
                info!(mechs = mechs_info.len(), "Refreshed mech registry");
                Ok(RegistrySnapshot {
                    mechs_info,
                    source: SnapshotSource::Registry,
                })
            }
            Err(err) if !cached.is_empty() => {
                warn!(error = %err, cached = cached.len(), "Registry unavailable, using cached mechs");
                Ok(RegistrySnapshot {
                    mechs_info: cached.to_vec(),
                    source: SnapshotSource::Cache,
                })
            }
            Err(err) => Err(MechInteractError::registry_unavailable(err.to_string())),
        }
    }
}

/// Relevant, unpenalized mechs in selection order.
pub fn rank_candidates<'a>(
    mechs_info: &'a [MechInfo],
    penalized: &BTreeSet<Address>,
) -> Vec<&'a MechInfo> {
    let mut candidates: Vec<&MechInfo> = mechs_info
        .iter()
        .filter(|info| !info.relevant_tools.is_empty())
        .filter(|info| !penalized.contains(&info.address))
        .collect();
    candidates.sort_by(|a, b| a.rank(b));
    candidates
}

/// Priority mech for the next request.
///
/// Dynamic selection picks the best ranked candidate and falls back to the
/// configured mech when every candidate is penalized or irrelevant.
pub fn select_priority_mech(
    config: &MechInteractConfig,
    mechs_info: &[MechInfo],
    penalized: &BTreeSet<Address>,
) -> Address {
    if !config.dynamic_selection_enabled() {
        return config.fallback_mech();
    }

    match rank_candidates(mechs_info, penalized).first() {
        Some(best) => best.address,
        None => {
            warn!("No selectable mech, falling back to the configured priority mech");
            config.fallback_mech()
        }
    }
}
