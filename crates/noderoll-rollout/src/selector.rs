//! Node selector — resolves a campaign's ordered node list.

use tracing::debug;

use noderoll_cluster::ControlPlane;
use noderoll_core::{Campaign, ConfigError, LabelSelector, NodeTarget};

use crate::error::RolloutResult;

/// Nodes matching the campaign's label expression and taint, ordered by
/// hostname so every run of the same campaign enumerates them identically.
///
/// `selector` is the campaign's label expression as returned by
/// [`Campaign::validate`]. An empty selector with no taint key is
/// [`ConfigError::NoSelectionCriteria`]. An empty result is not an error.
pub async fn resolve(
    cluster: &dyn ControlPlane,
    campaign: &Campaign,
    selector: &LabelSelector,
) -> RolloutResult<Vec<NodeTarget>> {
    let taint_key = campaign.taint_key();
    if selector.is_empty() && taint_key.is_none() {
        return Err(ConfigError::NoSelectionCriteria.into());
    }

    let mut hostnames = cluster
        .get_nodes(selector, taint_key, campaign.taint_value())
        .await?;
    hostnames.sort();
    hostnames.dedup();

    debug!(
        selector = %selector,
        taint = ?taint_key,
        nodes = hostnames.len(),
        "resolved node list"
    );

    Ok(hostnames
        .into_iter()
        .enumerate()
        .map(|(index, hostname)| NodeTarget::new(hostname, index))
        .collect())
}
