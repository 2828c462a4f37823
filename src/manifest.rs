//! Mirror manifest fetching and parsing.

use crate::download::Transport;
use crate::error::SyncError;
use crate::types::Mirror;
use serde::Deserialize;
use tokio_retry2::{Retry, RetryError};
use tracing::{debug, info, warn};

/// Root of the manifest document. The element name itself is not checked.
/// `<Server>` elements may be interleaved with other siblings.
#[derive(Debug, Deserialize)]
struct ManifestDocument {
    #[serde(rename = "Server", default)]
    servers: Vec<ServerEntry>,
}

/// One `<Server>` element. Both children are optional so that incomplete
/// entries can be skipped instead of failing the whole document.
#[derive(Debug, Deserialize)]
struct ServerEntry {
    #[serde(rename = "URL")]
    url: Option<String>,
    #[serde(rename = "Prio")]
    prio: Option<String>,
}

/// Parses manifest bytes into mirrors sorted by ascending priority.
///
/// Entries without a URL or with a priority that is not an integer are
/// skipped. Entries of equal priority keep their document order.
///
/// # Arguments
///
/// * `data` - Raw manifest document
///
/// # Returns
///
/// The ordered mirror list, or an error if the document is not valid XML.
pub fn parse_manifest(data: &[u8]) -> Result<Vec<Mirror>, SyncError> {
    let text = String::from_utf8_lossy(data);
    let document: ManifestDocument = quick_xml::de::from_str(&text)?;

    let mut mirrors: Vec<Mirror> = document
        .servers
        .into_iter()
        .filter_map(|server| {
            let url = server.url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty());
            let priority = server.prio.and_then(|p| p.trim().parse::<i64>().ok());
            match (url, priority) {
                (Some(url), Some(priority)) => {
                    info!("Found mirror {} (Priority {})", url, priority);
                    Some(Mirror { url, priority })
                }
                _ => {
                    debug!("Skipping incomplete mirror entry");
                    None
                }
            }
        })
        .collect();

    // `sort_by_key` is stable, ties stay in document order
    mirrors.sort_by_key(|m| m.priority);
    Ok(mirrors)
}

/// Downloads the manifest and returns the ordered mirror list.
///
/// The fetch is retried `retries` times with a fixed delay. A fetch that
/// still fails is reported as [`SyncError::Network`] for the manifest URL.
///
/// # Arguments
///
/// * `transport` - Transport used for the request
/// * `manifest_url` - URL of the manifest document
/// * `retries` - Additional attempts after the first failure
/// * `retry_delay_ms` - Delay between attempts
pub async fn resolve_mirrors<T: Transport + ?Sized>(
    transport: &T,
    manifest_url: &str,
    retries: usize,
    retry_delay_ms: u64,
) -> Result<Vec<Mirror>, SyncError> {
    info!("Opening {}", manifest_url);

    let retry_strategy =
        tokio_retry2::strategy::FixedInterval::from_millis(retry_delay_ms).take(retries);

    let data = Retry::spawn(retry_strategy, || async move {
        match transport.fetch(manifest_url).await {
            Ok(data) => Ok(data),
            Err(e) => {
                warn!("Failed to fetch manifest {} due to error: {}", manifest_url, e);
                RetryError::to_transient(e)
            }
        }
    })
    .await
    .map_err(|e| SyncError::network(manifest_url, e))?;

    parse_manifest(&data)
}
