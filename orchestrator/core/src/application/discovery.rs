// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Tool Discovery
//!
//! Inventories local images and fills the [`ToolSpecCache`]. Each tagged,
//! uncached image is probed in its own task on its own runtime connection;
//! results come back over a channel and are joined against the caller's
//! cancellation token.
//!
//! Failure policy: an image without a spec is skipped. Failing to reach the
//! container engine fails the whole pass. On cancellation the call returns
//! immediately; outstanding probes keep running and still populate the cache.

use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::application::spec_probe::{read_citation, read_tool_spec, SpecProbeError};
use crate::application::tool_cache::{ImageSpec, ToolSpecCache};
use crate::domain::runtime::{RuntimeConnector, RuntimeError};
use crate::domain::tool_spec::{split_slug, ToolSpec};

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("image {image} has no usable tool spec: {reason}")]
    NoSpec { image: String, reason: String },
    #[error("the tool {0} was not found in the cache. Try to call like <image-name>::<tool-name>")]
    NotCached(String),
    #[error("the tool {tool} was not found in the image {image}")]
    ToolNotFound { tool: String, image: String },
    #[error("discovery was cancelled")]
    Cancelled,
}

impl From<SpecProbeError> for DiscoveryError {
    fn from(err: SpecProbeError) -> Self {
        match err {
            SpecProbeError::Missing { image, reason } => DiscoveryError::NoSpec { image, reason },
            SpecProbeError::Runtime(e) => DiscoveryError::Runtime(e),
        }
    }
}

impl DiscoveryError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DiscoveryError::NoSpec { .. } | DiscoveryError::NotCached(_) | DiscoveryError::ToolNotFound { .. }
        )
    }
}

#[derive(Clone)]
pub struct ToolDiscovery {
    connector: Arc<dyn RuntimeConnector>,
    cache: Arc<ToolSpecCache>,
}

impl ToolDiscovery {
    pub fn new(connector: Arc<dyn RuntimeConnector>, cache: Arc<ToolSpecCache>) -> Self {
        Self { connector, cache }
    }

    pub fn cache(&self) -> &Arc<ToolSpecCache> {
        &self.cache
    }

    /// Probes every tagged image and returns the slugs of all tools found,
    /// sorted. Marks the cache initialised once every probe has reported.
    pub async fn discover_all(&self, verbose: bool, cancel: &CancellationToken) -> Result<Vec<String>, DiscoveryError> {
        let runtime = self.connector.connect().await?;
        let images = runtime.list_images().await?;
        drop(runtime);

        let references: BTreeSet<String> = images
            .iter()
            .filter_map(|image| image.reference().map(str::to_string))
            .collect();
        info!("Discovering tools in {} tagged images", references.len());

        let (tx, mut rx) = mpsc::channel(references.len().max(1));
        for reference in &references {
            let tx = tx.clone();
            let connector = Arc::clone(&self.connector);
            let cache = Arc::clone(&self.cache);
            let reference = reference.clone();
            tokio::spawn(async move {
                let result = probe_image(connector.as_ref(), &cache, &reference, verbose).await;
                // the receiver is gone if discovery was cancelled
                let _ = tx.send(result).await;
            });
        }
        drop(tx);

        let mut slugs = Vec::new();
        for _ in 0..references.len() {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Discovery cancelled with probes outstanding");
                    return Err(DiscoveryError::Cancelled);
                }
                result = rx.recv() => match result {
                    Some(Ok(found)) => slugs.extend(found),
                    Some(Err(e)) => return Err(e),
                    None => break,
                },
            }
        }

        self.cache.mark_initialised();
        slugs.sort();
        info!("Discovered {} tools", slugs.len());
        Ok(slugs)
    }

    /// Resolves a slug, probing its image on a cache miss. Bare tool names
    /// are only looked up in the cache.
    pub async fn load_tool_spec(&self, slug: &str) -> Result<ToolSpec, DiscoveryError> {
        let Some((image, tool)) = split_slug(slug) else {
            return self
                .cache
                .get_tool_spec(slug)
                .or_else(|| self.cache.find_by_name(slug))
                .ok_or_else(|| DiscoveryError::NotCached(slug.to_string()));
        };

        if let Some(spec) = self.cache.get_tool_spec(slug) {
            return Ok(spec);
        }
        if self.cache.has_image(image) {
            return Err(DiscoveryError::ToolNotFound {
                tool: tool.to_string(),
                image: image.to_string(),
            });
        }

        let runtime = self.connector.connect().await?;
        let spec = read_tool_spec(runtime.as_ref(), image).await?;
        let citation = read_citation(runtime.as_ref(), image).await;
        self.cache.insert_image(ImageSpec {
            reference: image.to_string(),
            spec,
            citation,
        });

        self.cache.get_tool_spec(slug).ok_or_else(|| DiscoveryError::ToolNotFound {
            tool: tool.to_string(),
            image: image.to_string(),
        })
    }
}

async fn probe_image(
    connector: &dyn RuntimeConnector,
    cache: &ToolSpecCache,
    reference: &str,
    verbose: bool,
) -> Result<Vec<String>, DiscoveryError> {
    if let Some(image) = cache.get_image_spec(reference) {
        debug!("Image {} already cached", reference);
        return Ok(image
            .spec
            .qualified_tools(reference, image.citation.as_ref())
            .into_iter()
            .map(|tool| tool.id)
            .collect());
    }

    let runtime = connector.connect().await?;
    let spec = match read_tool_spec(runtime.as_ref(), reference).await {
        Ok(spec) => spec,
        Err(e) if e.is_unreachable() => return Err(e.into()),
        Err(e) => {
            if verbose {
                info!("image {} does not contain a tool-spec ({})", reference, e);
            } else {
                debug!("Skipping {}: {}", reference, e);
            }
            return Ok(Vec::new());
        }
    };

    let citation = read_citation(runtime.as_ref(), reference).await;
    if citation.is_none() && verbose {
        info!("image {} does not contain a CITATION.cff", reference);
    }

    Ok(cache.insert_image(ImageSpec {
        reference: reference.to_string(),
        spec,
        citation,
    }))
}
