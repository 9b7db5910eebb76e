// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Tool Specification Cache
//!
//! Process-wide store of probed images and the tools they declare, keyed by
//! image reference and by slug (`<image>::<tool>`). Discovery workers write
//! concurrently while the run service reads; both go through the sharded
//! maps below and never see a lock.
//!
//! The cache only grows. `reset` clears it and flips `initialised` back to
//! false so the next discovery pass starts from scratch.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::domain::tool_spec::{Citation, SpecFile, ToolSpec};

/// Everything probed from one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSpec {
    pub reference: String,
    pub spec: SpecFile,
    pub citation: Option<Citation>,
}

#[derive(Debug, Default)]
pub struct ToolSpecCache {
    images: DashMap<String, ImageSpec>,
    tools: DashMap<String, ToolSpec>,
    initialised: AtomicBool,
}

impl ToolSpecCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_tool_spec(&self, slug: &str) -> Option<ToolSpec> {
        self.tools.get(slug).map(|entry| entry.value().clone())
    }

    pub fn set_tool_spec(&self, slug: impl Into<String>, spec: ToolSpec) {
        self.tools.insert(slug.into(), spec);
    }

    pub fn get_image_spec(&self, reference: &str) -> Option<ImageSpec> {
        self.images.get(reference).map(|entry| entry.value().clone())
    }

    pub fn set_image_spec(&self, reference: impl Into<String>, spec: ImageSpec) {
        self.images.insert(reference.into(), spec);
    }

    pub fn has_image(&self, reference: &str) -> bool {
        self.images.contains_key(reference)
    }

    /// Inserts an image and every tool it declares.
    pub fn insert_image(&self, image: ImageSpec) -> Vec<String> {
        let tools = image.spec.qualified_tools(&image.reference, image.citation.as_ref());
        let slugs: Vec<String> = tools.iter().map(|t| t.id.clone()).collect();
        for tool in tools {
            self.set_tool_spec(tool.id.clone(), tool);
        }
        self.set_image_spec(image.reference.clone(), image);
        slugs
    }

    /// Tools whose name or title contains `filter`, case-insensitively,
    /// sorted by slug. An empty filter returns everything.
    pub fn list_tool_specs(&self, filter: &str) -> Vec<ToolSpec> {
        let needle = filter.trim().to_lowercase();
        let mut specs: Vec<ToolSpec> = self
            .tools
            .iter()
            .filter(|entry| needle.is_empty() || entry.value().matches_filter(&needle))
            .map(|entry| entry.value().clone())
            .collect();
        specs.sort_by(|a, b| a.id.cmp(&b.id));
        specs
    }

    /// Bare-name lookup; `None` when no tool or more than one image declares it.
    pub fn find_by_name(&self, name: &str) -> Option<ToolSpec> {
        let mut matches = self.tools.iter().filter(|entry| entry.value().name == name);
        let first = matches.next().map(|entry| entry.value().clone())?;
        if matches.next().is_some() {
            return None;
        }
        Some(first)
    }

    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn is_initialised(&self) -> bool {
        self.initialised.load(Ordering::Acquire)
    }

    pub fn mark_initialised(&self) {
        self.initialised.store(true, Ordering::Release);
    }

    pub fn reset(&self) {
        self.tools.clear();
        self.images.clear();
        self.initialised.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn image(reference: &str, tools: &[(&str, &str)]) -> ImageSpec {
        let yaml = tools
            .iter()
            .map(|(name, title)| format!("  {}:\n    title: {}\n", name, title))
            .collect::<String>();
        ImageSpec {
            reference: reference.to_string(),
            spec: SpecFile::parse(&format!("tools:\n{}", yaml)).unwrap(),
            citation: None,
        }
    }

    #[test]
    fn test_insert_image_registers_every_tool() {
        let cache = ToolSpecCache::new();
        let slugs = cache.insert_image(image("ubuntu", &[("echo-tool", "Echo"), ("sum", "Sum values")]));
        assert_eq!(slugs, vec!["ubuntu::echo-tool", "ubuntu::sum"]);
        assert!(cache.has_image("ubuntu"));
        assert_eq!(cache.get_tool_spec("ubuntu::sum").unwrap().title, "Sum values");
        assert!(cache.get_tool_spec("ubuntu::missing").is_none());
    }

    #[test]
    fn test_list_filters_on_name_and_title_case_insensitively() {
        let cache = ToolSpecCache::new();
        cache.insert_image(image("a", &[("echo-tool", "Echo"), ("xyz-reader", "Reader")]));
        cache.insert_image(image("b", &[("plot", "Plot XYZ grids")]));

        let names: Vec<String> = cache.list_tool_specs("xYz").into_iter().map(|t| t.id).collect();
        assert_eq!(names, vec!["a::xyz-reader", "b::plot"]);
        assert_eq!(cache.list_tool_specs("").len(), 3);
    }

    #[test]
    fn test_find_by_name_requires_a_unique_match() {
        let cache = ToolSpecCache::new();
        cache.insert_image(image("a", &[("echo-tool", "Echo")]));
        assert_eq!(cache.find_by_name("echo-tool").unwrap().id, "a::echo-tool");
        cache.insert_image(image("b", &[("echo-tool", "Echo")]));
        assert!(cache.find_by_name("echo-tool").is_none());
    }

    #[test]
    fn test_reset_clears_and_uninitialises() {
        let cache = ToolSpecCache::new();
        cache.insert_image(image("a", &[("echo-tool", "Echo")]));
        cache.mark_initialised();
        cache.reset();
        assert!(!cache.is_initialised());
        assert_eq!(cache.tool_count(), 0);
        assert_eq!(cache.image_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_keep_one_entry_per_tool() {
        let cache = Arc::new(ToolSpecCache::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                // every image is inserted twice by different tasks
                cache.insert_image(image(&format!("img{}", i % 8), &[("t1", "One"), ("t2", "Two")]));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(cache.image_count(), 8);
        assert_eq!(cache.tool_count(), 16);
    }
}
