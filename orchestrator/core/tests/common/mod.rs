// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Scripted container engine shared by the integration tests. Images are
//! registered up front; each created container answers according to the
//! entrypoint/cmd it was created with.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use toolrun_core::application::run_service::ToolRunService;
use toolrun_core::application::tool_cache::ToolSpecCache;
use toolrun_core::application::workspace::RunWorkspace;
use toolrun_core::domain::run::{AdminSet, OUT_MOUNT};
use toolrun_core::domain::runtime::{
    ContainerId, ContainerRuntime, ContainerSpec, ImageSummary, LogChunk, LogStream, RuntimeConnector,
    RuntimeError,
};
use toolrun_core::domain::tool_spec::{CITATION_FILE_PATH, SPEC_FILE_PATH};
use toolrun_core::infrastructure::event_bus::EventBus;
use toolrun_core::infrastructure::repositories::InMemoryRunRepository;

pub const ECHO_IMAGE: &str = "toolbox/echo:latest";

pub const ECHO_SPEC: &str = r#"
tools:
  echo:
    title: Echo
    description: Prints a message
    parameters:
      message:
        type: string
        default: "Hello, World!"
      repeat:
        type: integer
        min: 1
        max: 5
        optional: true
"#;

pub const CITATION: &str = r#"
cff-version: 1.2.0
title: Echo toolbox
authors:
  - given-names: Ada
    family-names: Lovelace
"#;

/// What the tool container does when it runs.
#[derive(Debug, Clone, Default)]
pub struct ToolBehaviour {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    /// Files written into the `/out` mount, relative path -> content
    pub outputs: Vec<(String, Vec<u8>)>,
    pub delay: Option<Duration>,
    pub fail_create: bool,
    pub fail_start: bool,
    pub fail_wait: bool,
    /// Stdout frame is delivered, then the stream breaks
    pub fail_logs: bool,
}

impl ToolBehaviour {
    pub fn printing(stdout: &str) -> Self {
        Self {
            stdout: stdout.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeImage {
    pub reference: String,
    pub spec_file: Option<String>,
    pub citation: Option<String>,
    pub shim_path: Option<String>,
    pub shim_metadata: Option<String>,
    pub behaviour: ToolBehaviour,
}

impl FakeImage {
    pub fn new(reference: &str) -> Self {
        Self {
            reference: reference.to_string(),
            ..Default::default()
        }
    }

    pub fn with_spec(mut self, spec: &str) -> Self {
        self.spec_file = Some(spec.to_string());
        self
    }

    pub fn with_citation(mut self, citation: &str) -> Self {
        self.citation = Some(citation.to_string());
        self
    }

    pub fn with_shim(mut self, path: &str) -> Self {
        self.shim_path = Some(path.to_string());
        self
    }

    pub fn with_shim_metadata(mut self, metadata: &str) -> Self {
        self.shim_metadata = Some(metadata.to_string());
        self
    }

    pub fn with_behaviour(mut self, behaviour: ToolBehaviour) -> Self {
        self.behaviour = behaviour;
        self
    }
}

#[derive(Debug, Clone)]
enum Script {
    Output { exit_code: i64, stdout: String, stderr: String },
    Tool(ToolBehaviour),
}

#[derive(Debug)]
struct Container {
    spec: ContainerSpec,
    script: Script,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

#[derive(Default)]
pub struct FakeRuntime {
    images: Mutex<HashMap<String, FakeImage>>,
    containers: Mutex<HashMap<String, Container>>,
    created: Mutex<Vec<ContainerSpec>>,
    removed: Mutex<Vec<String>>,
    next_id: AtomicUsize,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_image(&self, image: FakeImage) {
        self.images
            .lock()
            .unwrap()
            .insert(image.reference.clone(), image);
    }

    pub fn created(&self) -> Vec<ContainerSpec> {
        self.created.lock().unwrap().clone()
    }

    pub fn created_for(&self, image: &str) -> Vec<ContainerSpec> {
        self.created()
            .into_iter()
            .filter(|spec| spec.image == image)
            .collect()
    }

    pub fn shim_detections(&self, image: &str) -> usize {
        self.created_for(image)
            .iter()
            .filter(|spec| is_detection(spec))
            .count()
    }

    pub fn spec_reads(&self, image: &str) -> usize {
        self.created_for(image)
            .iter()
            .filter(|spec| is_cat(spec, SPEC_FILE_PATH))
            .count()
    }

    pub fn removed_count(&self) -> usize {
        self.removed.lock().unwrap().len()
    }

    /// Containers created but never removed.
    pub fn live_containers(&self) -> usize {
        self.containers.lock().unwrap().len()
    }

    fn script_for(&self, image: &FakeImage, spec: &ContainerSpec) -> Script {
        let output = |exit_code: i64, stdout: &str, stderr: &str| Script::Output {
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        };

        if is_detection(spec) {
            return match &image.shim_path {
                Some(path) => output(0, &format!("{}\n", path), ""),
                None => output(1, "", ""),
            };
        }
        for (path, content) in [(SPEC_FILE_PATH, &image.spec_file), (CITATION_FILE_PATH, &image.citation)] {
            if is_cat(spec, path) {
                return match content {
                    Some(body) => output(0, body, ""),
                    None => output(1, "", &format!("cat: {}: No such file or directory", path)),
                };
            }
        }
        if let (Some(shim), Some(entrypoint)) = (&image.shim_path, &spec.entrypoint) {
            if entrypoint.first() == Some(shim) {
                let subcommand = spec.cmd.as_ref().and_then(|cmd| cmd.first()).map(String::as_str);
                match subcommand {
                    Some("metadata") => {
                        return match &image.shim_metadata {
                            Some(body) => output(0, body, ""),
                            None => output(2, "", "unknown command metadata"),
                        };
                    }
                    Some("parse") => {
                        return match &image.spec_file {
                            Some(body) => output(0, body, ""),
                            None => output(1, "", "spec file not found"),
                        };
                    }
                    _ => {}
                }
            }
        }
        Script::Tool(image.behaviour.clone())
    }
}

fn is_detection(spec: &ContainerSpec) -> bool {
    spec.entrypoint.as_deref() == Some(&["sh".to_string(), "-lc".to_string()][..])
}

fn is_cat(spec: &ContainerSpec, path: &str) -> bool {
    spec.entrypoint.as_deref() == Some(&["cat".to_string()][..])
        && spec.cmd.as_deref() == Some(&[path.to_string()][..])
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create(&self, spec: ContainerSpec) -> Result<ContainerId, RuntimeError> {
        let image = self
            .images
            .lock()
            .unwrap()
            .get(&spec.image)
            .cloned()
            .ok_or_else(|| RuntimeError::CreateFailed(format!("No such image: {}", spec.image)))?;

        let script = self.script_for(&image, &spec);
        if matches!(&script, Script::Tool(behaviour) if behaviour.fail_create) {
            return Err(RuntimeError::CreateFailed("invalid mount config".to_string()));
        }
        let id = format!("{:064x}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.created.lock().unwrap().push(spec.clone());
        self.containers.lock().unwrap().insert(
            id.clone(),
            Container {
                spec,
                script,
                stdout: Vec::new(),
                stderr: Vec::new(),
            },
        );
        Ok(ContainerId::new(id))
    }

    async fn start(&self, id: &ContainerId) -> Result<(), RuntimeError> {
        let containers = self.containers.lock().unwrap();
        let container = containers
            .get(id.as_str())
            .ok_or_else(|| RuntimeError::StartFailed(format!("no such container {}", id)))?;
        match &container.script {
            Script::Tool(behaviour) if behaviour.fail_start => {
                Err(RuntimeError::StartFailed("exec format error".to_string()))
            }
            _ => Ok(()),
        }
    }

    async fn wait(&self, id: &ContainerId) -> Result<i64, RuntimeError> {
        let (script, spec) = {
            let containers = self.containers.lock().unwrap();
            let container = containers
                .get(id.as_str())
                .ok_or_else(|| RuntimeError::WaitFailed(format!("no such container {}", id)))?;
            (container.script.clone(), container.spec.clone())
        };

        let (exit_code, stdout, stderr) = match script {
            Script::Output { exit_code, stdout, stderr } => (exit_code, stdout, stderr),
            Script::Tool(behaviour) => {
                if let Some(delay) = behaviour.delay {
                    tokio::time::sleep(delay).await;
                }
                if behaviour.fail_wait {
                    return Err(RuntimeError::WaitFailed("container wait stream closed".to_string()));
                }
                if let Some(out) = spec.mounts.iter().find(|m| m.target == OUT_MOUNT) {
                    for (name, content) in &behaviour.outputs {
                        let path = PathBuf::from(&out.source).join(name);
                        if let Some(parent) = path.parent() {
                            std::fs::create_dir_all(parent).unwrap();
                        }
                        std::fs::write(path, content).unwrap();
                    }
                }
                (behaviour.exit_code, behaviour.stdout, behaviour.stderr)
            }
        };

        let mut containers = self.containers.lock().unwrap();
        if let Some(container) = containers.get_mut(id.as_str()) {
            container.stdout = stdout.into_bytes();
            container.stderr = stderr.into_bytes();
        }
        Ok(exit_code)
    }

    fn logs(&self, id: &ContainerId) -> LogStream {
        let containers = self.containers.lock().unwrap();
        let frames: Vec<Result<LogChunk, RuntimeError>> = match containers.get(id.as_str()) {
            Some(container) if matches!(&container.script, Script::Tool(b) if b.fail_logs) => vec![
                Ok(LogChunk::Stdout(Bytes::from(container.stdout.clone()))),
                Err(RuntimeError::LogsFailed("unexpected EOF in log frame header".to_string())),
            ],
            Some(container) => vec![
                Ok(LogChunk::Stdout(Bytes::from(container.stdout.clone()))),
                Ok(LogChunk::Stderr(Bytes::from(container.stderr.clone()))),
            ],
            None => vec![Err(RuntimeError::LogsFailed(format!("no such container {}", id)))],
        };
        futures::stream::iter(frames).boxed()
    }

    async fn remove(&self, id: &ContainerId) -> Result<(), RuntimeError> {
        self.containers.lock().unwrap().remove(id.as_str());
        self.removed.lock().unwrap().push(id.as_str().to_string());
        Ok(())
    }

    async fn list_images(&self) -> Result<Vec<ImageSummary>, RuntimeError> {
        let mut images: Vec<ImageSummary> = self
            .images
            .lock()
            .unwrap()
            .values()
            .map(|image| ImageSummary {
                id: format!("sha256:{}", image.reference.len()),
                repo_tags: vec![image.reference.clone()],
            })
            .collect();
        images.push(ImageSummary {
            id: "sha256:dangling".to_string(),
            repo_tags: vec!["<none>:<none>".to_string()],
        });
        Ok(images)
    }
}

pub struct FakeConnector {
    pub runtime: Arc<FakeRuntime>,
    unreachable: AtomicBool,
    connects: AtomicUsize,
}

impl FakeConnector {
    pub fn new(runtime: Arc<FakeRuntime>) -> Self {
        Self {
            runtime,
            unreachable: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
        }
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RuntimeConnector for FakeConnector {
    async fn connect(&self) -> Result<Arc<dyn ContainerRuntime>, RuntimeError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(RuntimeError::Connection("Cannot connect to the Docker daemon".to_string()));
        }
        Ok(Arc::clone(&self.runtime) as Arc<dyn ContainerRuntime>)
    }
}

/// A service wired to the fake engine, an in-memory repository and a
/// temporary mount path.
pub struct Harness {
    pub runtime: Arc<FakeRuntime>,
    pub connector: Arc<FakeConnector>,
    pub repository: Arc<InMemoryRunRepository>,
    pub cache: Arc<ToolSpecCache>,
    pub service: ToolRunService,
    pub mount: tempfile::TempDir,
}

impl Harness {
    pub fn new(images: Vec<FakeImage>) -> Self {
        Self::with_admins(images, AdminSet::default())
    }

    pub fn with_admins(images: Vec<FakeImage>, admins: AdminSet) -> Self {
        let runtime = Arc::new(FakeRuntime::new());
        for image in images {
            runtime.add_image(image);
        }
        let connector = Arc::new(FakeConnector::new(Arc::clone(&runtime)));
        let repository = Arc::new(InMemoryRunRepository::new(admins));
        let cache = Arc::new(ToolSpecCache::new());
        let mount = tempfile::tempdir().unwrap();
        let service = ToolRunService::new(
            connector.clone(),
            repository.clone(),
            Arc::clone(&cache),
            RunWorkspace::new(mount.path()),
            EventBus::with_default_capacity(),
            Duration::from_millis(500),
        );
        Self {
            runtime,
            connector,
            repository,
            cache,
            service,
            mount,
        }
    }
}

pub fn echo_image() -> FakeImage {
    FakeImage::new(ECHO_IMAGE)
        .with_spec(ECHO_SPEC)
        .with_citation(CITATION)
        .with_behaviour(ToolBehaviour::printing("Hello, World!\n"))
}
