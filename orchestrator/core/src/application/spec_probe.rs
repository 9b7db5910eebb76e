// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Specification Probe
//!
//! Reads the spec file and citation embedded in one image by running
//! throwaway containers against it:
//!
//! 1. detect the `gotap` shim (`sh -lc "command -v gotap || which gotap"`)
//! 2. if present, try `metadata --spec-file`, `parse --spec-file`, `parse <path>`
//! 3. otherwise, or if none of those yields a parseable spec, `cat /src/tool.yml`
//!
//! Every container started here is removed before the function returns,
//! whatever the outcome.

use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::runtime::{collect_logs, ContainerLogs, ContainerRuntime, ContainerSpec, RuntimeError};
use crate::domain::tool_spec::{Citation, SpecFile, CITATION_FILE_PATH, SPEC_FILE_PATH};

pub const SHIM_BINARY: &str = "gotap";

#[derive(Debug, Error)]
pub enum SpecProbeError {
    /// The image carries no usable spec. Not a failure for discovery.
    #[error("image {image} has no tool spec: {reason}")]
    Missing { image: String, reason: String },
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl SpecProbeError {
    fn missing(image: &str, reason: impl Into<String>) -> Self {
        SpecProbeError::Missing {
            image: image.to_string(),
            reason: reason.into(),
        }
    }

    /// The container engine itself could not be reached.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, SpecProbeError::Runtime(RuntimeError::Connection(_)))
    }
}

/// Result of one throwaway container.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub exit_code: i64,
    pub logs: ContainerLogs,
}

impl CommandOutput {
    pub fn stdout(&self) -> String {
        self.logs.stdout_lossy()
    }

    pub fn stderr(&self) -> String {
        self.logs.stderr_lossy()
    }
}

/// Create, start, wait, read logs, and always remove.
pub async fn run_container_command(
    runtime: &dyn ContainerRuntime,
    spec: ContainerSpec,
) -> Result<CommandOutput, RuntimeError> {
    let image = spec.image.clone();
    let id = runtime.create(spec).await?;

    let result = async {
        runtime.start(&id).await?;
        let exit_code = runtime.wait(&id).await?;
        let logs = collect_logs(runtime.logs(&id)).await?;
        Ok::<_, RuntimeError>(CommandOutput { exit_code, logs })
    }
    .await;

    if let Err(e) = runtime.remove(&id).await {
        warn!("Failed to remove probe container {} ({}): {}", id, image, e);
    }
    result
}

/// Path of the shim inside `image`, if it has one.
pub async fn detect_shim(runtime: &dyn ContainerRuntime, image: &str) -> Result<Option<String>, RuntimeError> {
    let spec = ContainerSpec::new(image)
        .with_entrypoint(["sh", "-lc"])
        .with_cmd([format!("command -v {0} || which {0}", SHIM_BINARY)]);

    let output = run_container_command(runtime, spec).await?;
    if output.exit_code != 0 {
        return Ok(None);
    }
    let path = output.stdout().trim().to_string();
    Ok(if path.is_empty() { None } else { Some(path) })
}

pub async fn read_tool_spec(runtime: &dyn ContainerRuntime, image: &str) -> Result<SpecFile, SpecProbeError> {
    let shim = match detect_shim(runtime, image).await {
        Ok(shim) => shim,
        Err(RuntimeError::Connection(e)) => return Err(RuntimeError::Connection(e).into()),
        Err(e) => {
            // images without a shell cannot run the detection command
            debug!("Shim detection failed for {}: {}", image, e);
            None
        }
    };

    if let Some(shim_path) = shim {
        if let Some(spec) = read_spec_via_shim(runtime, image, &shim_path).await {
            return Ok(spec);
        }
        debug!("Shim at {} in {} produced no spec, reading {} directly", shim_path, image, SPEC_FILE_PATH);
    }

    let spec = ContainerSpec::new(image).with_entrypoint(["cat"]).with_cmd([SPEC_FILE_PATH]);
    let output = match run_container_command(runtime, spec).await {
        Ok(output) => output,
        Err(RuntimeError::Connection(e)) => return Err(RuntimeError::Connection(e).into()),
        Err(e) => return Err(SpecProbeError::missing(image, e.to_string())),
    };

    if output.exit_code != 0 {
        return Err(SpecProbeError::missing(
            image,
            format!(
                "the container errored while identifying the tool spec: {}",
                output.stderr().trim()
            ),
        ));
    }
    let stdout = output.stdout();
    if stdout.trim().is_empty() {
        return Err(SpecProbeError::missing(image, "the container did not respond"));
    }

    SpecFile::parse(&stdout).map_err(|e| {
        SpecProbeError::missing(
            image,
            format!("no valid tool-spec at {}: {}", SPEC_FILE_PATH, e),
        )
    })
}

async fn read_spec_via_shim(runtime: &dyn ContainerRuntime, image: &str, shim_path: &str) -> Option<SpecFile> {
    let invocations: [&[&str]; 3] = [
        &["metadata", "--spec-file", SPEC_FILE_PATH],
        &["parse", "--spec-file", SPEC_FILE_PATH],
        &["parse", SPEC_FILE_PATH],
    ];

    for args in invocations {
        let spec = ContainerSpec::new(image)
            .with_entrypoint([shim_path])
            .with_cmd(args.iter().copied());
        let output = match run_container_command(runtime, spec).await {
            Ok(output) if output.exit_code == 0 => output,
            Ok(output) => {
                debug!("{} {:?} exited with {} in {}", SHIM_BINARY, args, output.exit_code, image);
                continue;
            }
            Err(e) => {
                debug!("{} {:?} failed in {}: {}", SHIM_BINARY, args, image, e);
                continue;
            }
        };
        let stdout = output.stdout();
        if stdout.trim().is_empty() {
            continue;
        }
        match SpecFile::parse(&stdout) {
            Ok(spec) => return Some(spec),
            Err(e) => debug!("{} {:?} output in {} did not parse: {}", SHIM_BINARY, args, image, e),
        }
    }
    None
}

/// Best-effort citation read; any failure means "no citation".
pub async fn read_citation(runtime: &dyn ContainerRuntime, image: &str) -> Option<Citation> {
    let spec = ContainerSpec::new(image).with_entrypoint(["cat"]).with_cmd([CITATION_FILE_PATH]);
    let output = match run_container_command(runtime, spec).await {
        Ok(output) => output,
        Err(e) => {
            debug!("Could not read {} from {}: {}", CITATION_FILE_PATH, image, e);
            return None;
        }
    };

    if !output.logs.stderr.is_empty() || output.logs.stdout.is_empty() {
        return None;
    }
    match Citation::parse(&output.stdout()) {
        Ok(citation) => Some(citation),
        Err(e) => {
            debug!("Ignoring citation of {}: {}", image, e);
            None
        }
    }
}
