// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

mod common;

use common::*;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use toolrun_core::application::run_service::{CreateRunRequest, ErrorKind, ServiceError};
use toolrun_core::domain::run::{AdminSet, Run, RunId, RunStatus, UserId};
use toolrun_core::domain::validation::ValidationErrorCode;

const COUNT_IMAGE: &str = "toolbox/tables:0.3";

const COUNT_SPEC: &str = r#"
tools:
  count-rows:
    title: Count rows
    description: Counts the rows of a table
    parameters:
      header:
        type: boolean
        optional: true
    data:
      table:
        extension: [csv, tsv]
      lookup:
        optional: true
"#;

fn alice() -> UserId {
    UserId::new("alice")
}

fn echo_request() -> CreateRunRequest {
    CreateRunRequest {
        tool_name: "echo".to_string(),
        docker_image: ECHO_IMAGE.to_string(),
        ..Default::default()
    }
}

async fn discovered(images: Vec<FakeImage>) -> Harness {
    let harness = Harness::new(images);
    harness
        .service
        .discover_tools(false, &CancellationToken::new())
        .await
        .unwrap();
    harness
}

async fn wait_terminal(harness: &Harness, user: &UserId, id: RunId) -> Run {
    for _ in 0..200 {
        let detail = harness.service.get_run_detail(user, id).await.unwrap();
        if detail.run.status.is_terminal() {
            return detail.run;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run {} did not reach a terminal state", id);
}

#[tokio::test]
async fn test_echo_tool_end_to_end() {
    let harness = discovered(vec![echo_image()]).await;
    let user = alice();

    let run = harness.service.create_run(&user, echo_request()).await.unwrap();
    assert_eq!(run.status, RunStatus::Pending);
    assert_eq!(run.title, "Echo");

    let inputs: serde_json::Value =
        serde_json::from_slice(&std::fs::read(run.input_dir().unwrap().join("inputs.json")).unwrap()).unwrap();
    assert_eq!(inputs, json!({ "echo": { "parameters": {}, "data": {} } }));

    harness.service.start_run(&user, run.id).await.unwrap();
    let run = wait_terminal(&harness, &user, run.id).await;
    assert_eq!(run.status, RunStatus::Finished);

    let results = harness.service.list_results(&user, run.id).await.unwrap();
    let names: Vec<&str> = results.iter().map(|f| f.filename.as_str()).collect();
    assert_eq!(names, vec!["STDERR.log", "STDOUT.log"]);

    let stdout = harness
        .service
        .get_result_file(&user, run.id, "STDOUT.log")
        .await
        .unwrap();
    assert_eq!(stdout.content, b"Hello, World!\n");
    assert_eq!(stdout.file.mime_type, "text/plain");
}

#[tokio::test]
async fn test_start_reports_accepted_run() {
    let image = echo_image().with_behaviour(ToolBehaviour {
        stdout: "slow\n".to_string(),
        delay: Some(Duration::from_millis(200)),
        ..Default::default()
    });
    let harness = discovered(vec![image]).await;
    let user = alice();

    let run = harness.service.create_run(&user, echo_request()).await.unwrap();
    let started = harness.service.start_run(&user, run.id).await.unwrap();
    assert_eq!(started.status, RunStatus::Running);
    assert!(started.started_at.is_some());

    assert_eq!(wait_terminal(&harness, &user, run.id).await.status, RunStatus::Finished);
}

#[tokio::test]
async fn test_draining_after_start_leaves_no_container_behind() {
    let image = echo_image().with_behaviour(ToolBehaviour {
        stdout: "slow\n".to_string(),
        delay: Some(Duration::from_millis(200)),
        ..Default::default()
    });
    let harness = discovered(vec![image]).await;
    let user = alice();

    let result = harness.service.create_and_start_run(&user, echo_request()).await.unwrap();
    assert!(!result.run.status.is_terminal());

    harness.service.executor().drain().await;
    let run = harness.service.get_run_detail(&user, result.run.id).await.unwrap().run;
    assert_eq!(run.status, RunStatus::Finished);
    assert_eq!(harness.runtime.live_containers(), 0);
}

#[tokio::test]
async fn test_start_failure_is_observed_as_errored() {
    let image = echo_image().with_behaviour(ToolBehaviour {
        fail_start: true,
        ..Default::default()
    });
    let harness = discovered(vec![image]).await;
    let user = alice();

    let result = harness
        .service
        .create_and_start_run(&user, echo_request())
        .await
        .unwrap();
    assert!(!result.start_failed);
    assert_eq!(result.run.status, RunStatus::Errored);
    assert!(result
        .run
        .error_message
        .unwrap()
        .starts_with("the execution of the tool (echo) container (toolbox/echo:latest) errored unexpectedly"));
}

#[tokio::test]
async fn test_only_pending_runs_can_be_started() {
    let harness = discovered(vec![echo_image()]).await;
    let user = alice();

    let run = harness.service.create_run(&user, echo_request()).await.unwrap();
    harness.service.start_run(&user, run.id).await.unwrap();
    wait_terminal(&harness, &user, run.id).await;

    let err = harness.service.start_run(&user, run.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotStartable { status: RunStatus::Finished, .. }));
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_invalid_payload_is_rejected_with_field_errors() {
    let harness = discovered(vec![echo_image()]).await;

    let mut parameters = BTreeMap::new();
    parameters.insert("repeat".to_string(), json!(10));
    parameters.insert("colour".to_string(), json!("blue"));
    let request = CreateRunRequest {
        parameters,
        ..echo_request()
    };

    let err = harness.service.create_run(&alice(), request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(
        err.to_string(),
        "the provided payload is invalid for the tool toolbox/echo:latest::echo"
    );

    let failure = err.validation_failure().unwrap();
    assert_eq!(failure.errors.len(), 2);
    assert_eq!(
        failure.errors.for_field("parameters.repeat")[0].code,
        ValidationErrorCode::OutOfRange
    );
    assert_eq!(
        failure.errors.for_field("parameters.colour")[0].code,
        ValidationErrorCode::UnknownParameter
    );

    // nothing was persisted or staged
    assert!(harness.service.list_runs(&alice(), None).await.unwrap().is_empty());
    assert_eq!(std::fs::read_dir(harness.mount.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_datasets_are_staged_into_the_input_mount() {
    let harness = discovered(vec![FakeImage::new(COUNT_IMAGE).with_spec(COUNT_SPEC)]).await;
    let source = tempfile::tempdir().unwrap();
    let table = source.path().join("rivers.csv");
    std::fs::write(&table, "name,length\nRhine,1233\n").unwrap();

    let mut data = BTreeMap::new();
    data.insert("table".to_string(), table.to_string_lossy().into_owned());
    let mut parameters = BTreeMap::new();
    parameters.insert("header".to_string(), json!(true));
    let request = CreateRunRequest {
        tool_name: "count-rows".to_string(),
        docker_image: COUNT_IMAGE.to_string(),
        parameters,
        data,
    };

    let run = harness.service.create_run(&alice(), request).await.unwrap();
    assert_eq!(run.data.get("table").map(String::as_str), Some("/in/rivers.csv"));
    assert_eq!(run.parameters.get("header"), Some(&json!(true)));

    let in_dir = run.input_dir().unwrap();
    assert_eq!(
        std::fs::read_to_string(in_dir.join("rivers.csv")).unwrap(),
        "name,length\nRhine,1233\n"
    );
    let inputs: serde_json::Value =
        serde_json::from_slice(&std::fs::read(in_dir.join("inputs.json")).unwrap()).unwrap();
    assert_eq!(inputs["count-rows"]["data"]["table"], "/in/rivers.csv");
    assert_eq!(inputs["count-rows"]["parameters"]["header"], true);
}

#[tokio::test]
async fn test_datasets_sharing_a_basename_are_rejected() {
    let harness = discovered(vec![FakeImage::new(COUNT_IMAGE).with_spec(COUNT_SPEC)]).await;
    let source = tempfile::tempdir().unwrap();
    for dir in ["2023", "2024"] {
        std::fs::create_dir(source.path().join(dir)).unwrap();
        std::fs::write(source.path().join(dir).join("rivers.csv"), dir).unwrap();
    }

    let mut data = BTreeMap::new();
    for (name, dir) in [("table", "2023"), ("lookup", "2024")] {
        data.insert(
            name.to_string(),
            source.path().join(dir).join("rivers.csv").to_string_lossy().into_owned(),
        );
    }
    let request = CreateRunRequest {
        tool_name: "count-rows".to_string(),
        docker_image: COUNT_IMAGE.to_string(),
        data,
        ..Default::default()
    };

    let err = harness.service.create_run(&alice(), request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    let failure = err.validation_failure().unwrap();
    assert_eq!(failure.errors.for_field("data.table")[0].code, ValidationErrorCode::StagingConflict);
    assert_eq!(std::fs::read_dir(harness.mount.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_missing_dataset_file_is_not_found() {
    let harness = discovered(vec![FakeImage::new(COUNT_IMAGE).with_spec(COUNT_SPEC)]).await;

    let mut data = BTreeMap::new();
    data.insert("table".to_string(), "/nonexistent/rivers.csv".to_string());
    let request = CreateRunRequest {
        tool_name: "count-rows".to_string(),
        docker_image: COUNT_IMAGE.to_string(),
        data,
        ..Default::default()
    };

    let err = harness.service.create_run(&alice(), request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(std::fs::read_dir(harness.mount.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_caller_identity_is_required() {
    let harness = discovered(vec![echo_image()]).await;
    let anonymous = UserId::new("");

    let err = harness.service.create_run(&anonymous, echo_request()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
    let err = harness.service.list_runs(&anonymous, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
}

#[tokio::test]
async fn test_unknown_tool_is_not_found() {
    let harness = discovered(vec![echo_image()]).await;
    let request = CreateRunRequest {
        tool_name: "nope".to_string(),
        ..echo_request()
    };

    let err = harness.service.create_run(&alice(), request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_runs_are_scoped_to_their_owner() {
    let harness = Harness::with_admins(vec![echo_image()], AdminSet::new(["root"]));
    harness
        .service
        .discover_tools(false, &CancellationToken::new())
        .await
        .unwrap();
    let bob = UserId::new("bob");
    let root = UserId::new("root");

    let first = harness.service.create_run(&alice(), echo_request()).await.unwrap();
    let second = harness.service.create_run(&alice(), echo_request()).await.unwrap();
    harness.service.create_run(&bob, echo_request()).await.unwrap();

    let ids: Vec<RunId> = harness
        .service
        .list_runs(&alice(), None)
        .await
        .unwrap()
        .iter()
        .map(|run| run.id)
        .collect();
    assert_eq!(ids, vec![second.id, first.id]);

    let err = harness.service.get_run_detail(&bob, first.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let err = harness.service.delete_run(&bob, first.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    assert_eq!(harness.service.list_runs(&root, None).await.unwrap().len(), 3);
    assert!(harness.service.get_run_detail(&root, first.id).await.is_ok());

    let pending = harness
        .service
        .list_runs(&alice(), Some(RunStatus::Pending))
        .await
        .unwrap();
    assert_eq!(pending.len(), 2);
    let finished = harness
        .service
        .list_runs(&alice(), Some(RunStatus::Finished))
        .await
        .unwrap();
    assert!(finished.is_empty());
}

#[tokio::test]
async fn test_delete_removes_record_and_workspace() {
    let harness = discovered(vec![echo_image()]).await;
    let user = alice();

    let run = harness.service.create_run(&user, echo_request()).await.unwrap();
    let root = run.workspace_root().unwrap();
    assert!(root.exists());

    harness.service.delete_run(&user, run.id).await.unwrap();
    assert!(!root.exists());
    let err = harness.service.get_run_detail(&user, run.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_run_detail_exposes_tool_metadata() {
    let image = echo_image().with_behaviour(ToolBehaviour {
        outputs: vec![("_metadata.json".to_string(), br#"{"rows": 42}"#.to_vec())],
        ..Default::default()
    });
    let harness = discovered(vec![image]).await;
    let user = alice();

    let run = harness.service.create_run(&user, echo_request()).await.unwrap();
    harness.service.start_run(&user, run.id).await.unwrap();
    wait_terminal(&harness, &user, run.id).await;

    let detail = harness.service.get_run_detail(&user, run.id).await.unwrap();
    assert_eq!(detail.tool_metadata, Some(json!({ "rows": 42 })));

    let err = harness
        .service
        .get_result_file(&user, run.id, "missing.txt")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_tool_listing_and_lookup() {
    let harness = discovered(vec![
        echo_image(),
        FakeImage::new(COUNT_IMAGE).with_spec(COUNT_SPEC),
    ])
    .await;

    let all = harness.service.list_tool_specs("");
    assert_eq!(all.len(), 2);
    let filtered = harness.service.list_tool_specs("ROWS");
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].id, "toolbox/tables:0.3::count-rows");
    assert!(harness.service.list_tool_specs("zzz").is_empty());

    assert!(harness.service.get_tool_spec("toolbox/echo:latest::echo").is_ok());
    let err = harness.service.get_tool_spec("toolbox/echo:latest::nope").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_resolve_probes_uncached_image() {
    let harness = Harness::new(vec![echo_image()]);

    assert!(harness.service.get_tool_spec("toolbox/echo:latest::echo").is_err());
    let spec = harness
        .service
        .resolve_tool_spec("toolbox/echo:latest::echo")
        .await
        .unwrap();
    assert_eq!(spec.name, "echo");
    assert!(harness.service.get_tool_spec("toolbox/echo:latest::echo").is_ok());
    assert!(!harness.cache.is_initialised());
}
