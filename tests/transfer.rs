//! `HttpTransfer` against a mock backend, plus one full run over HTTP.

mod common;

use bimview::{
    HttpTransfer, JobStatus, ManifestEngine, Pipeline, PipelineConfig, PollStatus, SourceFile,
    Transfer, TransferError,
};
use httpmock::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn transfer(server: &MockServer) -> HttpTransfer {
    let config = PipelineConfig::builder()
        .backend_url(server.base_url())
        .model_api_url(server.url("/models"))
        .request_timeout_secs(5)
        .build()
        .unwrap();
    HttpTransfer::new(&config).unwrap()
}

#[tokio::test]
async fn upload_posts_multipart_and_returns_receipt() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/upload-rvt");
            then.status(200)
                .json_body(json!({ "urn": "dXJuOmFkc2s", "file_size_mb": 42.5 }));
        })
        .await;

    let file = SourceFile::from_bytes("design.rvt", vec![1u8; 2048]);
    let receipt = transfer(&server).upload(&file).await.unwrap();

    assert_eq!(receipt.urn, "dXJuOmFkc2s");
    assert_eq!(receipt.file_size_mb, Some(42.5));
    mock.assert_async().await;
}

#[tokio::test]
async fn upload_server_error_keeps_body() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/upload-rvt");
            then.status(500).body("disk full\n");
        })
        .await;

    let file = SourceFile::from_bytes("design.rvt", vec![1u8; 16]);
    let err = transfer(&server).upload(&file).await.unwrap_err();
    assert_eq!(
        err,
        TransferError::Server {
            op: "upload",
            status: 500,
            body: "disk full".into(),
        }
    );
}

#[tokio::test]
async fn status_parses_each_state_and_hint() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/status/u-pending");
            then.status(200)
                .json_body(json!({ "status": "pending", "progress": "45% complete" }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/status/u-done");
            then.status(200).json_body(json!({ "status": "SUCCESS" }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/status/u-bad");
            then.status(200)
                .json_body(json!({ "status": "failed", "progress": null }));
        })
        .await;

    let t = transfer(&server);

    let pending = t.poll_status("u-pending").await.unwrap();
    assert_eq!(pending.status, PollStatus::Pending);
    assert_eq!(pending.progress_hint.as_deref(), Some("45% complete"));

    assert_eq!(t.poll_status("u-done").await.unwrap().status, PollStatus::Success);

    let failed = t.poll_status("u-bad").await.unwrap();
    assert_eq!(failed.status, PollStatus::Failed);
    assert_eq!(failed.progress_hint, None);
}

#[tokio::test]
async fn unknown_status_is_a_decode_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/status/u1");
            then.status(200).json_body(json!({ "status": "inprogress" }));
        })
        .await;

    let err = transfer(&server).poll_status("u1").await.unwrap_err();
    assert!(matches!(err, TransferError::Decode { op: "status", .. }), "{err:?}");
    assert!(!err.is_transient());
}

#[tokio::test]
async fn token_is_fetched_and_empty_token_rejected() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/token");
            then.status(200)
                .json_body(json!({ "access_token": "eyJhbGc", "expires_in": 3599 }));
        })
        .await;

    let token = transfer(&server).fetch_token().await.unwrap();
    assert_eq!(token.access_token, "eyJhbGc");
    assert_eq!(token.expires_in, Some(3599));

    let empty = MockServer::start_async().await;
    empty
        .mock_async(|when, then| {
            when.method(GET).path("/token");
            then.status(200).json_body(json!({ "access_token": "" }));
        })
        .await;
    assert!(matches!(
        transfer(&empty).fetch_token().await.unwrap_err(),
        TransferError::Decode { op: "token", .. }
    ));
}

#[tokio::test]
async fn download_uses_content_disposition_name() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/download/u1");
            then.status(200)
                .header("content-disposition", r#"attachment; filename="tower.svf.zip""#)
                .body("PK\u{3}\u{4}");
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/download/u2");
            then.status(200).body("raw");
        })
        .await;

    let t = transfer(&server);
    let named = t.fetch_derivative("u1").await.unwrap();
    assert_eq!(named.filename, "tower.svf.zip");
    assert_eq!(&named.bytes[..], b"PK\x03\x04");

    let unnamed = t.fetch_derivative("u2").await.unwrap();
    assert_eq!(unnamed.filename, "download");
}

#[tokio::test]
async fn supported_formats_are_decoded() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/supported-formats");
            then.status(200).json_body(json!({
                "supported_formats": {
                    "bim": [".rvt", ".ifc"],
                    "cad": ["step", "STP", "sldprt"]
                }
            }));
        })
        .await;

    let formats = transfer(&server).fetch_supported_formats().await.unwrap();
    assert_eq!(
        formats.extensions(),
        vec!["rvt", "ifc", "step", "stp", "sldprt"]
    );
}

#[tokio::test]
async fn handoff_fetches_path_as_pred_step() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/models/download-step")
                .query_param("path", "/data/sketches/42");
            then.status(200).body("ISO-10303-21;");
        })
        .await;

    let file = transfer(&server)
        .fetch_source("/data/sketches/42")
        .await
        .unwrap();
    assert_eq!(file.name(), "pred.step");
    assert_eq!(&file.data()[..], b"ISO-10303-21;");
    mock.assert_async().await;
}

#[tokio::test]
async fn slow_backend_times_out_instead_of_failing() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/token");
            then.status(200)
                .delay(Duration::from_secs(3))
                .json_body(json!({ "access_token": "late" }));
        })
        .await;

    let config = PipelineConfig::builder()
        .backend_url(server.base_url())
        .request_timeout_secs(1)
        .build()
        .unwrap();
    let err = HttpTransfer::new(&config)
        .unwrap()
        .fetch_token()
        .await
        .unwrap_err();

    assert_eq!(err, TransferError::TimedOut { op: "token", secs: 1 });
    assert!(err.is_transient());
}

#[tokio::test]
async fn full_run_over_http() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/upload-rvt");
            then.status(200).json_body(json!({ "urn": "u1" }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/status/u1");
            then.status(200).json_body(json!({ "status": "success" }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/token");
            then.status(200).json_body(json!({ "access_token": "t1" }));
        })
        .await;
    let manifest = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/designdata/u1/manifest")
                .header("authorization", "Bearer t1");
            then.status(200).json_body(json!({
                "status": "success",
                "derivatives": [{
                    "name": "tower.ifc",
                    "children": [
                        { "guid": "g3", "type": "geometry", "role": "3d", "name": "{3D}" }
                    ]
                }]
            }));
        })
        .await;

    let config = PipelineConfig::builder()
        .backend_url(server.base_url())
        .derivative_api_url(server.url("/designdata"))
        .poll_interval_ms(10)
        .build()
        .unwrap();
    let pipeline = Pipeline::new(
        config.clone(),
        Arc::new(HttpTransfer::new(&config).unwrap()),
        Arc::new(ManifestEngine::from_config(&config).unwrap()),
        Arc::new(bimview::RuntimeLoader::new(Arc::new(
            common::MemorySource::default(),
        ))),
    );

    pipeline
        .select_file(SourceFile::from_bytes("tower.ifc", vec![1u8; 64]))
        .unwrap();
    let outcome = pipeline.run().await.unwrap();

    assert_eq!(outcome.viewable.unwrap().guid, "g3");
    let snap = pipeline.snapshot();
    assert_eq!(snap.status, JobStatus::Ready);
    assert!(snap.viewer_active);
    manifest.assert_async().await;

    pipeline.unmount();
    assert!(!pipeline.snapshot().viewer_active);
}
