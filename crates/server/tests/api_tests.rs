//! Integration tests for the file endpoints.

mod common;

use axum::http::StatusCode;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use common::TestServer;

/// Deterministic payload of the requested size.
fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn test_health_check() {
    let server = TestServer::new().await;

    let (status, body) = server.request("GET", "/v1/health", Vec::new()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.get("status").and_then(|v| v.as_str()), Some("ok"));
    assert_eq!(
        body.get("backend").and_then(|v| v.as_str()),
        Some("directory")
    );
}

#[tokio::test]
async fn test_direct_upload_roundtrip() {
    let server = TestServer::new().await;
    let data = payload(600);

    let (status, body) = server
        .request("POST", "/v1/files?filename=report.bin", data.clone())
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(
        body.get("filename").and_then(|v| v.as_str()),
        Some("report.bin")
    );
    assert_eq!(
        body.get("deduplicated").and_then(|v| v.as_bool()),
        Some(false)
    );
    let file_id = body.get("file_id").and_then(|v| v.as_i64()).unwrap();

    // Listed with one chunk.
    let (status, body) = server.request("GET", "/v1/files", Vec::new()).await;
    assert_eq!(status, StatusCode::OK);
    let files = body.get("files").and_then(|v| v.as_array()).unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].get("id").and_then(|v| v.as_i64()), Some(file_id));
    assert_eq!(files[0].get("size").and_then(|v| v.as_u64()), Some(600));
    assert_eq!(files[0].get("chunks").and_then(|v| v.as_u64()), Some(1));
    assert!(files[0].get("created_at").and_then(|v| v.as_str()).is_some());

    // Downloaded bytes match, with the expected headers.
    let (status, headers, bytes) = server
        .request_raw("GET", &format!("/v1/files/{file_id}/content"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, data);
    assert_eq!(
        headers.get(CONTENT_TYPE).unwrap(),
        "application/octet-stream"
    );
    assert_eq!(headers.get(CONTENT_LENGTH).unwrap(), "600");
    assert_eq!(
        headers.get(CONTENT_DISPOSITION).unwrap(),
        "attachment; filename=\"report.bin\""
    );
}

#[tokio::test]
async fn test_direct_upload_splits_into_segments() {
    let server = TestServer::new().await;
    // 2500 bytes at a 1024-byte segment size means three segments.
    let data = payload(2500);

    let (status, body) = server
        .request("POST", "/v1/files?filename=large.bin", data.clone())
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let file_id = body.get("file_id").and_then(|v| v.as_i64()).unwrap();

    let chunks = server.metadata().get_chunks(file_id).await.unwrap();
    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[0].size_bytes, 1024);
    assert_eq!(chunks[1].size_bytes, 1024);
    assert_eq!(chunks[2].size_bytes, 452);
    assert_eq!(server.relay_object_count(), 3);

    let (status, _headers, bytes) = server
        .request_raw("GET", &format!("/v1/files/{file_id}/content"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, data);
}

#[tokio::test]
async fn test_direct_upload_deduplicates_identical_content() {
    let server = TestServer::new().await;
    let data = payload(300);

    let (status, first) = server
        .request("POST", "/v1/files?filename=a.bin", data.clone())
        .await;
    assert_eq!(status, StatusCode::CREATED);

    // Same bytes under a different name resolves to the existing file.
    let (status, second) = server
        .request("POST", "/v1/files?filename=b.bin", data)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        second.get("deduplicated").and_then(|v| v.as_bool()),
        Some(true)
    );
    assert_eq!(
        second.get("file_id").and_then(|v| v.as_i64()),
        first.get("file_id").and_then(|v| v.as_i64())
    );

    let (_, body) = server.request("GET", "/v1/files", Vec::new()).await;
    let files = body.get("files").and_then(|v| v.as_array()).unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(server.relay_object_count(), 1);
}

#[tokio::test]
async fn test_direct_upload_zero_byte_file() {
    let server = TestServer::new().await;

    let (status, body) = server
        .request("POST", "/v1/files?filename=empty.bin", Vec::new())
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let file_id = body.get("file_id").and_then(|v| v.as_i64()).unwrap();

    // An empty source plans zero segments, so nothing reaches the backend.
    let chunks = server.metadata().get_chunks(file_id).await.unwrap();
    assert!(chunks.is_empty());
    assert_eq!(server.relay_object_count(), 0);

    let (status, headers, bytes) = server
        .request_raw("GET", &format!("/v1/files/{file_id}/content"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get(CONTENT_LENGTH).unwrap(), "0");
    assert!(bytes.is_empty());
}

#[tokio::test]
async fn test_direct_upload_rejects_bad_filename() {
    let server = TestServer::new().await;

    let (status, body) = server
        .request("POST", "/v1/files?filename=", payload(10))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body.get("code").and_then(|v| v.as_str()),
        Some("bad_request")
    );

    let (status, _) = server
        .request("POST", "/v1/files?filename=a%2Fb", payload(10))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_download_missing_file() {
    let server = TestServer::new().await;

    let (status, body) = server
        .request("GET", "/v1/files/9999/content", Vec::new())
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body.get("code").and_then(|v| v.as_str()), Some("not_found"));
}

#[tokio::test]
async fn test_delete_file_removes_backend_objects() {
    let server = TestServer::new().await;

    let (_, body) = server
        .request("POST", "/v1/files?filename=doomed.bin", payload(2100))
        .await;
    let file_id = body.get("file_id").and_then(|v| v.as_i64()).unwrap();
    assert_eq!(server.relay_object_count(), 3);

    let (status, body) = server
        .request("DELETE", &format!("/v1/files/{file_id}"), Vec::new())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.get("deleted").and_then(|v| v.as_i64()), Some(file_id));
    assert_eq!(server.relay_object_count(), 0);

    // Gone for every endpoint afterwards.
    let (status, _) = server
        .request("GET", &format!("/v1/files/{file_id}/content"), Vec::new())
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = server
        .request("DELETE", &format!("/v1/files/{file_id}"), Vec::new())
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = server.request("GET", "/v1/files", Vec::new()).await;
    let files = body.get("files").and_then(|v| v.as_array()).unwrap();
    assert!(files.is_empty());
}
