//! Release Publishing Tests
//!
//! The publisher against a mocked GitHub releases API.

use std::path::PathBuf;
use std::sync::Arc;

use mockito::{Matcher, Mock, ServerGuard};
use tempfile::TempDir;

use sfmforge::adapters::GitHubClient;
use sfmforge::core::{PublishRequest, Publisher};
use sfmforge::error::ForgeError;

const TAG: &str = "v1.2.0";

fn release_json(server: &ServerGuard) -> String {
    serde_json::json!({
        "id": 7,
        "tag_name": TAG,
        "html_url": "https://github.com/o/r/releases/tag/v1.2.0",
        "upload_url": format!("{}/uploads/repos/o/r/releases/7/assets{{?name,label}}", server.url()),
    })
    .to_string()
}

fn publisher(server: &ServerGuard) -> Publisher {
    Publisher::new(Arc::new(GitHubClient::new(
        server.url(),
        "o/r",
        Some("secret".to_string()),
    )))
}

fn request(temp: &TempDir, overwrite: bool) -> PublishRequest {
    let archive = temp.path().join("glomap-Release.tar.gz");
    std::fs::write(&archive, b"archive bytes").unwrap();
    let wheel = temp.path().join("pycolmap-3.11-cp312-manylinux.whl");
    std::fs::write(&wheel, b"wheel bytes").unwrap();

    PublishRequest {
        tag: TAG.to_string(),
        title: TAG.to_string(),
        notes: "notes".to_string(),
        files: vec![archive, wheel],
        overwrite,
    }
}

async fn upload_mock(server: &mut ServerGuard, name: &str, expect: usize) -> Mock {
    server
        .mock("POST", Matcher::Regex("^/uploads/repos/o/r/releases/7/assets".to_string()))
        .match_query(Matcher::UrlEncoded("name".to_string(), name.to_string()))
        .match_header("content-type", "application/octet-stream")
        .with_status(201)
        .with_body(
            serde_json::json!({
                "name": name,
                "size": 13,
                "browser_download_url": format!("https://github.com/o/r/releases/download/v1.2.0/{}", name),
            })
            .to_string(),
        )
        .expect(expect)
        .create_async()
        .await
}

async fn create_mock(server: &mut ServerGuard, expect: usize) -> Mock {
    let body = release_json(server);
    server
        .mock("POST", "/repos/o/r/releases")
        .match_header("authorization", "Bearer secret")
        .match_body(Matcher::PartialJson(serde_json::json!({ "tag_name": TAG })))
        .with_status(201)
        .with_body(body)
        .expect(expect)
        .create_async()
        .await
}

#[tokio::test]
async fn test_publish_new_release() {
    let mut server = mockito::Server::new_async().await;
    let temp = TempDir::new().unwrap();

    let find = server
        .mock("GET", "/repos/o/r/releases/tags/v1.2.0")
        .with_status(404)
        .with_body(r#"{"message":"Not Found"}"#)
        .create_async()
        .await;
    let create = create_mock(&mut server, 1).await;
    let archive = upload_mock(&mut server, "glomap-Release.tar.gz", 1).await;
    let wheel = upload_mock(&mut server, "pycolmap-3.11-cp312-manylinux.whl", 1).await;
    let sums = upload_mock(&mut server, "SHA256SUMS", 1).await;

    let result = publisher(&server)
        .publish(&request(&temp, false))
        .await
        .unwrap();

    assert!(!result.replaced);
    assert_eq!(result.release.id, 7);
    let names: Vec<&str> = result.assets.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "glomap-Release.tar.gz",
            "pycolmap-3.11-cp312-manylinux.whl",
            "SHA256SUMS"
        ]
    );

    find.assert_async().await;
    create.assert_async().await;
    archive.assert_async().await;
    wheel.assert_async().await;
    sums.assert_async().await;
}

#[tokio::test]
async fn test_existing_release_without_overwrite_conflicts() {
    let mut server = mockito::Server::new_async().await;
    let temp = TempDir::new().unwrap();

    let body = release_json(&server);
    server
        .mock("GET", "/repos/o/r/releases/tags/v1.2.0")
        .with_status(200)
        .with_body(body)
        .create_async()
        .await;
    let create = create_mock(&mut server, 0).await;

    let err = publisher(&server)
        .publish(&request(&temp, false))
        .await
        .unwrap_err();

    assert!(matches!(err, ForgeError::Conflict { ref tag } if tag == TAG));
    create.assert_async().await;
}

#[tokio::test]
async fn test_overwrite_deletes_then_recreates() {
    let mut server = mockito::Server::new_async().await;
    let temp = TempDir::new().unwrap();

    let body = release_json(&server);
    server
        .mock("GET", "/repos/o/r/releases/tags/v1.2.0")
        .with_status(200)
        .with_body(body)
        .create_async()
        .await;
    let delete = server
        .mock("DELETE", "/repos/o/r/releases/7")
        .with_status(204)
        .expect(1)
        .create_async()
        .await;
    let delete_tag = server
        .mock("DELETE", "/repos/o/r/git/refs/tags/v1.2.0")
        .with_status(204)
        .expect(1)
        .create_async()
        .await;
    let create = create_mock(&mut server, 1).await;
    upload_mock(&mut server, "glomap-Release.tar.gz", 1).await;
    upload_mock(&mut server, "pycolmap-3.11-cp312-manylinux.whl", 1).await;
    upload_mock(&mut server, "SHA256SUMS", 1).await;

    let result = publisher(&server)
        .publish(&request(&temp, true))
        .await
        .unwrap();

    assert!(result.replaced);
    assert_eq!(result.assets.len(), 3);
    delete.assert_async().await;
    delete_tag.assert_async().await;
    create.assert_async().await;
}

#[tokio::test]
async fn test_failed_delete_surfaces_as_conflict_on_create() {
    let mut server = mockito::Server::new_async().await;
    let temp = TempDir::new().unwrap();

    let body = release_json(&server);
    server
        .mock("GET", "/repos/o/r/releases/tags/v1.2.0")
        .with_status(200)
        .with_body(body)
        .create_async()
        .await;
    server
        .mock("DELETE", "/repos/o/r/releases/7")
        .with_status(500)
        .with_body(r#"{"message":"Server Error"}"#)
        .create_async()
        .await;
    server
        .mock("POST", "/repos/o/r/releases")
        .with_status(422)
        .with_body(r#"{"message":"Validation Failed"}"#)
        .create_async()
        .await;

    let err = publisher(&server)
        .publish(&request(&temp, true))
        .await
        .unwrap_err();
    assert!(matches!(err, ForgeError::Conflict { .. }));
}

#[tokio::test]
async fn test_rejected_credentials() {
    let mut server = mockito::Server::new_async().await;
    let temp = TempDir::new().unwrap();

    server
        .mock("GET", "/repos/o/r/releases/tags/v1.2.0")
        .with_status(401)
        .with_body(r#"{"message":"Bad credentials"}"#)
        .create_async()
        .await;
    let create = create_mock(&mut server, 0).await;

    let err = publisher(&server)
        .publish(&request(&temp, false))
        .await
        .unwrap_err();

    match err {
        ForgeError::Auth { status, message } => {
            assert_eq!(status, 401);
            assert_eq!(message, "Bad credentials");
        }
        other => panic!("unexpected error {:?}", other),
    }
    create.assert_async().await;
}

#[tokio::test]
async fn test_missing_file_fails_before_any_request() {
    let mut server = mockito::Server::new_async().await;
    let find = server
        .mock("GET", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let req = PublishRequest {
        tag: TAG.to_string(),
        title: TAG.to_string(),
        notes: String::new(),
        files: vec![PathBuf::from("/nonexistent/glomap-Release.tar.gz")],
        overwrite: false,
    };
    assert!(publisher(&server).publish(&req).await.is_err());
    find.assert_async().await;
}

#[tokio::test]
async fn test_tag_with_slash_is_one_path_segment() {
    let mut server = mockito::Server::new_async().await;
    let temp = TempDir::new().unwrap();

    let find = server
        .mock("GET", "/repos/o/r/releases/tags/nightly%2F2024-06")
        .with_status(401)
        .with_body(r#"{"message":"Bad credentials"}"#)
        .expect(1)
        .create_async()
        .await;

    let mut req = request(&temp, false);
    req.tag = "nightly/2024-06".to_string();
    let err = publisher(&server).publish(&req).await.unwrap_err();

    assert!(matches!(err, ForgeError::Auth { status: 401, .. }));
    find.assert_async().await;
}
