//! Tests for DriveClient and CredentialStore with mocked HTTP responses.

use std::path::Path;
use std::sync::Arc;

use mockito::{Matcher, Server};
use serde_json::json;
use tempfile::TempDir;
use video_drive::models::{Credential, FileListResponse, FileMetadata};
use video_drive::{CredentialStore, DriveClient};

/// Write a cached credential pointing its token endpoint at `token_uri`.
fn write_credential(dir: &Path, token_uri: &str, expires_at: Option<u64>) -> std::path::PathBuf {
    let credential = Credential {
        access_token: "cached-token".to_string(),
        refresh_token: Some("refresh-token".to_string()),
        expires_at,
        scopes: vec!["https://www.googleapis.com/auth/drive.file".to_string()],
        client_id: "cid".to_string(),
        client_secret: "secret".to_string(),
        token_uri: token_uri.to_string(),
    };
    let path = dir.join("token.json");
    std::fs::write(&path, serde_json::to_vec(&credential).unwrap()).unwrap();
    path
}

fn client_for(server: &Server, dir: &TempDir) -> DriveClient {
    let cache = write_credential(dir.path(), &format!("{}/token", server.url()), None);
    let store = Arc::new(CredentialStore::new(cache, None));
    DriveClient::new(store)
        .unwrap()
        .with_endpoints(server.url(), format!("{}/upload", server.url()))
}

mod models {
    use super::*;

    #[test]
    fn test_file_metadata_deserialization() {
        let json = json!({
            "id": "file123",
            "name": "abc.mp4",
            "mimeType": "video/mp4",
            "webViewLink": "https://drive.google.com/file/d/file123/view",
            "size": "2048"
        });

        let metadata: FileMetadata = serde_json::from_value(json).unwrap();

        assert_eq!(metadata.id, "file123");
        assert_eq!(metadata.name, "abc.mp4");
        assert_eq!(metadata.mime_type, Some("video/mp4".to_string()));
        assert_eq!(metadata.size, Some(2048));
        assert_eq!(metadata.public_link(), "https://drive.google.com/file/d/file123/view");
    }

    #[test]
    fn test_folder_create_response_has_only_id() {
        let metadata: FileMetadata = serde_json::from_value(json!({ "id": "folder123" })).unwrap();

        assert_eq!(metadata.id, "folder123");
        assert!(metadata.name.is_empty());
        assert_eq!(metadata.size, None);
    }

    #[test]
    fn test_file_list_response_empty() {
        let response: FileListResponse = serde_json::from_value(json!({ "files": [] })).unwrap();

        assert!(response.files.is_empty());
        assert!(response.next_page_token.is_none());
    }
}

mod credentials {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};
    use video_drive::DriveError;

    fn now() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
    }

    #[tokio::test]
    async fn test_valid_cache_is_returned_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let cache = write_credential(dir.path(), "http://127.0.0.1:9/token", Some(now() + 3600));
        let store = CredentialStore::new(&cache, None);

        let credential = store.get_credential().await.unwrap();
        assert_eq!(credential.access_token, "cached-token");
    }

    #[tokio::test]
    async fn test_expired_credential_is_refreshed_and_persisted() {
        let mut server = Server::new_async().await;
        let refresh = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "refresh-token".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "access_token": "fresh-token", "expires_in": 3599 }).to_string())
            .expect(1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache = write_credential(dir.path(), &format!("{}/token", server.url()), Some(now() - 10));
        let store = CredentialStore::new(&cache, None);

        assert_eq!(store.access_token().await.unwrap(), "fresh-token");
        // Second call uses the refreshed in-memory credential.
        assert_eq!(store.access_token().await.unwrap(), "fresh-token");
        refresh.assert_async().await;

        let persisted: Credential =
            serde_json::from_slice(&std::fs::read(&cache).unwrap()).unwrap();
        assert_eq!(persisted.access_token, "fresh-token");
        assert_eq!(persisted.refresh_token.as_deref(), Some("refresh-token"));
        assert!(persisted.expires_at.unwrap() > now());
    }

    #[tokio::test]
    async fn test_failed_refresh_falls_through_to_bootstrap() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error": "invalid_grant"}"#)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache = write_credential(dir.path(), &format!("{}/token", server.url()), Some(now() - 10));
        let store = CredentialStore::new(&cache, None);

        let err = store.get_credential().await.unwrap_err();
        assert!(matches!(err, DriveError::MissingBootstrapSecret));
    }

    #[tokio::test]
    async fn test_corrupt_cache_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("token.json");
        std::fs::write(&cache, b"not valid json").unwrap();
        let store = CredentialStore::new(&cache, None);

        let err = store.get_credential().await.unwrap_err();
        assert!(matches!(err, DriveError::MissingBootstrapSecret));
    }
}

mod folders {
    use super::*;

    #[tokio::test]
    async fn test_existing_folder_is_reused() {
        let mut server = Server::new_async().await;
        let list = server
            .mock("GET", "/files")
            .match_query(Matcher::UrlEncoded(
                "q".into(),
                "name = 'YouTubeSong' and mimeType = 'application/vnd.google-apps.folder' and trashed = false".into(),
            ))
            .match_header("authorization", "Bearer cached-token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "files": [{ "id": "folder1", "name": "YouTubeSong" }] }).to_string())
            .expect(2)
            .create_async()
            .await;
        let create = server
            .mock("POST", "/files")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = client_for(&server, &dir);

        let first = client.resolve_folder("YouTubeSong").await.unwrap();
        let second = client.resolve_folder("YouTubeSong").await.unwrap();
        assert_eq!(first.id, "folder1");
        assert_eq!(first, second);

        list.assert_async().await;
        create.assert_async().await;
    }

    #[tokio::test]
    async fn test_missing_folder_is_created() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/files")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "files": [] }).to_string())
            .create_async()
            .await;
        let create = server
            .mock("POST", "/files")
            .match_query(Matcher::Any)
            .match_body(Matcher::Json(json!({
                "name": "YouTubeSong",
                "mimeType": "application/vnd.google-apps.folder"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "id": "new-folder" }).to_string())
            .expect(1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = client_for(&server, &dir);

        let folder = client.resolve_folder("YouTubeSong").await.unwrap();
        assert_eq!(folder.id, "new-folder");
        assert_eq!(folder.name, "YouTubeSong");
        create.assert_async().await;
    }

    #[tokio::test]
    async fn test_listing_follows_next_page_token() {
        let mut server = Server::new_async().await;
        let second_page = server
            .mock("GET", "/files")
            .match_query(Matcher::UrlEncoded("pageToken".into(), "page-2".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "files": [{ "id": "folder2", "name": "YouTubeSong" }] }).to_string())
            .expect(1)
            .create_async()
            .await;
        // The first request carries no pageToken, so `fields` is the last parameter.
        let first_page = server
            .mock("GET", "/files")
            .match_query(Matcher::Regex("fields=[^&]*$".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "files": [{ "id": "folder1", "name": "YouTubeSong" }],
                    "nextPageToken": "page-2"
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = client_for(&server, &dir);

        let files = client.query_files("trashed = false").await.unwrap();
        let ids: Vec<&str> = files.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, ["folder1", "folder2"]);

        first_page.assert_async().await;
        second_page.assert_async().await;
    }

    #[tokio::test]
    async fn test_api_error_envelope_is_surfaced() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/files")
            .match_query(Matcher::Any)
            .with_status(403)
            .with_header("content-type", "application/json")
            .with_body(json!({ "error": { "code": 403, "message": "Insufficient Permission" } }).to_string())
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = client_for(&server, &dir);

        let err = client.resolve_folder("YouTubeSong").await.unwrap_err();
        let display = err.to_string();
        assert!(display.contains("403"));
        assert!(display.contains("Insufficient Permission"));
    }
}

mod uploads {
    use super::*;

    const FILE_SIZE: usize = 300_000;

    #[tokio::test]
    async fn test_chunked_resumable_upload() {
        let mut server = Server::new_async().await;
        let session_url = format!("{}/session/xyz", server.url());

        let init = server
            .mock("POST", "/upload/files")
            .match_query(Matcher::UrlEncoded("uploadType".into(), "resumable".into()))
            .match_header("x-upload-content-type", "video/mp4")
            .match_header("x-upload-content-length", "300000")
            .match_body(Matcher::Json(json!({ "name": "abc.mp4", "parents": ["folder1"] })))
            .with_status(200)
            .with_header("location", &session_url)
            .create_async()
            .await;
        let first = server
            .mock("PUT", "/session/xyz")
            .match_header("content-range", "bytes 0-262143/300000")
            .with_status(308)
            .with_header("range", "bytes=0-262143")
            .expect(1)
            .create_async()
            .await;
        let last = server
            .mock("PUT", "/session/xyz")
            .match_header("content-range", "bytes 262144-299999/300000")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "id": "abc_id",
                    "name": "abc.mp4",
                    "mimeType": "video/mp4",
                    "webViewLink": "https://drive.google.com/file/d/abc_id/view"
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.mp4");
        std::fs::write(&path, vec![7u8; FILE_SIZE]).unwrap();
        let client = client_for(&server, &dir).with_chunk_size(256 * 1024);

        let mut progress = Vec::new();
        let metadata = client
            .upload_file(&path, "folder1", |p| progress.push(p))
            .await
            .unwrap();

        assert_eq!(metadata.id, "abc_id");
        assert_eq!(metadata.public_link(), "https://drive.google.com/file/d/abc_id/view");
        assert_eq!(progress.len(), 2);
        assert!((progress[0] - 262144.0 / 300000.0).abs() < 1e-9);
        assert_eq!(progress[1], 1.0);
        assert!(progress.iter().all(|p| (0.0..=1.0).contains(p)));

        init.assert_async().await;
        first.assert_async().await;
        last.assert_async().await;
    }

    async fn open_session(server: &mut Server, size: &str) -> mockito::Mock {
        let session_url = format!("{}/session/xyz", server.url());
        server
            .mock("POST", "/upload/files")
            .match_query(Matcher::Any)
            .match_header("x-upload-content-length", size)
            .with_status(200)
            .with_header("location", &session_url)
            .create_async()
            .await
    }

    fn uploaded_body() -> String {
        json!({ "id": "abc_id", "name": "abc.mp4" }).to_string()
    }

    #[tokio::test]
    async fn test_fully_committed_upload_is_finalized() {
        let mut server = Server::new_async().await;
        let _init = open_session(&mut server, "5").await;
        let data = server
            .mock("PUT", "/session/xyz")
            .match_header("content-range", "bytes 0-4/5")
            .with_status(308)
            .with_header("range", "bytes=0-4")
            .expect(1)
            .create_async()
            .await;
        let finalize = server
            .mock("PUT", "/session/xyz")
            .match_header("content-range", "bytes */5")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(uploaded_body())
            .expect(1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.mp4");
        std::fs::write(&path, b"video").unwrap();
        let client = client_for(&server, &dir);

        let metadata = client.upload_file(&path, "folder1", |_| {}).await.unwrap();
        assert_eq!(metadata.id, "abc_id");

        data.assert_async().await;
        finalize.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_file_is_finalized_without_data() {
        let mut server = Server::new_async().await;
        let _init = open_session(&mut server, "0").await;
        let finalize = server
            .mock("PUT", "/session/xyz")
            .match_header("content-range", "bytes */0")
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(uploaded_body())
            .expect(1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.mp4");
        std::fs::write(&path, b"").unwrap();
        let client = client_for(&server, &dir);

        let mut progress = Vec::new();
        let metadata = client
            .upload_file(&path, "folder1", |p| progress.push(p))
            .await
            .unwrap();

        assert_eq!(metadata.id, "abc_id");
        assert_eq!(progress, [1.0]);
        finalize.assert_async().await;
    }

    #[tokio::test]
    async fn test_upload_without_progress_is_abandoned() {
        let mut server = Server::new_async().await;
        let _init = open_session(&mut server, "300000").await;
        let stalled = server
            .mock("PUT", "/session/xyz")
            .match_header("content-range", "bytes 0-262143/300000")
            .with_status(308)
            .expect(3)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.mp4");
        std::fs::write(&path, vec![7u8; FILE_SIZE]).unwrap();
        let client = client_for(&server, &dir).with_chunk_size(256 * 1024);

        let err = client.upload_file(&path, "folder1", |_| {}).await.unwrap_err();
        match err {
            video_drive::DriveError::ApiError { status, message } => {
                assert_eq!(status, 308);
                assert!(message.contains("stalled"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        stalled.assert_async().await;
    }

    #[tokio::test]
    async fn test_missing_session_url() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/upload/files")
            .match_query(Matcher::Any)
            .with_status(200)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.mp4");
        std::fs::write(&path, b"video").unwrap();
        let client = client_for(&server, &dir);

        let err = client.upload_file(&path, "folder1", |_| {}).await.unwrap_err();
        assert!(matches!(err, video_drive::DriveError::MissingUploadUrl));
    }

    #[tokio::test]
    async fn test_missing_local_file() {
        let server = Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        let client = client_for(&server, &dir);

        let err = client
            .upload_file(dir.path().join("gone.mp4"), "folder1", |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, video_drive::DriveError::IoError(_)));
    }
}

mod permissions {
    use super::*;

    #[tokio::test]
    async fn test_make_public_grants_anyone_reader() {
        let mut server = Server::new_async().await;
        let grant = server
            .mock("POST", "/files/abc_id/permissions")
            .match_body(Matcher::Json(json!({ "role": "reader", "type": "anyone" })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "id": "anyoneWithLink", "role": "reader", "type": "anyone" }).to_string())
            .expect(1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = client_for(&server, &dir);

        client.make_public("abc_id").await.unwrap();
        grant.assert_async().await;
    }

    #[tokio::test]
    async fn test_make_public_failure() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/files/abc_id/permissions")
            .with_status(500)
            .with_body("backend error")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = client_for(&server, &dir);

        let err = client.make_public("abc_id").await.unwrap_err();
        assert!(err.to_string().contains("backend error"));
    }
}
