//! Integration tests for the S3-compatible backend
//!
//! The mock server plays an S3 endpoint addressed path-style
//! (`/<bucket>/<key>`).

use bucketsync_core::ports::{ObjectRef, StorageBackend};
use wiremock::{
    matchers::{header_exists, method, path, path_regex, query_param},
    Mock, MockServer, ResponseTemplate,
};

use crate::common;

#[tokio::test]
async fn test_put_object_streams_file() {
    let server = MockServer::start().await;
    let backend = common::s3_backend(&server);
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("PUT"))
        .and(path("/bucket/out/report.csv"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let content = b"id,value\n1,42\n";
    let (file, size) = common::local_file(dir.path(), "report.csv", content).await;

    let uploaded = backend
        .put(&ObjectRef::new("bucket", "out/report.csv"), file, size)
        .await
        .expect("upload failed");
    assert_eq!(uploaded, size);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].body, content);
}

#[tokio::test]
async fn test_put_object_access_denied() {
    let server = MockServer::start().await;
    let backend = common::s3_backend(&server);
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(403).set_body_string(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<Error><Code>AccessDenied</Code><Message>Access Denied</Message></Error>"#,
        ))
        .mount(&server)
        .await;

    let (file, size) = common::local_file(dir.path(), "a.txt", b"x").await;
    let err = backend
        .put(&ObjectRef::new("bucket", "a.txt"), file, size)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("AccessDenied"), "{err}");
}

#[tokio::test]
async fn test_get_object_reports_size_and_body() {
    let server = MockServer::start().await;
    let backend = common::s3_backend(&server);

    Mock::given(method("GET"))
        .and(path("/bucket/dl/report.csv"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello".to_vec()))
        .mount(&server)
        .await;

    let reader = backend
        .get(&ObjectRef::new("bucket", "dl/report.csv"))
        .await
        .expect("download failed");
    assert_eq!(reader.size, 5);
    assert_eq!(common::read_body(reader).await, b"hello");
}

#[tokio::test]
async fn test_exists_distinguishes_missing_objects() {
    let server = MockServer::start().await;
    let backend = common::s3_backend(&server);

    Mock::given(method("HEAD"))
        .and(path("/bucket/present"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-length", "3"))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/bucket/absent"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    assert!(backend.exists(&ObjectRef::new("bucket", "present")).await.unwrap());
    assert!(!backend.exists(&ObjectRef::new("bucket", "absent")).await.unwrap());
}

#[tokio::test]
async fn test_list_objects_v2() {
    let server = MockServer::start().await;
    let backend = common::s3_backend(&server);

    let listing = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>bucket</Name>
  <Prefix>out/</Prefix>
  <KeyCount>2</KeyCount>
  <MaxKeys>1000</MaxKeys>
  <IsTruncated>false</IsTruncated>
  <Contents><Key>out/a.csv</Key><Size>3</Size></Contents>
  <Contents><Key>out/b.csv</Key><Size>4</Size></Contents>
</ListBucketResult>"#;

    Mock::given(method("GET"))
        .and(path_regex("^/bucket/?$"))
        .and(query_param("list-type", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing))
        .mount(&server)
        .await;

    let keys = backend.list("bucket", "out/").await.expect("list failed");
    assert_eq!(keys, vec!["out/a.csv", "out/b.csv"]);
}
