//! Round trip against a real S3-compatible service.
//!
//! Needs S3HOST, S3ACCESSKEY, S3SECRETKEY and S3BUCKET (a `.env` file works).
//! Run with:
//! ```
//! cargo test --test live_test -- --ignored
//! ```

use s3multipart::s3::{CompletedPart, ObjectClient, S3Error};

const CHUNK_SIZE: usize = 6 * 1024 * 1024;

fn live_client() -> ObjectClient {
    let config = s3multipart::config::load_from_env().expect("S3HOST and credentials must be set");
    ObjectClient::from_config(&config).expect("failed to build client")
}

#[tokio::test]
#[ignore]
async fn test_live_round_trip() {
    let client = live_client();
    let key = format!("s3multipart-live-{}", chrono::Utc::now().timestamp_millis());
    let content = vec![b'a'; 20 * 1024 * 1024];

    assert!(client.exists(&key).await.unwrap_err().is_not_found());

    let upload_id = client.initiate_multipart_upload(&key).await.unwrap();
    let mut parts = Vec::new();
    for (index, chunk) in content.chunks(CHUNK_SIZE).enumerate() {
        let part = client
            .upload_part(&key, &upload_id, index as u32 + 1, chunk.to_vec())
            .await
            .unwrap();
        parts.push(CompletedPart::from(&part));
    }
    client
        .complete_multipart_upload(&key, &upload_id, &parts)
        .await
        .unwrap();

    assert_eq!(
        client.get_etag(&key).await.unwrap(),
        "\"152d89daa625b7d0efd72818d33e2894-4\""
    );
    assert_eq!(client.get_size(&key).await.unwrap(), content.len() as u64);
    assert_eq!(&client.read(&key, 5, 4).await.unwrap()[..], b"aaaa");

    let err = client
        .read(&key, content.len() as u64, 4)
        .await
        .unwrap_err();
    assert!(matches!(err, S3Error::Range(_)));

    assert!(client.remove(&key).await.unwrap());
    assert!(client.exists(&key).await.unwrap_err().is_not_found());
}

#[tokio::test]
#[ignore]
async fn test_live_abort() {
    let client = live_client();
    let key = format!("s3multipart-abort-{}", chrono::Utc::now().timestamp_millis());

    let session = client.begin_multipart(&key).await.unwrap();
    let part = session.upload_part(1, vec![b'a'; CHUNK_SIZE]).await.unwrap();
    session.abort().await.unwrap();

    let err = client
        .upload_part(&key, session.upload_id(), 2, vec![b'a'; CHUNK_SIZE])
        .await
        .unwrap_err();
    assert!(matches!(err, S3Error::Conflict(_)), "{err}");

    let err = client
        .complete_multipart_upload(&key, session.upload_id(), &[CompletedPart::from(&part)])
        .await
        .unwrap_err();
    assert!(matches!(err, S3Error::Conflict(_)), "{err}");
}
