use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::Client as AwsS3SdkClient;
use bytes::Bytes;
use common_s3::{S3Client, S3Error, S3Impl, MIN_PART_SIZE};
use futures::stream::{self, StreamExt};

const TEST_BUCKET: &str = "test-bucket";
const S3_ENDPOINT: &str = "http://127.0.0.1:19000"; // MinIO

async fn create_test_s3_client() -> (S3Impl, AwsS3SdkClient) {
    let config = aws_config::defaults(BehaviorVersion::latest())
        .endpoint_url(S3_ENDPOINT)
        .region(Region::new("us-east-1"))
        .credentials_provider(aws_sdk_s3::config::Credentials::new(
            "object_storage_root_user",
            "object_storage_root_password",
            None,
            None,
            "test",
        ))
        .load()
        .await;

    let s3_config = aws_sdk_s3::config::Builder::from(&config)
        .force_path_style(true)
        .build();
    let aws_client = AwsS3SdkClient::from_conf(s3_config);
    let s3_impl = S3Impl::new(aws_client.clone());
    (s3_impl, aws_client)
}

async fn ensure_bucket_exists(client: &AwsS3SdkClient) {
    // Creation fails if the bucket already exists, which is fine here
    if let Err(e) = client.create_bucket().bucket(TEST_BUCKET).send().await {
        tracing::debug!("create_bucket: {e}");
    }
}

#[tokio::test]
#[ignore = "requires MinIO on 127.0.0.1:19000"]
async fn test_s3_round_trip_put_get_delete() {
    let (s3_client, aws_client) = create_test_s3_client().await;
    ensure_bucket_exists(&aws_client).await;

    let test_key = "test/round-trip.svg";
    let body = Bytes::from_static(b"<svg xmlns=\"http://www.w3.org/2000/svg\"/>");

    s3_client
        .put_object(TEST_BUCKET, test_key, body.clone(), "image/svg+xml")
        .await
        .expect("Failed to put test object");

    let fetched = s3_client.get_object(TEST_BUCKET, test_key).await;
    assert_eq!(fetched.unwrap(), body);

    assert!(s3_client.delete_object(TEST_BUCKET, test_key).await.is_ok());
    assert!(matches!(
        s3_client.get_object(TEST_BUCKET, test_key).await,
        Err(S3Error::NotFound(_))
    ));
}

#[tokio::test]
#[ignore = "requires MinIO on 127.0.0.1:19000"]
async fn test_s3_delete_missing_is_not_found() {
    let (s3_client, aws_client) = create_test_s3_client().await;
    ensure_bucket_exists(&aws_client).await;

    let result = s3_client
        .delete_object(TEST_BUCKET, "test/never-written.svg")
        .await;

    assert!(matches!(result, Err(S3Error::NotFound(_))));
}

#[tokio::test]
#[ignore = "requires MinIO on 127.0.0.1:19000"]
async fn test_s3_upload_stream_multipart() {
    let (s3_client, aws_client) = create_test_s3_client().await;
    ensure_bucket_exists(&aws_client).await;

    let test_key = "test/streamed.bin";
    // Two full parts plus a short tail
    let chunk = Bytes::from(vec![7u8; MIN_PART_SIZE / 4]);
    let chunks: Vec<Result<Bytes, std::io::Error>> = (0..9).map(|_| Ok(chunk.clone())).collect();
    let expected = (chunk.len() * 9) as u64;

    let written = s3_client
        .upload_stream(
            TEST_BUCKET,
            test_key,
            "application/octet-stream",
            stream::iter(chunks).boxed(),
        )
        .await
        .expect("streamed upload failed");

    assert_eq!(written, Some(expected));
    let fetched = s3_client.get_object(TEST_BUCKET, test_key).await.unwrap();
    assert_eq!(fetched.len() as u64, expected);

    assert!(s3_client.delete_object(TEST_BUCKET, test_key).await.is_ok());
}
