//! Basic usage example for s3multipart
//!
//! Reads S3HOST, S3ACCESSKEY, S3SECRETKEY and S3BUCKET from the environment
//! (or a `.env` file), or from the YAML file given as the first argument.
//!
//! Run with:
//! ```
//! cargo run --example basic_usage [config.yaml]
//! ```

use s3multipart::{ObjectClient, S3Error};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("s3multipart=info")),
        )
        .init();

    let path = std::env::args().nth(1);
    let config = s3multipart::config::load_config(path.as_deref())?;
    let client = ObjectClient::from_config(&config)?;

    println!("s3multipart - Basic Usage Example");
    println!("=================================\n");

    // Example 1: Put object
    println!("1. Uploading small object...");
    let etag = client
        .put_object("test/example.txt", "Hello, multipart!")
        .await?;
    println!("   Uploaded with ETag: {}\n", etag);

    // Example 2: Range read
    println!("2. Reading bytes 7..16...");
    let data = client.read("test/example.txt", 7, 9).await?;
    println!("   Content: {}\n", String::from_utf8_lossy(&data));

    // Example 3: Multipart session
    println!("3. Multipart upload (two parts)...");
    let session = client.begin_multipart("test/multipart.bin").await?;
    session.upload_part(1, vec![b'a'; 5 * 1024 * 1024]).await?;
    session.upload_part(2, &b"tail"[..]).await?;
    let completed = session.complete().await?;
    println!("   Completed with ETag: {}\n", completed.etag);

    // Example 4: Chunked uploader
    println!("4. Chunked upload of 20 MiB...");
    let upload = config.upload_config();
    let etag = client
        .upload("test/large.bin", vec![b'a'; 20 * 1024 * 1024], &upload)
        .await?;
    println!("   Uploaded with ETag: {}\n", etag);

    // Example 5: Metadata
    println!("5. Checking metadata...");
    let size = client.get_size("test/large.bin").await?;
    println!("   Size: {} bytes\n", size);

    // Example 6: Cleanup
    println!("6. Removing objects...");
    for key in ["test/example.txt", "test/multipart.bin", "test/large.bin"] {
        client.remove(key).await?;
    }
    match client.exists("test/example.txt").await {
        Err(e) if e.is_not_found() => println!("   Objects removed\n"),
        Err(e) => return Err(e.into()),
        Ok(_) => println!("   Object still present\n"),
    }

    // Example 7: Error handling
    println!("7. Reading a missing object...");
    match client.read("test/missing.txt", 0, 4).await {
        Err(S3Error::NotFound(detail)) => println!("   Not found: {}", detail),
        Err(e) => println!("   Error: {}", e),
        Ok(_) => println!("   Unexpected success"),
    }

    Ok(())
}
