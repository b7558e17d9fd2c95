//! Fetch a URI through the request pipeline and print what came back.
//!
//! ```
//! cargo run -p kithara-net --example fetch [URI]
//! ```

use std::{env::args, error::Error, sync::Arc, time::Duration};

use kithara_net::{
    EngineOptions, NetEvent, NetResult, NetworkEngine, Request, RequestFilter, RequestType,
    RetryPolicy,
};
use tracing::{info, metadata::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::default()
                .add_directive("kithara_net=debug".parse()?)
                .add_directive(LevelFilter::INFO.into()),
        )
        .with_line_number(false)
        .with_file(false)
        .init();

    let uri = args()
        .nth(1)
        .unwrap_or_else(|| "data:text/plain;base64,SGVsbG8sIGtpdGhhcmEh".to_string());

    let engine = NetworkEngine::new(EngineOptions::default().with_progress(|elapsed, bytes| {
        info!(?elapsed, bytes, "progress");
    }));
    let tag: Arc<dyn RequestFilter> = Arc::new(
        |request_type: RequestType, request: &mut Request| -> NetResult<()> {
            request.headers.insert("x-request-type", request_type.to_string());
            Ok(())
        },
    );
    engine.register_request_filter(tag);

    let mut events = engine.subscribe();
    tokio::spawn(async move {
        while let Ok(NetEvent::Retry { error }) = events.recv().await {
            warn!(?error, "retrying");
        }
    });

    let policy = RetryPolicy::default()
        .with_max_attempts(3)
        .with_timeout(Duration::from_secs(10));
    let response = engine
        .request(RequestType::Segment, Request::new([uri], policy))
        .await?;

    info!(
        uri = %response.uri,
        bytes = response.data.len(),
        time = ?response.time,
        from_cache = response.from_cache,
        "fetched"
    );
    if let Ok(text) = std::str::from_utf8(&response.data) {
        println!("{text}");
    }

    engine.destroy().await;
    Ok(())
}
