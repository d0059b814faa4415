//! Serves a counter, a static page, and a small dataset until Enter is pressed.
//!
//! ```text
//! RUST_LOG=rttp_provide=debug cargo run --example serve_counter
//! ```

use std::io::BufRead;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use rttp_provide::data::{DataServer, Format, JsonRecords};
use rttp_provide::{Context, NewResource, Provider, Response, StatusCode};
use serde_json::json;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let provider = Provider::builder()
        .routes(|router| {
            router.get("/", |_ctx: Context| async {
                Response::new(StatusCode::Ok)
                    .header("Content-Type", "text/html")
                    .body("<h1>rttp-provide</h1>")
            });
        })
        .build();

    let hits = Arc::new(AtomicU64::new(0));
    let counter = provider.create(NewResource::new().extension("txt").handler({
        let hits = Arc::clone(&hits);
        move || format!("{}\n", hits.fetch_add(1, Ordering::Relaxed) + 1)
    }))?;
    let greeting = provider.create(NewResource::new().content("hello world").route("hello.txt"))?;

    println!("index:    {}/", provider.url()?);
    println!("counter:  {}", counter.url()?);
    println!("greeting: {}", greeting.url()?);

    let data = DataServer::new(JsonRecords);
    let rows = json!([
        {"day": "mon", "visits": 12},
        {"day": "tue", "visits": 17},
        {"day": "wed", "visits": 9},
    ]);
    println!("dataset:  {}", serde_json::to_string(&data.serve_data(&rows, Format::Csv, None)?)?);

    println!("press Enter to stop");
    std::io::stdin().lock().read_line(&mut String::new())?;

    data.reset();
    provider.stop();
    println!("served the counter {} times", hits.load(Ordering::Relaxed));
    Ok(())
}
