use std::time::Duration;

use retryable_httpclient::{policies, Client, ClientOptions, Context, Method, Request};
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
struct NewUser<'a> {
    name: &'a str,
}

#[derive(Debug, Deserialize)]
struct Echo {
    json: Option<serde_json::Value>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let base = std::env::var("HTTPBIN_URL").unwrap_or_else(|_| "http://localhost:8080".into());
    let options = ClientOptions::from_env()?;

    let client = Client::builder()
        .options(options)
        .max_retries(3)
        .retry_wait_min(Duration::from_millis(100))
        .retry_wait_max(Duration::from_secs(2))
        .check_retry_policy(policies::retry_on_eof)
        .request_dump_logger(
            |dump: &[u8]| eprintln!("{}", String::from_utf8_lossy(dump)),
            true,
        )
        .build()?;

    let ctx = Context::background().with_timeout(Duration::from_secs(10));
    let request = Request::json(
        ctx,
        Method::POST,
        &format!("{base}/post"),
        &NewUser { name: "Kit" },
    )?;

    match client.send_request_and_decode::<Echo>(&request).await {
        Ok((response, echo)) => println!("{} {:?}", response.status(), echo.json),
        Err(err) => eprintln!("{err} (status {})", err.status_code()),
    }

    Ok(())
}
