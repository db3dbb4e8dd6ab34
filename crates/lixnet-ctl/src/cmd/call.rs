//! `call` and `ping` commands.

use anyhow::{anyhow, Context, Result};
use serde_json::Value;

use super::http::{client, describe};

pub async fn cmd_call(port: u16, event: &str, input: &str) -> Result<()> {
    let input: Value = serde_json::from_str(input)
        .with_context(|| format!("input is not valid JSON: {}", input))?;

    let data = client(port)
        .call_value(event, input)
        .await
        .map_err(|e| anyhow!(describe(&e)))?;

    println!("{}", serde_json::to_string_pretty(&data)?);
    Ok(())
}

pub async fn cmd_ping(port: u16) -> Result<()> {
    let started = std::time::Instant::now();
    let reply: String = client(port)
        .call("ping", &serde_json::json!({}))
        .await
        .map_err(|e| anyhow!(describe(&e)))?;

    println!("{} from 127.0.0.1:{} in {} ms", reply, port, started.elapsed().as_millis());
    Ok(())
}
