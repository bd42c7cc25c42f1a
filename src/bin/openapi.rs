use anyhow::Result;

// Print the OpenAPI document, e.g. `cargo run --bin openapi > openapi.json`.
fn main() -> Result<()> {
    let doc = salesdesk::api::openapi();
    let json = serde_json::to_string_pretty(&doc)?;
    println!("{json}");
    Ok(())
}
