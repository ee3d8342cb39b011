use mock_server::{Registry, Stub};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let registry = Registry::new();

    // STUBS points at a JSON array of stubs to preload.
    if let Ok(path) = std::env::var("STUBS") {
        let raw = std::fs::read_to_string(&path)?;
        let stubs: Vec<Stub> = serde_json::from_str(&raw).map_err(std::io::Error::other)?;
        println!("loaded {} stubs from {path}", stubs.len());
        registry.extend(stubs).await;
    }

    let addr = format!("127.0.0.1:{port}");
    let listener = TcpListener::bind(&addr).await?;
    println!("listening on {addr}");
    mock_server::run(listener, registry).await
}
