use futures::StreamExt;
use keyed_cache::{CachedValue, KeyedStore, RefreshPolicy};
use std::sync::Arc;
use std::time::Duration;

const REFRESH_INTERVAL_SECS: u64 = 5;
const FETCH_DELAY_MS: u64 = 100;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let store = Arc::new(KeyedStore::new(RefreshPolicy::periodic(Duration::from_secs(
        REFRESH_INTERVAL_SECS,
    ))));
    let prices: CachedValue<String, f64, String> =
        CachedValue::new(store.clone(), |symbol: String| async move {
            tokio::time::sleep(Duration::from_millis(FETCH_DELAY_MS)).await;
            if symbol.is_empty() {
                return Err("empty symbol".to_string());
            }
            Ok(symbol.len() as f64 * 10.5)
        });

    println!("Fetching BTC...");
    let btc = prices.get("BTC".to_string()).await?;
    println!("Got: {}", btc);

    println!("Fetching BTC again (should be cached)...");
    let btc = prices.get("BTC".to_string()).await?;
    println!("Got: {}", btc);

    println!("Watching ETH...");
    let mut eth = prices.stream("ETH".to_string(), false);
    if let Some(update) = eth.next().await {
        println!("ETH update: {:?}", update);
    }
    prices.set("ETH".to_string(), 42.0);
    if let Some(update) = eth.next().await {
        println!("ETH update: {:?}", update);
    }

    println!("Cache size: {}", store.len());

    match prices.get(String::new()).await {
        Ok(price) => println!("Unexpected price: {}", price),
        Err(err) => println!("Fetch failed: {}", err),
    }

    prices.remove_all();
    println!("Cache size after clear: {}", store.len());

    Ok(())
}
