use std::net::SocketAddr;
use std::time::Duration;

use loadr_testserver::{CatalogBehavior, TestServerStats, router};
use tokio::net::TcpListener;

fn next_value<T>(args: &mut impl Iterator<Item = String>, flag: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = args
        .next()
        .ok_or_else(|| anyhow::anyhow!("{flag} requires a value"))?;
    Ok(raw.parse()?)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let mut bind_addr: SocketAddr = "127.0.0.1:0".parse()?;
    let mut behavior = CatalogBehavior::default();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--bind" => bind_addr = next_value(&mut args, "--bind")?,
            "--latency-ms" => {
                behavior.latency = Duration::from_millis(next_value(&mut args, "--latency-ms")?);
            }
            "--fail-every" => behavior.fail_every = Some(next_value(&mut args, "--fail-every")?),
            "-h" | "--help" => {
                eprintln!(
                    "loadr-testserver\n\nUSAGE:\n  loadr-testserver [--bind 127.0.0.1:0] [--latency-ms N] [--fail-every N]\n\nOUTPUT:\n  Prints HTTP_URL=<url> to stdout once ready."
                );
                return Ok(());
            }
            other => {
                return Err(anyhow::anyhow!("unknown argument: {other}"));
            }
        }
    }

    let listener = TcpListener::bind(bind_addr).await?;
    let addr = listener.local_addr()?;

    let app = router(TestServerStats::default(), behavior);

    println!("HTTP_URL=http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
