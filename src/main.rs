use thread_handler::{PoolConfig, RunOptions, ThreadHandler};
use tokio::runtime::Builder;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use std::time::Instant;


fn even_only(n: &u32) -> Result<bool, String> {
    if n % 2 == 1 {
        return Err(format!("{} is odd", n));
    }
    Ok(true)
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "thread_handler=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rt = Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();

    rt.block_on(async {
        let now = Instant::now();
        let config = PoolConfig::default()
            .with_worker_count(2)
            .with_fail_silently(true);
        let mut handler = ThreadHandler::with_config(even_only, 0..10u32, config).unwrap();

        let results = handler.run().await.unwrap();
        println!("results: {:?}", results);
        for failure in handler.failures() {
            println!("  failed #{} ({}): {}", failure.index, failure.item, failure.error);
        }

        let by_four = handler
            .run_with(
                RunOptions::new()
                    .processor(|n: &u32| Ok::<_, String>(n % 4 == 0))
                    .items(vec![4u32, 8, 15])
                    .worker_count(5),
            )
            .await
            .unwrap();
        println!("override: {:?}, metrics: {:?}", by_four, handler.metrics());
        println!("elapsed: {:?}", now.elapsed());
    });
}
