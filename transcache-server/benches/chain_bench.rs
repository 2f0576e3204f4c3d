use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use std::sync::Arc;
use transcache::{Cache, CacheConfig, Chain, LayerRef, LruStorage, MemoryStorage};

fn two_layer_chain(rt: &tokio::runtime::Runtime, config: CacheConfig) -> Chain<String, Vec<u8>> {
    rt.block_on(async {
        let layers: Vec<LayerRef<String, Vec<u8>>> = vec![
            Arc::new(Cache::<String, Vec<u8>>::new(
                "l1",
                Arc::new(LruStorage::<String, Vec<u8>>::new(10_000)),
                config.clone(),
            )),
            Arc::new(Cache::<String, Vec<u8>>::new(
                "l2",
                Arc::new(MemoryStorage::<String, Vec<u8>>::new()),
                config,
            )),
        ];
        Chain::assemble(layers).await.unwrap()
    })
}

fn bench_chain_set(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let chain = two_layer_chain(&rt, CacheConfig::default());

    c.bench_function("chain_set", |b| {
        let mut i = 0u64;
        b.to_async(&rt).iter(|| {
            i += 1;
            let key = format!("key_{}", i % 1000);
            let chain = &chain;
            async move {
                chain
                    .set(black_box(key), black_box(b"test_value".to_vec()))
                    .await
                    .unwrap();
            }
        });
    });
}

fn bench_chain_get_hit(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let chain = two_layer_chain(&rt, CacheConfig::default());

    rt.block_on(async {
        chain
            .set("test_key".to_string(), b"test_value".to_vec())
            .await
            .unwrap();
    });

    c.bench_function("chain_get_hit", |b| {
        b.to_async(&rt).iter(|| async {
            let key = black_box("test_key".to_string());
            chain.get(&key).await.unwrap();
        });
    });
}

fn bench_chain_sync(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("chain_sync");

    for buffer_limit in [5, 50, 500] {
        let chain = two_layer_chain(
            &rt,
            CacheConfig {
                buffer_limit,
                ..CacheConfig::default()
            },
        );

        group.bench_with_input(
            BenchmarkId::from_parameter(buffer_limit),
            &buffer_limit,
            |b, &limit| {
                b.to_async(&rt).iter(|| async {
                    for i in 0..limit {
                        chain.set(format!("key_{}", i), vec![0u8; 64]).await.unwrap();
                    }
                    chain.sync().await.unwrap();
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_chain_set, bench_chain_get_hit, bench_chain_sync);
criterion_main!(benches);
