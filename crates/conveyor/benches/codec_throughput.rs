//! Order codec throughput.
//!
//! Measures the per-file CPU path of the ingester: decode, validate and
//! canonical re-encode.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rand::Rng;

use conveyor::order;

/// Order documents with a mix of optional fields present and absent.
fn generate_orders(count: usize) -> Vec<Vec<u8>> {
    let mut rng = rand::rng();
    let products = ["Widget", "Gadget", "Sprocket"];

    (0..count)
        .map(|i| {
            let amount: f64 = rng.random_range(0.01..5000.0);
            let doc = if rng.random_bool(0.8) {
                let product = products[rng.random_range(0..products.len())];
                format!(
                    r#"{{"orderId":"O{i}","customerId":"C{}","product":"{product}","amount":{amount:.2},"status":"CREATED"}}"#,
                    i % 97
                )
            } else {
                format!(r#"{{"orderId":"O{i}","customerId":"C{}","amount":{amount:.2}}}"#, i % 97)
            };
            doc.into_bytes()
        })
        .collect()
}

fn decode_validate_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("order_codec");

    for count in [1_000, 10_000] {
        let docs = generate_orders(count);
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::new("decode", count), &docs, |b, docs| {
            b.iter(|| {
                docs.iter()
                    .filter(|doc| order::decode(doc).is_ok())
                    .count()
            });
        });

        group.bench_with_input(
            BenchmarkId::new("decode_validate_encode", count),
            &docs,
            |b, docs| {
                b.iter(|| {
                    let mut bytes = 0usize;
                    for doc in docs {
                        let decoded = order::decode(doc).unwrap();
                        order::validate(&decoded).unwrap();
                        bytes += order::encode(&decoded).unwrap().len();
                    }
                    bytes
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, decode_validate_encode);
criterion_main!(benches);
