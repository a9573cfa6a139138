use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sectionwire::{decode_sections, frame_channel, SectionEncoder};
use serde_json::json;

async fn round_trip(element_count: usize) -> usize {
    let (tx, rx) = frame_channel();
    let producer = tokio::spawn(async move {
        let mut enc = SectionEncoder::new(tx);
        enc.object_section("meta", &[], &json!({"total": element_count}))
            .await?;
        enc.start_map_section("rows", &["classifier", "2"]).await?;
        for i in 0..element_count {
            enc.send_element(&format!("id{}", i), &json!({"fld": i}))
                .await?;
        }
        Ok::<(), sectionwire::CodecError>(())
    });

    let mut stream = decode_sections(rx);
    let mut bytes = 0;
    while let Some(mut section) = stream.next().await {
        if let Some(map) = section.as_map() {
            while let Some((_, value)) = map.next().await {
                bytes += value.len();
            }
        } else if let Some(value) = section.as_object().and_then(|o| o.value()) {
            bytes += value.len();
        }
    }
    stream.finish().await.unwrap();
    producer.await.unwrap().unwrap();
    bytes
}

fn bench_round_trip(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("round_trip");

    for element_count in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*element_count as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(element_count),
            element_count,
            |b, &n| {
                b.to_async(&rt).iter(|| async move { black_box(round_trip(n).await) });
            },
        );
    }
    group.finish();
}

fn bench_to_json(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("to_json_100_elements", |b| {
        b.to_async(&rt).iter(|| async {
            let (tx, rx) = frame_channel();
            let producer = tokio::spawn(async move {
                let mut enc = SectionEncoder::new(tx);
                enc.start_array_section("items", &["catalog"]).await?;
                for i in 0..100 {
                    enc.send_element("", &i).await?;
                }
                Ok::<(), sectionwire::CodecError>(())
            });
            let mut stream = decode_sections(rx);
            while let Some(mut section) = stream.next().await {
                black_box(section.to_json().await.unwrap());
            }
            stream.finish().await.unwrap();
            producer.await.unwrap().unwrap();
        });
    });
}

criterion_group!(benches, bench_round_trip, bench_to_json);
criterion_main!(benches);
