use bytes::BytesMut;
use cinderkv::protocol::parse_requests;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_parse_requests(c: &mut Criterion) {
    let mut group = c.benchmark_group("protocol");
    group.bench_function("parse_requests_1k", |b| {
        let mut template = BytesMut::new();
        for i in 0..1000 {
            template.extend_from_slice(format!("SET key{i} val{i}\r\n").as_bytes());
        }
        b.iter(|| {
            let mut buf = template.clone();
            let reqs = parse_requests(&mut buf);
            black_box(reqs.len());
        });
    });
    group.finish();
}

criterion_group!(benches, bench_parse_requests);
criterion_main!(benches);
