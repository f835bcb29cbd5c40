#[macro_use]
extern crate criterion;
extern crate netcode;

use criterion::black_box;
use criterion::Criterion;
use netcode::bitcodec::{Quaternion, Reader, Writer};

fn write_ranged_uint(c: &mut Criterion) {
    c.bench_function("write u32 ranged", move |b| {
        b.iter(|| {
            let mut w = Writer::new(64);
            for i in 0..16u32 {
                black_box(w.write_u32_ranged(i % 1000, 0, 999));
            }
        })
    });
}

fn read_ranged_uint(c: &mut Criterion) {
    let mut w = Writer::new(64);
    for i in 0..16u32 {
        w.write_u32_ranged(i % 1000, 0, 999);
    }
    let bytes = w.segment().to_vec();

    c.bench_function("read u32 ranged", move |b| {
        b.iter(|| {
            let mut r = Reader::new(&bytes);
            for _ in 0..16 {
                black_box(r.read_u32_ranged(0, 999));
            }
        })
    });
}

fn quaternion_smallest_three(c: &mut Criterion) {
    let q = Quaternion { x: 0.1, y: 0.2, z: 0.3, w: 0.9 };

    c.bench_function("quaternion smallest three roundtrip", move |b| {
        b.iter(|| {
            let mut w = Writer::new(16);
            w.write_quaternion_smallest_three(&q);
            let mut r = Reader::new(w.segment());
            black_box(r.read_quaternion_smallest_three());
        })
    });
}

criterion_group!(benches, write_ranged_uint, read_ranged_uint, quaternion_smallest_three);
criterion_main!(benches);
