use criterion::{black_box, criterion_group, criterion_main, Criterion};
use queue_ops::{BlobRecord, BlobsQueue, Tensor};
use std::sync::Arc;
use std::thread;

fn mk_record(seq: usize) -> BlobRecord {
    BlobRecord::new(vec![
        Tensor::from_shape_vec(&[16], vec![seq as f32; 16]).unwrap(),
        Tensor::scalar(seq as f32),
    ])
}

fn bench_single_thread(c: &mut Criterion) {
    let queue = BlobsQueue::new("bench-st", 1024, 2).unwrap();
    c.bench_function("enqueue+dequeue single thread", |b| {
        b.iter(|| {
            queue.enqueue(mk_record(1)).unwrap();
            black_box(queue.dequeue());
        })
    });
}

fn bench_producer_consumer(c: &mut Criterion) {
    c.bench_function("1 producer / 1 consumer, 1000 records, capacity 8", |b| {
        b.iter(|| {
            let queue = Arc::new(BlobsQueue::new("bench-pc", 8, 2).unwrap());
            let producer = {
                let queue = queue.clone();
                thread::spawn(move || {
                    for seq in 0..1000 {
                        queue.enqueue(mk_record(seq)).unwrap();
                    }
                    queue.close();
                })
            };
            let mut n = 0;
            while let Some(record) = queue.dequeue() {
                black_box(record);
                n += 1;
            }
            producer.join().unwrap();
            black_box(n);
        })
    });
}

criterion_group!(benches, bench_single_thread, bench_producer_consumer);
criterion_main!(benches);
