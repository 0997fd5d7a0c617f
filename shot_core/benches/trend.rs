use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use shot_core::trend::ols;
use shot_core::{Sample, SampleBuffer, ShotLimits, TrendCfg, TrendEstimator};

// Bloom then steady flow, with xorshift noise on the readings
fn synth_shot(n: usize, noise_amp: f32, seed: u32) -> Vec<Sample> {
    let mut state = seed.max(1);
    let mut next_f32 = || {
        let mut x = state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        state = x;
        (x as f32) / (u32::MAX as f32 + 1.0)
    };
    (0..n)
        .map(|i| {
            let t = i as f32 * 0.1;
            let w = if t < 5.0 { 0.6 * t } else { 3.0 + 2.0 * (t - 5.0) };
            Sample::new(t, w + (next_f32() * 2.0 - 1.0) * noise_amp)
        })
        .collect()
}

fn filled(samples: &[Sample]) -> SampleBuffer {
    let mut b = SampleBuffer::with_capacity(1000);
    for s in samples {
        let _ = b.push(*s);
    }
    b
}

fn configure(g: &mut criterion::BenchmarkGroup<'_, criterion::measurement::WallTime>) {
    // Quick tweaking without CLI flags:
    //   BENCH_SAMPLE_SIZE=10 BENCH_MEAS_MS=50 cargo bench -p shot_core --bench trend
    if let Ok(ss) = std::env::var("BENCH_SAMPLE_SIZE") {
        if let Ok(n) = ss.parse::<usize>() {
            g.sample_size(n.max(10));
        }
    } else {
        g.sample_size(50);
    }
    if let Ok(ms) = std::env::var("BENCH_MEAS_MS")
        && let Ok(ms_u64) = ms.parse::<u64>()
    {
        g.measurement_time(std::time::Duration::from_millis(ms_u64));
    }
}

pub fn bench_estimate(c: &mut Criterion) {
    let mut g = c.benchmark_group("trend_estimate");
    configure(&mut g);

    let est = TrendEstimator::new(TrendCfg::default(), ShotLimits::default());
    // Mid-shot: flow established, buffer partly full.
    let mid = filled(&synth_shot(150, 0.05, 0xC0FFEE));
    // Long shot: buffer at capacity and wrapped.
    let full = filled(&synth_shot(1_200, 0.05, 0xBEEF));

    g.bench_function("estimate_mid_shot", |b| {
        b.iter(|| black_box(est.estimate(black_box(&mid), black_box(36.0), black_box(0.5))))
    });
    g.bench_function("estimate_wrapped_buffer", |b| {
        b.iter(|| black_box(est.estimate(black_box(&full), black_box(36.0), black_box(0.5))))
    });
    g.finish();
}

pub fn bench_ols(c: &mut Criterion) {
    let mut g = c.benchmark_group("ols");
    configure(&mut g);

    for &n in &[10usize, 50, 200] {
        let pts = synth_shot(n, 0.05, 0x5EED);
        g.bench_function(format!("ols_{n}"), |b| {
            b.iter_batched(
                || pts.clone(),
                |p| black_box(ols(p.into_iter())),
                BatchSize::SmallInput,
            )
        });
    }
    g.finish();
}

pub fn bench_push(c: &mut Criterion) {
    let mut g = c.benchmark_group("sample_buffer");
    configure(&mut g);

    let trace = synth_shot(2_000, 0.0, 1);
    g.bench_function("push_2000_into_1000", |b| {
        b.iter_batched(
            || SampleBuffer::with_capacity(1000),
            |mut buf| {
                for s in &trace {
                    let _ = buf.push(*s);
                }
                black_box(buf.len());
            },
            BatchSize::SmallInput,
        )
    });
    g.finish();
}

criterion_group!(benches, bench_estimate, bench_ols, bench_push);
criterion_main!(benches);
