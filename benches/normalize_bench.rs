//! Criterion benchmarks for the Hebrew normalizer hot path.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use seforim_core::hebrew::{normalize, strip_diacritics_with_map};

const VOCALIZED: &str = "בְּרֵאשִׁ֖ית בָּרָ֣א אֱלֹהִ֑ים אֵ֥ת הַשָּׁמַ֖יִם וְאֵ֥ת הָאָֽרֶץ׃ \
וְהָאָ֗רֶץ הָיְתָ֥ה תֹ֙הוּ֙ וָבֹ֔הוּ וְחֹ֖שֶׁךְ עַל־פְּנֵ֣י תְה֑וֹם";

const PLAIN: &str = "בראשית ברא אלהים את השמים ואת הארץ והארץ היתה תהו ובהו \
וחשך על פני תהום ורוח אלהים מרחפת על פני המים";

fn bench_normalize(c: &mut Criterion) {
    let sizes = [1, 8, 64];

    let mut group = c.benchmark_group("normalize");
    for repeat in sizes {
        let vocalized = VOCALIZED.repeat(repeat);
        let plain = PLAIN.repeat(repeat);

        group.bench_with_input(
            BenchmarkId::new("vocalized", vocalized.len()),
            &vocalized,
            |b, input| b.iter(|| normalize(black_box(input))),
        );

        // Already-plain text is the common case during indexing.
        group.bench_with_input(
            BenchmarkId::new("plain", plain.len()),
            &plain,
            |b, input| b.iter(|| normalize(black_box(input))),
        );

        group.bench_with_input(
            BenchmarkId::new("with_map", vocalized.len()),
            &vocalized,
            |b, input| b.iter(|| strip_diacritics_with_map(black_box(input))),
        );
    }
    group.finish();
}

criterion_group!(benches, bench_normalize);
criterion_main!(benches);
