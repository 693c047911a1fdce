use criterion::{Criterion, black_box, criterion_group, criterion_main};
use label_scan::matcher::{MatchStrategy, TemplateCandidate, TemplateMatcher, feature_store};
use label_scan::models::Template;
use label_scan::tools::{synthetic_features, warp_features};
use label_scan::utils::homography::{Homography, RansacConfig, fit_homography_ransac};
use nalgebra::Matrix3;

fn translation(dx: f64, dy: f64) -> Homography {
    Homography::from_matrix(Matrix3::new(1.0, 0.0, dx, 0.0, 1.0, dy, 0.0, 0.0, 1.0))
}

fn bench_match_single(c: &mut Criterion) {
    let template = Template::new(1, "label", 400, 300);
    let tf = synthetic_features(7, 500, 400.0, 300.0);
    let frame = warp_features(&tf, &translation(100.0, 80.0));
    let matcher = TemplateMatcher::default();
    let strategy = MatchStrategy::coarse(matcher.config(), 640, 480);

    c.bench_function("match_template_500", |b| {
        b.iter(|| {
            matcher.match_template(
                black_box(&frame),
                TemplateCandidate {
                    template: &template,
                    features: &tf,
                },
                &strategy,
            )
        })
    });
}

fn bench_match_best(c: &mut Criterion) {
    let templates: Vec<Template> = (0..8)
        .map(|i| Template::new(i, format!("label-{i}"), 400, 300))
        .collect();
    let features: Vec<_> = (0..8)
        .map(|i| synthetic_features(100 + i as u64, 300, 400.0, 300.0))
        .collect();
    let frame = warp_features(&features[5], &translation(60.0, 40.0));
    let candidates: Vec<TemplateCandidate<'_>> = templates
        .iter()
        .zip(&features)
        .map(|(template, features)| TemplateCandidate { template, features })
        .collect();
    let matcher = TemplateMatcher::default();
    let strategy = MatchStrategy::coarse(matcher.config(), 640, 480);

    c.bench_function("match_best_8_templates", |b| {
        b.iter(|| matcher.match_best(black_box(&frame), &candidates, &strategy))
    });
}

fn bench_ransac(c: &mut Criterion) {
    let h = translation(12.0, -7.0);
    let src: Vec<[f64; 2]> = (0..200)
        .map(|i| [(i % 20) as f64 * 15.0, (i / 20) as f64 * 20.0])
        .collect();
    let mut dst: Vec<[f64; 2]> = src.iter().map(|p| h.project(p[0], p[1])).collect();
    // 25% outliers
    for (i, p) in dst.iter_mut().enumerate().filter(|(i, _)| i % 4 == 0) {
        *p = [(i * 37 % 300) as f64, (i * 53 % 200) as f64];
    }
    let cfg = RansacConfig::default();

    c.bench_function("ransac_200_points", |b| {
        b.iter(|| fit_homography_ransac(black_box(&src), black_box(&dst), &cfg))
    });
}

fn bench_feature_codec(c: &mut Criterion) {
    let features = synthetic_features(1, 1000, 640.0, 480.0);
    let blob = feature_store::encode(&features);

    c.bench_function("feature_store_encode_1000", |b| {
        b.iter(|| feature_store::encode(black_box(&features)))
    });
    c.bench_function("feature_store_decode_1000", |b| {
        b.iter(|| feature_store::decode(black_box(&blob)))
    });
}

criterion_group!(
    benches,
    bench_match_single,
    bench_match_best,
    bench_ransac,
    bench_feature_codec
);
criterion_main!(benches);
