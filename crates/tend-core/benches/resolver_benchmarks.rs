use chrono::{DateTime, Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tend_core::models::{EventSeries, ExceptionWithSeries, SeriesCancellation};
use tend_core::recurrence::{Frequency, RuleSpec};
use tend_core::resolver::resolve_window;
use uuid::Uuid;

fn start_instant() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()
}

fn create_test_series(freq: Frequency) -> EventSeries {
    let rule = RuleSpec {
        dtstart: start_instant(),
        freq,
        interval: 1,
        until: None,
        count: None,
        weekdays: vec![],
    };
    EventSeries {
        id: Uuid::now_v7(),
        circle_id: Uuid::now_v7(),
        title: "Benchmark series".to_string(),
        description: None,
        rrule: rule.to_rule_string(),
        starts_at: start_instant(),
        ends_at: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn bench_daily_expansion(c: &mut Criterion) {
    let spec = RuleSpec {
        dtstart: start_instant(),
        freq: Frequency::Daily,
        interval: 1,
        until: None,
        count: None,
        weekdays: vec![],
    };
    let start = start_instant();
    let end = start + Duration::days(30);

    c.bench_function("daily_expansion_30_days", |b| {
        b.iter(|| spec.occurrences_between(black_box(start), black_box(end)).unwrap())
    });
}

fn bench_resolve_window_plain(c: &mut Criterion) {
    let series = create_test_series(Frequency::Daily);
    let start = start_instant();
    let end = start + Duration::days(90);

    c.bench_function("resolve_window_daily_90_days", |b| {
        b.iter(|| {
            resolve_window(
                black_box(std::slice::from_ref(&series)),
                black_box(&[]),
                black_box(&[]),
                black_box(start),
                black_box(end),
            )
            .unwrap()
        })
    });
}

fn bench_resolve_window_with_overrides(c: &mut Criterion) {
    let series = create_test_series(Frequency::Daily);
    let start = start_instant();
    let end = start + Duration::days(90);

    let exceptions: Vec<ExceptionWithSeries> = (0..10)
        .map(|i| ExceptionWithSeries {
            id: Uuid::now_v7(),
            series_id: series.id,
            original_at: start + Duration::days(i * 7),
            moved_to: start + Duration::days(i * 7) + Duration::hours(3),
            title: None,
            description: None,
            series_title: series.title.clone(),
            series_description: None,
            series_rrule: series.rrule.clone(),
        })
        .collect();
    let cancellations: Vec<SeriesCancellation> = (0..10)
        .map(|i| SeriesCancellation {
            id: Uuid::now_v7(),
            series_id: series.id,
            original_at: start + Duration::days(i * 7 + 3),
            created_at: Utc::now(),
        })
        .collect();

    c.bench_function("resolve_window_daily_90_days_with_overrides", |b| {
        b.iter(|| {
            resolve_window(
                black_box(std::slice::from_ref(&series)),
                black_box(&exceptions),
                black_box(&cancellations),
                black_box(start),
                black_box(end),
            )
            .unwrap()
        })
    });
}

fn bench_pivot_lookup(c: &mut Criterion) {
    let spec = RuleSpec {
        dtstart: start_instant(),
        freq: Frequency::Weekly,
        interval: 1,
        until: None,
        count: None,
        weekdays: vec![],
    };
    let at = start_instant() + Duration::days(365);

    c.bench_function("pivot_lookup_one_year_in", |b| {
        b.iter(|| spec.last_before(black_box(at)).unwrap())
    });
}

criterion_group!(
    benches,
    bench_daily_expansion,
    bench_resolve_window_plain,
    bench_resolve_window_with_overrides,
    bench_pivot_lookup
);
criterion_main!(benches);
