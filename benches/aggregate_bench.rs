//! Benchmarks for extraction and aggregation
//!
//! Run with: cargo bench

use aidstats::aggregate::PublisherRecords;
use aidstats::stats::{DocumentKey, DocumentKind, MetricRecord, MetricValue};
use aidstats::{Aggregator, Extractor, RecordSet, ReferenceData, RuleRegistry};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;

fn create_record(publisher: &str, i: usize) -> MetricRecord {
    let key = DocumentKey::new(publisher, format!("file-{}.xml", i));
    let mut record = MetricRecord::new(&key, DocumentKind::Activity);
    record.set("activities", 10i64);
    record.set("activity_files", 1i64);
    record.set("file_size", 4096i64);
    record.set(
        "iati_identifiers",
        MetricValue::counts((0..10).map(|a| (format!("{}-{}-{}", publisher, i, a), 1))),
    );
    record.set("versions", MetricValue::counts([("2.03", 1)]));
    record.set("currencies", MetricValue::counts([("USD", 7), ("EUR", 3)]));
    record.set("reporting_org_ref", publisher);
    record
}

fn create_record_set(publishers: usize, files: usize) -> RecordSet {
    let mut set = RecordSet::default();
    for p in 0..publishers {
        let publisher = format!("pub{}", p);
        let records = (0..files).map(|i| create_record(&publisher, i)).collect();
        set.publishers.insert(
            publisher,
            PublisherRecords {
                records,
                not_aggregated: 0,
            },
        );
    }
    set
}

fn create_document(activities: usize) -> Vec<u8> {
    let mut xml = String::from(r#"<iati-activities version="2.03">"#);
    for i in 0..activities {
        xml.push_str(&format!(
            r#"<iati-activity default-currency="USD">
                 <iati-identifier>XM-BENCH-{i}</iati-identifier>
                 <reporting-org ref="XM-BENCH"/>
                 <sector code="11110"/>
                 <transaction>
                   <transaction-type code="3"/>
                   <transaction-date iso-date="2023-05-01"/>
                   <value>1000</value>
                 </transaction>
               </iati-activity>"#,
            i = i
        ));
    }
    xml.push_str("</iati-activities>");
    xml.into_bytes()
}

fn bench_combine(c: &mut Criterion) {
    let mut group = c.benchmark_group("combine");
    let registry = RuleRegistry::standard();

    for size in [10, 100, 1000] {
        let records: Vec<MetricRecord> = (0..size).map(|i| create_record("pub", i)).collect();
        group.throughput(Throughput::Elements(size as u64));

        group.bench_function(format!("combine_{}", size), |b| {
            b.iter(|| {
                let mut acc = registry.identity_metrics();
                for record in &records {
                    registry.combine_into(&mut acc, black_box(&record.metrics));
                }
                acc
            })
        });
    }

    group.finish();
}

fn bench_aggregate(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate");
    let aggregator = Aggregator::default();

    for (publishers, files) in [(10, 10), (50, 20)] {
        let set = create_record_set(publishers, files);
        group.throughput(Throughput::Elements((publishers * files) as u64));

        group.bench_function(format!("aggregate_{}x{}", publishers, files), |b| {
            b.iter(|| aggregator.aggregate(black_box(&set)))
        });
    }

    group.finish();
}

fn bench_extract(c: &mut Criterion) {
    let mut group = c.benchmark_group("extract");
    let reference = ReferenceData::new()
        .with_codelist("Version", &["2.03"])
        .with_codelist("Currency", &["USD"])
        .with_rate("USD", 2023, 1.0);
    let extractor = Extractor::new(Arc::new(reference));
    let key = DocumentKey::new("bench", "bench.xml");

    for activities in [10, 100] {
        let document = create_document(activities);
        group.throughput(Throughput::Bytes(document.len() as u64));

        group.bench_function(format!("extract_{}", activities), |b| {
            b.iter(|| extractor.extract(&key, black_box(&document)).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_combine, bench_aggregate, bench_extract);
criterion_main!(benches);
