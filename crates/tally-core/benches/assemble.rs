use chrono::{DateTime, NaiveDate};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use tally_core::Engine;
use tally_core::command::{Outbox, RemoteResult};
use tally_core::config::EngineConfig;
use tally_core::model::ids::SequentialIds;
use tally_core::model::{AccountId, Currency, Session};
use tally_core::orchestrate::Context;
use tally_core::orchestrate::request::{CreateRequest, Recipient, create_request};
use tally_core::orchestrate::split::{SplitBill, SplitParticipant, split_bill};
use tally_core::store::MemoryStore;
use tally_core::synth::ExpenseDetails;

const PEOPLE: [usize; 3] = [2, 8, 32];
const CACHE_SIZES: [usize; 3] = [10, 100, 500];

fn details(amount: i64) -> ExpenseDetails {
    let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap_or_default();
    ExpenseDetails::new(amount, Currency::usd(), date).with_merchant("Bench")
}

fn person(index: usize) -> Recipient {
    Recipient::Person {
        login: format!("person{index}@example.com"),
        account_id: None,
    }
}

fn session() -> Session {
    Session::new(AccountId(1), "payer@example.com")
}

/// A cache holding one confirmed request to each of `people` others.
fn populated(people: usize) -> MemoryStore {
    let mut engine = Engine::new(Outbox::new(MemoryStore::new()), session())
        .with_ids(SequentialIds::new("seed"));
    for index in 0..people {
        let params = CreateRequest {
            recipient: person(index),
            details: details(1000),
        };
        if engine.create_request(params).is_ok() {
            engine
                .dispatcher_mut()
                .settle_all(|_| RemoteResult::Success);
        }
    }
    engine.into_dispatcher().into_store()
}

fn bench_split_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("split.plan");
    let store = MemoryStore::new();
    let session = session();
    let config = EngineConfig::default();
    let now = DateTime::from_timestamp_millis(1_714_521_600_000).unwrap_or_default();

    for people in PEOPLE {
        let params = SplitBill {
            participants: (0..people)
                .map(|i| SplitParticipant {
                    login: format!("person{i}@example.com"),
                    account_id: None,
                    amount: None,
                })
                .collect(),
            details: details(1_000_000),
            chat_report_id: None,
        };
        group.throughput(Throughput::Elements(people as u64));
        group.bench_with_input(BenchmarkId::from_parameter(people), &params, |b, params| {
            b.iter(|| {
                let mut ids = SequentialIds::new("b");
                let mut ctx = Context::new(&store, &session, &config, &mut ids, now);
                black_box(split_bill(&mut ctx, params).is_ok())
            });
        });
    }
    group.finish();
}

fn bench_request_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("request.plan");
    let session = session();
    let config = EngineConfig::default();
    let now = DateTime::from_timestamp_millis(1_714_521_600_000).unwrap_or_default();

    for size in CACHE_SIZES {
        let store = populated(size);
        let params = CreateRequest {
            recipient: person(size / 2),
            details: details(2500),
        };
        group.throughput(Throughput::Elements(store.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &params, |b, params| {
            b.iter(|| {
                let mut ids = SequentialIds::new("b");
                let mut ctx = Context::new(&store, &session, &config, &mut ids, now);
                black_box(create_request(&mut ctx, params).is_ok())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_split_plan, bench_request_plan);
criterion_main!(benches);
