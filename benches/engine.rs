use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use tokio::runtime::Runtime;
use wallet_ledger::{
    Amount, Command, Credit, Engine, MemoryStore, Recognition, Reservation, Resolution,
    TransactionId, UserId,
};

/// Generates valid command sequences for benchmarking.
///
/// Pattern per user (repeating):
/// 1. Credit 100
/// 2. Reserve 30 against a fresh order
/// 3. Resolve that order as done
///
/// Wallet ids follow user ids because every user is credited first, in order.
pub struct CommandGenerator {
    next_tx: u64,
    next_order: i64,
    num_users: UserId,
    commands_per_user: u32,
    current_user: UserId,
    current_step: u32,
}

impl CommandGenerator {
    pub fn new(num_users: UserId, commands_per_user: u32) -> Self {
        Self {
            next_tx: 1,
            next_order: 1,
            num_users,
            commands_per_user,
            current_user: 1,
            current_step: 0,
        }
    }
}

impl Iterator for CommandGenerator {
    type Item = Command;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_user > self.num_users {
            return None;
        }

        let transaction = TransactionId::new(format!("bench-{}", self.next_tx));
        self.next_tx += 1;

        let wallet = self.current_user;
        let command = match self.current_step % 3 {
            0 => Command::Credit {
                transaction,
                credit: Credit {
                    user: self.current_user,
                    amount: Amount::new(100),
                },
            },
            1 => Command::Reserve {
                transaction,
                reservation: Reservation {
                    wallet,
                    service: 1,
                    order: self.next_order,
                    price: Amount::new(30),
                },
            },
            _ => {
                let order = self.next_order;
                self.next_order += 1;
                Command::Resolve {
                    transaction,
                    recognition: Recognition {
                        wallet,
                        order,
                        status: Resolution::Done,
                    },
                }
            }
        };

        self.current_step += 1;

        if self.current_step >= self.commands_per_user {
            // an unresolved reservation is left behind, start the next user on a new order
            if self.current_step % 3 == 2 {
                self.next_order += 1;
            }
            self.current_step = 0;
            self.current_user += 1;
        }

        Some(command)
    }
}

fn replay(runtime: &Runtime, generator: CommandGenerator) -> Engine<MemoryStore> {
    runtime.block_on(async {
        let engine = Engine::new(MemoryStore::new());
        for command in generator {
            let _ = black_box(engine.apply(command).await);
        }
        engine
    })
}

fn bench_credit_only(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let mut group = c.benchmark_group("credits");

    for count in [1_000i64, 10_000, 100_000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                // one command per user keeps every command a credit
                replay(&runtime, CommandGenerator::new(count, 1))
            });
        });
    }

    group.finish();
}

fn bench_mixed_commands(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let mut group = c.benchmark_group("mixed");

    for (users, per_user) in [(100, 300), (1_000, 30), (10, 3_000)] {
        let label = format!("{users}u_{per_user}c");
        group.bench_with_input(
            BenchmarkId::from_parameter(&label),
            &(users, per_user),
            |b, &(users, per_user)| {
                b.iter(|| replay(&runtime, CommandGenerator::new(users, per_user)));
            },
        );
    }

    group.finish();
}

fn bench_duplicate_replays(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let mut group = c.benchmark_group("duplicates");

    group.bench_function("10k_replays_of_one_credit", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let engine = Engine::new(MemoryStore::new());
                let transaction = TransactionId::from("same");
                for _ in 0..10_000 {
                    let _ = black_box(engine.add_funds(&transaction, 1, Amount::new(1)).await);
                }
                engine
            })
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_credit_only,
    bench_mixed_commands,
    bench_duplicate_replays,
);

criterion_main!(benches);
