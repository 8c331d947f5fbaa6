use wallet_ledger::{
    Amount, Engine, EngineError, EventStatus, LedgerError, MemoryStore, Outcome, Recognition,
    Reservation, Resolution, TransactionId,
};

fn tx(id: &str) -> TransactionId {
    TransactionId::from(id)
}

fn reservation(wallet: i64, order: i64, price: i64) -> Reservation {
    Reservation {
        wallet,
        service: 1,
        order,
        price: Amount::new(price),
    }
}

#[tokio::test]
async fn credit_reserve_resolve_scenario() {
    let engine = Engine::new(MemoryStore::new());

    let wallet = engine
        .add_funds(&tx("A"), 1234, Amount::new(100))
        .await
        .unwrap()
        .applied()
        .unwrap();
    assert_eq!(wallet.available, Amount::new(100));
    assert_eq!(wallet.reserved, Amount::ZERO);

    let wallet = engine
        .add_funds(&tx("B"), 1234, Amount::new(100))
        .await
        .unwrap()
        .applied()
        .unwrap();
    assert_eq!(wallet.available, Amount::new(200));

    let replay = engine
        .add_funds(&tx("B"), 1234, Amount::new(100))
        .await
        .unwrap();
    assert_eq!(replay, Outcome::Duplicate);
    assert_eq!(
        engine.get_balance(1234).await.unwrap().available,
        Amount::new(200)
    );

    let event = engine
        .reserve_funds(&tx("C"), &reservation(wallet.id, 1111, 10))
        .await
        .unwrap()
        .applied()
        .unwrap();
    assert_eq!(event.status, EventStatus::Pending);
    assert_eq!(
        engine.get_balance(1234).await.unwrap().reserved,
        Amount::new(10)
    );

    let event = engine
        .recognize_revenue(
            &tx("D"),
            &Recognition {
                wallet: wallet.id,
                order: 1111,
                status: Resolution::Done,
            },
        )
        .await
        .unwrap()
        .applied()
        .unwrap();
    assert_eq!(event.status, EventStatus::Done);

    let wallet = engine.get_balance(1234).await.unwrap();
    assert_eq!(wallet.available, Amount::new(190));
    assert_eq!(wallet.reserved, Amount::ZERO);

    let again = engine
        .reserve_funds(&tx("E"), &reservation(wallet.id, 1111, 10))
        .await;
    assert!(matches!(
        again,
        Err(EngineError::Ledger(LedgerError::OrderAlreadyExists(1111)))
    ));

    let events = engine.wallet_events(wallet.id).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, EventStatus::Done);
}

#[tokio::test]
async fn oversized_reservation_leaves_reserved_unchanged() {
    let engine = Engine::new(MemoryStore::new());
    let wallet = engine
        .add_funds(&tx("A"), 1234, Amount::new(200))
        .await
        .unwrap()
        .applied()
        .unwrap();

    let result = engine
        .reserve_funds(&tx("B"), &reservation(wallet.id, 1, 100_000))
        .await;
    let err = result.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Ledger(LedgerError::InsufficientFunds { .. })
    ));
    assert_eq!(err.status_code(), 400);

    let wallet = engine.get_balance(1234).await.unwrap();
    assert_eq!(wallet.available, Amount::new(200));
    assert_eq!(wallet.reserved, Amount::ZERO);
}

#[tokio::test]
async fn canceled_order_returns_funds_to_spendable() {
    let engine = Engine::new(MemoryStore::new());
    let wallet = engine
        .add_funds(&tx("A"), 1, Amount::new(50))
        .await
        .unwrap()
        .applied()
        .unwrap();
    engine
        .reserve_funds(&tx("B"), &reservation(wallet.id, 9, 50))
        .await
        .unwrap();
    assert_eq!(
        engine.get_balance(1).await.unwrap().spendable(),
        Amount::ZERO
    );

    engine
        .recognize_revenue(
            &tx("C"),
            &Recognition {
                wallet: wallet.id,
                order: 9,
                status: Resolution::Canceled,
            },
        )
        .await
        .unwrap();

    let wallet = engine.get_balance(1).await.unwrap();
    assert_eq!(wallet.available, Amount::new(50));
    assert_eq!(wallet.spendable(), Amount::new(50));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reserves_of_one_order_succeed_once() {
    let engine = Engine::new(MemoryStore::new());
    let wallet = engine
        .add_funds(&tx("seed"), 1, Amount::new(1_000))
        .await
        .unwrap()
        .applied()
        .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .reserve_funds(&tx(&format!("r-{i}")), &reservation(wallet.id, 1111, 10))
                    .await
            })
        })
        .collect();

    let mut applied = 0;
    let mut already_exists = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(Outcome::Applied(_)) => applied += 1,
            Err(EngineError::Ledger(LedgerError::OrderAlreadyExists(1111))) => {
                already_exists += 1
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
    assert_eq!(applied, 1);
    assert_eq!(already_exists, 7);
    assert_eq!(
        engine.get_balance(1).await.unwrap().reserved,
        Amount::new(10)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reserves_never_exceed_balance() {
    let engine = Engine::new(MemoryStore::new());
    let wallet = engine
        .add_funds(&tx("seed"), 1, Amount::new(100))
        .await
        .unwrap()
        .applied()
        .unwrap();

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .reserve_funds(&tx(&format!("r-{i}")), &reservation(wallet.id, i, 10))
                    .await
            })
        })
        .collect();

    let mut applied = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(Outcome::Applied(_)) => applied += 1,
            Err(EngineError::Ledger(LedgerError::InsufficientFunds { .. })) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }
    assert_eq!(applied, 10);

    let wallet = engine.get_balance(1).await.unwrap();
    assert_eq!(wallet.reserved, Amount::new(100));
    assert!(wallet.reserved <= wallet.available);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_resolution_replays_spend_once() {
    let engine = Engine::new(MemoryStore::new());
    let wallet = engine
        .add_funds(&tx("seed"), 1, Amount::new(100))
        .await
        .unwrap()
        .applied()
        .unwrap();
    engine
        .reserve_funds(&tx("r"), &reservation(wallet.id, 5, 30))
        .await
        .unwrap();

    let recognition = Recognition {
        wallet: wallet.id,
        order: 5,
        status: Resolution::Done,
    };
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.recognize_revenue(&tx("done"), &recognition).await })
        })
        .collect();

    let mut applied = 0;
    for handle in handles {
        if !handle.await.unwrap().unwrap().is_duplicate() {
            applied += 1;
        }
    }
    assert_eq!(applied, 1);

    let wallet = engine.get_balance(1).await.unwrap();
    assert_eq!(wallet.available, Amount::new(70));
    assert_eq!(wallet.reserved, Amount::ZERO);
}

#[tokio::test]
async fn wallets_are_listed_in_creation_order() {
    let engine = Engine::new(MemoryStore::new());
    for (i, user) in [30, 10, 20].into_iter().enumerate() {
        engine
            .add_funds(&tx(&format!("c-{i}")), user, Amount::new(5))
            .await
            .unwrap();
    }

    let wallets = engine.wallets().await.unwrap();
    let users: Vec<_> = wallets.iter().map(|w| (w.id, w.user)).collect();
    assert_eq!(users, vec![(1, 30), (2, 10), (3, 20)]);
}
