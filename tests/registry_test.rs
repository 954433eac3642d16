use std::sync::Arc;
use std::time::Duration;

use rstest::{fixture, rstest};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time;

use rtgate::{setup_local_tracing, PingPongHandler, SessionConfig, SessionRegistry};

#[fixture]
#[once]
fn setup() {
    let _ = setup_local_tracing();
}

async fn tcp_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    (client.unwrap(), accepted.unwrap().0)
}

fn registry() -> SessionRegistry {
    SessionRegistry::new(SessionConfig::default(), Arc::new(PingPongHandler))
}

async fn wait_for(mut cond: impl FnMut() -> bool) {
    for _ in 0..300 {
        if cond() {
            return;
        }
        time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

async fn assert_closed(client: &mut TcpStream) {
    let mut buf = [0u8; 16];
    let n = time::timeout(Duration::from_secs(5), client.read(&mut buf))
        .await
        .expect("connection still open")
        .unwrap_or(0);
    assert_eq!(n, 0);
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_peer_close_detaches_then_reap_joins(_setup: ()) {
    let registry = registry();
    let (client, server) = tcp_pair().await;
    let session = registry.create_session(server);
    assert_eq!(registry.count(), 1);

    // receive path sees EOF and detaches itself
    drop(client);
    wait_for(|| registry.count() == 0 && registry.pending_count() == 1).await;
    assert!(!session.is_running());

    let reaped = time::timeout(Duration::from_secs(5), registry.reap_pending())
        .await
        .expect("reap must not hang");
    assert_eq!(reaped, 1);
    assert_eq!(registry.pending_count(), 0);
    assert_eq!(registry.reap_pending().await, 0);
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_remove_from_session_task_does_not_block(_setup: ()) {
    let registry = registry();
    let (mut client, server) = tcp_pair().await;
    let session = registry.create_session(server);
    let id = session.id();

    // a close notification issued from some other task, the way the receive
    // path issues it, returns immediately even though the session is live
    let notifier = registry.clone();
    let remove = tokio::spawn(async move { notifier.remove(id) });
    time::timeout(Duration::from_millis(500), remove)
        .await
        .expect("remove blocked")
        .unwrap();
    assert_eq!(registry.count(), 0);
    assert_eq!(registry.pending_count(), 1);
    assert!(session.is_running());

    // idempotent for ids no longer active
    registry.remove(id);
    registry.remove(12345);
    assert_eq!(registry.pending_count(), 1);

    // the external reaper stops and joins both paths
    let reaped = time::timeout(Duration::from_secs(5), registry.reap_pending())
        .await
        .expect("reap must not hang");
    assert_eq!(reaped, 1);
    assert!(!session.is_running());
    assert_closed(&mut client).await;
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_all_joins_active_and_pending(_setup: ()) {
    let registry = registry();
    let mut clients = Vec::new();
    for _ in 0..3 {
        let (client, server) = tcp_pair().await;
        registry.create_session(server);
        clients.push(client);
    }

    // one session finishes on its own
    drop(clients.remove(0));
    wait_for(|| registry.pending_count() == 1).await;
    assert_eq!(registry.count(), 2);

    let stopped = time::timeout(Duration::from_secs(5), registry.stop_all())
        .await
        .expect("stop_all must not hang");
    assert_eq!(stopped, 3);
    assert_eq!(registry.count(), 0);
    assert_eq!(registry.pending_count(), 0);

    for client in clients.iter_mut() {
        assert_closed(client).await;
    }
    assert_eq!(registry.stop_all().await, 0);
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_session_closing_during_stop_all(_setup: ()) {
    let registry = registry();
    let mut clients = Vec::new();
    for _ in 0..16 {
        let (client, server) = tcp_pair().await;
        registry.create_session(server);
        clients.push(client);
    }

    // peers disconnect while the registry is shutting everything down
    let closer = tokio::spawn(async move {
        for client in clients {
            drop(client);
            tokio::task::yield_now().await;
        }
    });
    let stopped = time::timeout(Duration::from_secs(5), registry.stop_all())
        .await
        .expect("stop_all must not hang");
    closer.await.unwrap();

    assert_eq!(stopped, 16);
    assert_eq!(registry.count(), 0);
    assert_eq!(registry.pending_count(), 0);
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reap_from_timer_task(_setup: ()) {
    let registry = registry();
    let reaper_registry = registry.clone();
    let reaper = tokio::spawn(async move {
        let mut total = 0;
        let mut interval = time::interval(Duration::from_millis(20));
        for _ in 0..50 {
            interval.tick().await;
            total += reaper_registry.reap_pending().await;
            if total == 4 {
                break;
            }
        }
        total
    });

    for _ in 0..4 {
        let (client, server) = tcp_pair().await;
        registry.create_session(server);
        drop(client);
    }

    assert_eq!(reaper.await.unwrap(), 4);
    assert_eq!(registry.count(), 0);
    assert_eq!(registry.pending_count(), 0);
}
