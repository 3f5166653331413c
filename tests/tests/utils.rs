use mock_service::{AppState, Latency, UserStore};
use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::error;
use tracing_subscriber::FmtSubscriber;

#[allow(unused)]
pub fn init() {
    static ONCE_LOCK: OnceLock<()> = OnceLock::new();

    ONCE_LOCK.get_or_init(|| {
        let default_panic = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            default_panic(info);
            error!("Panic occurred: {info:?}");
        }));

        let _ = FmtSubscriber::builder()
            .with_env_filter("surge=debug,mock_service=info")
            .try_init();
    });
}

/// Base URL of a mock service shared by every test in the binary.
///
/// The service runs on its own thread so it outlives the per-test runtimes.
#[allow(unused)]
pub fn mock_base() -> &'static str {
    static BASE: OnceLock<String> = OnceLock::new();

    BASE.get_or_init(|| {
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async move {
                let state = AppState::new(UserStore::seeded(25)).with_latency(Latency {
                    mean: Duration::from_millis(5),
                    std_dev: Duration::from_millis(1),
                });
                let (addr, handle) = mock_service::spawn((Ipv4Addr::LOCALHOST, 0).into(), state)
                    .await
                    .unwrap();
                tx.send(addr).unwrap();
                let _ = handle.await;
            });
        });

        let addr: SocketAddr = rx.recv().unwrap();
        format!("http://{addr}")
    })
}

/// A local address nothing is listening on.
#[allow(unused)]
pub fn refused_base() -> &'static str {
    static BASE: OnceLock<String> = OnceLock::new();

    BASE.get_or_init(|| {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{addr}")
    })
}
