use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;

use slotwise::mapping::StoreExport;
use slotwise::tenant::TenantManager;
use slotwise::wire;

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.into())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

/// Load a hosted-store JSON export into one tenant before serving.
async fn import_export(tenants: &TenantManager, path: &str, tenant: &str) -> Result<(), Box<dyn std::error::Error>> {
    let json = std::fs::read_to_string(path)?;
    let snapshot = StoreExport::from_json(&json)?.into_domain(&chrono::Local)?;
    let engine = tenants.get_or_create(tenant)?;
    let report = engine.import(snapshot).await?;
    info!(
        "imported {path} into {tenant}: {} services, {} clients, {} appointments, {} skipped",
        report.services,
        report.clients,
        report.appointments,
        report.skipped.len()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = env_parse("SLOTWISE_METRICS_PORT");
    slotwise::observability::init(metrics_port);

    let port = env_or("SLOTWISE_PORT", "5433");
    let bind = env_or("SLOTWISE_BIND", "0.0.0.0");
    let data_dir = env_or("SLOTWISE_DATA_DIR", "./data");
    let password = env_or("SLOTWISE_PASSWORD", "slotwise");
    let max_connections: usize = env_parse("SLOTWISE_MAX_CONNECTIONS").unwrap_or(256);
    let compact_threshold: u64 = env_parse("SLOTWISE_COMPACT_THRESHOLD").unwrap_or(1000);

    let tls_cert = std::env::var("SLOTWISE_TLS_CERT").ok();
    let tls_key = std::env::var("SLOTWISE_TLS_KEY").ok();
    let tls_acceptor = slotwise::tls::load_tls_acceptor(tls_cert.as_deref(), tls_key.as_deref())?;

    std::fs::create_dir_all(&data_dir)?;

    let tenant_manager = Arc::new(TenantManager::new(PathBuf::from(&data_dir), compact_threshold));

    if let Ok(path) = std::env::var("SLOTWISE_IMPORT") {
        let tenant = env_or("SLOTWISE_IMPORT_TENANT", "default");
        import_export(&tenant_manager, &path, &tenant).await?;
    }

    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("slotwise listening on {addr}");
    info!("  data_dir: {data_dir}");
    info!("  max_connections: {max_connections}");
    info!("  tls: {}", if tls_acceptor.is_some() { "enabled" } else { "disabled" });
    info!(
        "  metrics: {}",
        metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    // Stop accepting on SIGTERM/ctrl-c, then drain in-flight connections.
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(slotwise::observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(slotwise::observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(slotwise::observability::CONNECTIONS_ACTIVE).increment(1.0);
                let tm = tenant_manager.clone();
                let pw = password.clone();
                let tls = tls_acceptor.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until connection closes
                    if let Err(e) = wire::process_connection(socket, tm, pw, tls).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(slotwise::observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(std::time::Duration::from_secs(10));
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = max_connections - semaphore.available_permits();
                tracing::warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
        }
    }

    info!("slotwise stopped");
    Ok(())
}
