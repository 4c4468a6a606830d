use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use slotwise::tenant::TenantManager;
use slotwise::wire;

const DAY: &str = "2026-10-19";

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<TenantManager>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("slotwise_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let tm = Arc::new(TenantManager::new(dir, 1000));

    let tm2 = tm.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let tm = tm2.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, tm, "slotwise".to_string(), None).await;
            });
        }
    });

    (addr, tm)
}

async fn connect_to(addr: SocketAddr, db: &str) -> Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname(db)
        .user("slotwise")
        .password("slotwise");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn connect(addr: SocketAddr) -> Client {
    connect_to(addr, "salon").await
}

async fn rows(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

fn column<'a>(rows: &'a [SimpleQueryRow], name: &str) -> Vec<Option<&'a str>> {
    rows.iter().map(|r| r.get(name)).collect()
}

/// Opening hours 9-12 and one service of `minutes`.
async fn seed(client: &Client, minutes: u32) -> Ulid {
    client
        .batch_execute("INSERT INTO settings (business_name, phone, start_hour, end_hour) VALUES ('Studio Bela', '11 3333-4444', 9, 12)")
        .await
        .unwrap();
    let sid = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO services (id, name, price, duration_minutes) VALUES ('{sid}', 'Corte', 120, {minutes})"
        ))
        .await
        .unwrap();
    sid
}

async fn book(client: &Client, sid: Ulid, at: &str) -> Result<Ulid, tokio_postgres::Error> {
    let id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO appointments (id, service_id, start, status) VALUES ('{id}', '{sid}', '{DAY} {at}', 'CONFIRMED')"
        ))
        .await
        .map(|_| id)
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn catalog_round_trip() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;

    let sid = seed(&client, 45).await;
    let cid = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO clients (id, name, phone, requires_deposit) VALUES ('{cid}', 'Ana', '11988887777', true)"
        ))
        .await
        .unwrap();

    let services = rows(&client, "SELECT * FROM services").await;
    assert_eq!(services.len(), 1);
    assert_eq!(services[0].get("id"), Some(sid.to_string().as_str()));
    assert_eq!(services[0].get("duration_minutes"), Some("45"));

    let clients = rows(&client, "SELECT * FROM clients").await;
    assert_eq!(column(&clients, "name"), vec![Some("Ana")]);

    let settings = rows(&client, "SELECT * FROM settings").await;
    assert_eq!(settings[0].get("business_name"), Some("Studio Bela"));
    assert_eq!(settings[0].get("start_hour"), Some("9"));

    client
        .batch_execute(&format!("DELETE FROM clients WHERE id = '{cid}'"))
        .await
        .unwrap();
    assert!(rows(&client, "SELECT * FROM clients").await.is_empty());
}

#[tokio::test]
async fn overlapping_booking_is_an_exclusion_violation() {
    let (addr, _tm) = start_test_server().await;
    let staff_a = connect(addr).await;
    let staff_b = connect(addr).await;

    let sid = seed(&staff_a, 60).await;
    book(&staff_a, sid, "10:00").await.unwrap();

    let err = book(&staff_b, sid, "10:30").await.unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::EXCLUSION_VIOLATION));

    // Back-to-back is fine.
    book(&staff_b, sid, "11:00").await.unwrap();
}

#[tokio::test]
async fn free_slots_and_schedule() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;

    let sid = seed(&client, 60).await;
    book(&client, sid, "10:00").await.unwrap();

    let half = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO services (id, name, price, duration_minutes) VALUES ('{half}', 'Franja', 20, 30)"
        ))
        .await
        .unwrap();

    let free = rows(
        &client,
        &format!("SELECT * FROM free_slots WHERE date = '{DAY}' AND service_id = '{half}' AND now = '{DAY} 00:00'"),
    )
    .await;
    assert_eq!(
        column(&free, "time"),
        vec![Some("09:00"), Some("09:30"), Some("11:00"), Some("11:30")]
    );

    let schedule = rows(&client, &format!("SELECT * FROM schedule WHERE date = '{DAY}'")).await;
    // 10:30 is a continuation and is left out.
    assert_eq!(
        column(&schedule, "time"),
        vec![Some("09:00"), Some("09:30"), Some("10:00"), Some("11:00"), Some("11:30")]
    );
    assert_eq!(schedule[2].get("kind"), Some("appointment"));
    assert_eq!(schedule[2].get("duration_minutes"), Some("60"));
    assert_eq!(schedule[0].get("kind"), Some("free"));
    assert_eq!(schedule[0].get("appointment_id"), None);
}

#[tokio::test]
async fn cancelling_frees_the_slot() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;

    let sid = seed(&client, 60).await;
    let id = book(&client, sid, "09:00").await.unwrap();
    assert!(book(&client, sid, "09:00").await.is_err());

    // Extended protocol with bound parameters.
    let changed = client
        .execute(
            "INSERT INTO appointment_status (id, status) VALUES ($1, $2)",
            &[&id.to_string(), &"CANCELLED"],
        )
        .await
        .unwrap();
    assert_eq!(changed, 1);

    book(&client, sid, "09:00").await.unwrap();
    let day = rows(&client, &format!("SELECT * FROM appointments WHERE date = '{DAY}'")).await;
    assert_eq!(column(&day, "status"), vec![Some("CANCELLED"), Some("CONFIRMED")]);
}

#[tokio::test]
async fn bound_text_with_dollar_signs_is_stored_verbatim() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;

    let cid = Ulid::new().to_string();
    let notes = "paga sinal de R$1 sempre";
    client
        .execute(
            "INSERT INTO clients (id, name, phone, notes) VALUES ($1, $2, $3, $4)",
            &[&cid, &"Ana", &"11988887777", &notes],
        )
        .await
        .unwrap();

    let clients = rows(&client, "SELECT * FROM clients").await;
    assert_eq!(column(&clients, "id"), vec![Some(cid.as_str())]);
    assert_eq!(column(&clients, "notes"), vec![Some(notes)]);
}

#[tokio::test]
async fn completed_cannot_reopen() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;

    let sid = seed(&client, 30).await;
    let id = book(&client, sid, "09:00").await.unwrap();
    client
        .batch_execute(&format!("INSERT INTO appointment_status (id, status) VALUES ('{id}', 'COMPLETED')"))
        .await
        .unwrap();
    let err = client
        .batch_execute(&format!("INSERT INTO appointment_status (id, status) VALUES ('{id}', 'PENDING')"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::RAISE_EXCEPTION));
}

#[tokio::test]
async fn deposit_and_booking_message() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;

    let sid = seed(&client, 60).await;
    client
        .batch_execute("INSERT INTO settings (deposit_enabled, deposit_percentage, deposit_scope) VALUES (true, 30, 'ALL')")
        .await
        .unwrap();

    let quote = rows(&client, &format!("SELECT * FROM deposit WHERE service_id = '{sid}'")).await;
    assert_eq!(quote[0].get("required"), Some("t"));
    assert_eq!(quote[0].get("amount"), Some("36.00"));
    assert_eq!(quote[0].get("remaining"), Some("84.00"));

    let handoff = rows(
        &client,
        &format!(
            "SELECT * FROM booking_message WHERE service_id = '{sid}' AND start = '{DAY} 09:30' AND name = 'Ana' AND phone = '11 98888-7777'"
        ),
    )
    .await;
    let text = handoff[0].get("text").unwrap();
    assert!(text.starts_with("Olá! Gostaria de agendar Corte para o dia 19/10/2026 às 09:30."));
    assert!(text.ends_with("R$ 36.00."));
    assert!(handoff[0].get("link").unwrap().starts_with("https://wa.me/1133334444?text="));

    // The handoff reserves nothing.
    assert!(rows(&client, &format!("SELECT * FROM appointments WHERE date = '{DAY}'")).await.is_empty());
}

#[tokio::test]
async fn tenants_are_isolated_by_database() {
    let (addr, tm) = start_test_server().await;
    let salon = connect_to(addr, "salon").await;
    let barber = connect_to(addr, "barber").await;

    let sid = seed(&salon, 60).await;
    book(&salon, sid, "10:00").await.unwrap();

    assert!(rows(&barber, "SELECT * FROM services").await.is_empty());
    let err = book(&barber, sid, "10:00").await.unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::RAISE_EXCEPTION));
    assert_eq!(tm.len(), 2);
}

#[tokio::test]
async fn syntax_errors_use_sqlstate_42601() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr).await;

    for bad in [
        "SELEC * FROM services",
        "SELECT * FROM schedule",
        "INSERT INTO holds (id) VALUES ('x')",
    ] {
        let err = client.batch_execute(bad).await.unwrap_err();
        assert_eq!(err.code(), Some(&SqlState::SYNTAX_ERROR), "{bad}");
    }
}
