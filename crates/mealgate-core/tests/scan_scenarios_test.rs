#![allow(clippy::unwrap_used)]
// End-to-end scan decisions through `ScanOrchestrator`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use pretty_assertions::assert_eq;
use serde_json::json;

use mealgate_core::token::{self, ScanPayload};
use mealgate_core::{
    AuditSink, AutoOpen, CardToken, CoreError, DoorStatus, DriverFactory, EntityId,
    EntityRepository, ErrorCode, Fixture, GateAction, GateCommand, GateConfig, GateDriver,
    GateEvent, GateProtocol, GateResponse, GateSupervisor, MemoryAuditSink, MemoryRepository,
    Outcome, RetryPolicy, ScanConfig, ScanOrchestrator, ScanRequest, ScanResult, ScanSnapshot,
    ScanType, StationId, SupervisorConfig,
};

// ── Fixture ─────────────────────────────────────────────────────────

fn venue() -> Fixture {
    serde_json::from_value(json!({
        "cards": [
            {
                "id": "card-1", "cardData": "QR-0001", "guestId": "guest-1",
                "isActive": true, "usageCount": 0, "maxUsage": 3,
                "validFrom": "2024-01-01T00:00:00Z", "validTo": "2024-01-20T23:59:59Z"
            },
            {
                "id": "card-2", "cardData": "QR-0002", "guestId": "guest-2",
                "isActive": true, "usageCount": 0, "maxUsage": 3,
                "validFrom": "2024-01-01T00:00:00Z", "validTo": "2024-01-20T23:59:59Z"
            },
            {
                "id": "card-3", "cardData": "QR-0003", "guestId": "guest-1",
                "isActive": true, "usageCount": 0, "maxUsage": 1,
                "validFrom": "2024-01-01T00:00:00Z", "validTo": "2024-01-20T23:59:59Z"
            }
        ],
        "guests": [
            {
                "id": "guest-1", "firstName": "Ada", "lastName": "Lovelace", "roomNumber": "204",
                "isActive": true, "checkInDate": "2024-01-01", "checkOutDate": "2024-01-20",
                "restaurantId": "rest-1"
            },
            {
                "id": "guest-2", "firstName": "Alan", "lastName": "Turing",
                "isActive": true, "checkInDate": "2024-01-01", "checkOutDate": "2024-01-05",
                "expiredDate": "2024-01-05T11:00:00Z", "restaurantId": "rest-1"
            }
        ],
        "restaurants": [{ "id": "rest-1", "name": "Main", "isActive": true, "gateId": "gate-1" }],
        "mealWindows": [{
            "id": "lunch", "restaurantId": "rest-1", "name": "Lunch",
            "startTime": "12:00", "endTime": "15:00", "isActive": true
        }],
        "gates": [{
            "id": "gate-1", "name": "Main entrance", "protocol": "TCP_IP",
            "ipAddress": "10.0.0.5", "port": 4001
        }],
        "stations": { "north-1": "rest-1" }
    }))
    .unwrap()
}

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap()
}

fn request(card_data: &str) -> ScanRequest {
    ScanRequest {
        card_data: card_data.into(),
        scan_type: ScanType::Qr,
        station_id: Some(StationId::from("north-1")),
    }
}

struct Setup {
    repo: Arc<MemoryRepository>,
    audit: Arc<MemoryAuditSink>,
    orchestrator: ScanOrchestrator,
}

fn setup(config: ScanConfig) -> Setup {
    let repo = Arc::new(MemoryRepository::from_fixture(venue()).unwrap());
    let audit = Arc::new(MemoryAuditSink::new());
    let orchestrator = ScanOrchestrator::new(repo.clone(), audit.clone(), config);
    Setup {
        repo,
        audit,
        orchestrator,
    }
}

async fn scan(o: &ScanOrchestrator, card_data: &str, when: DateTime<Utc>) -> ScanResult {
    let req = request(card_data);
    let ctx = o
        .station_context(req.station_id.clone(), Some(when))
        .await
        .unwrap();
    o.handle_scan(req, ctx).await
}

fn usage(repo: &MemoryRepository, id: &str) -> u32 {
    repo.card(&EntityId::from(id)).unwrap().usage_count
}

// ── Decisions ───────────────────────────────────────────────────────

#[tokio::test]
async fn lunch_scan_is_allowed_and_consumes_one_meal() {
    let s = setup(ScanConfig::default());
    let result = scan(&s.orchestrator, "QR-0001", at(10, 13)).await;

    assert_eq!(result.outcome, Outcome::Allow);
    assert!(result.success);
    assert_eq!(result.error_code, None);
    assert_eq!(result.card.as_ref().unwrap().usage_count, 1);
    assert_eq!(result.guest.as_ref().unwrap().room_number.as_deref(), Some("204"));
    assert_eq!(result.restaurant.as_ref().unwrap().name, "Main");
    assert_eq!(usage(&s.repo, "card-1"), 1);

    let audited = s.audit.scans();
    assert_eq!(audited.len(), 1);
    assert_eq!(audited[0].scan_id, result.scan_id);
}

#[tokio::test]
async fn afternoon_scan_warns_without_consuming() {
    let s = setup(ScanConfig::default());
    let result = scan(&s.orchestrator, "QR-0001", at(10, 16)).await;

    assert_eq!(result.outcome, Outcome::Warn);
    assert!(!result.success);
    assert_eq!(result.error_code, Some(ErrorCode::OutsideMealTime));
    assert_eq!(usage(&s.repo, "card-1"), 0);
}

#[tokio::test]
async fn checked_out_guest_is_denied() {
    let s = setup(ScanConfig::default());
    let result = scan(&s.orchestrator, "QR-0002", at(10, 13)).await;

    assert_eq!(result.outcome, Outcome::Deny);
    assert_eq!(result.error_code, Some(ErrorCode::GuestCheckout));
    assert_eq!(usage(&s.repo, "card-2"), 0);
}

#[tokio::test]
async fn garbage_payload_is_card_not_found() {
    let s = setup(ScanConfig::default());
    for raw in ["", "   ", "{\"cardId\":", "rm -rf /", "QR-9999"] {
        let result = scan(&s.orchestrator, raw, at(10, 13)).await;
        assert_eq!(result.outcome, Outcome::Deny, "payload {raw:?}");
        assert_eq!(result.error_code, Some(ErrorCode::CardNotFound));
        assert!(result.card.is_none());
    }
}

#[tokio::test]
async fn station_bound_elsewhere_is_denied() {
    let s = setup(ScanConfig::default());
    s.repo
        .bind_station(StationId::from("south-1"), EntityId::from("rest-2"));
    let req = ScanRequest {
        station_id: Some(StationId::from("south-1")),
        ..request("QR-0001")
    };
    let ctx = s
        .orchestrator
        .station_context(req.station_id.clone(), Some(at(10, 13)))
        .await
        .unwrap();
    let result = s.orchestrator.handle_scan(req, ctx).await;
    assert_eq!(result.error_code, Some(ErrorCode::RestaurantNotFound));
}

#[tokio::test]
async fn structured_token_is_accepted() {
    let s = setup(ScanConfig::default());
    let card = s.repo.card(&EntityId::from("card-1")).unwrap();
    let issued = CardToken::issue(CardToken::claims_for(&card, EntityId::from("rest-1")));
    let raw = token::encode(&issued).unwrap();
    assert!(matches!(token::decode(&raw), Ok(ScanPayload::Structured(_))));

    let result = scan(&s.orchestrator, &raw, at(10, 13)).await;
    assert_eq!(result.outcome, Outcome::Allow);
    assert_eq!(usage(&s.repo, "card-1"), 1);

    // Tampering breaks the checksum.
    let tampered = raw.replace("\"maxUsage\":3", "\"maxUsage\":30");
    let result = scan(&s.orchestrator, &tampered, at(10, 13)).await;
    assert_eq!(result.error_code, Some(ErrorCode::CardNotFound));
}

#[tokio::test]
async fn venue_offset_decides_the_meal_window() {
    let s = setup(ScanConfig {
        venue_offset: FixedOffset::east_opt(3 * 3600).unwrap(),
        ..ScanConfig::default()
    });
    // 10:00 UTC is 13:00 at the venue.
    let result = scan(&s.orchestrator, "QR-0001", at(10, 10)).await;
    assert_eq!(result.outcome, Outcome::Allow);
    assert_eq!(result.timestamp.offset().local_minus_utc(), 3 * 3600);
}

#[tokio::test]
async fn localized_messages_come_from_config() {
    let s = setup(ScanConfig {
        localized_messages: HashMap::from([(
            "OUTSIDE_MEAL_TIME".to_owned(),
            "Yemek saati dışında".to_owned(),
        )]),
        ..ScanConfig::default()
    });
    let result = scan(&s.orchestrator, "QR-0001", at(10, 16)).await;
    assert_eq!(result.message_localized, "Yemek saati dışında");
    assert_eq!(result.message, ErrorCode::OutsideMealTime.default_message());
}

// ── Concurrency ─────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_scans_of_single_meal_card() {
    let s = setup(ScanConfig::default());
    let orchestrator = Arc::new(s.orchestrator);

    let mut tasks = Vec::new();
    for _ in 0..12 {
        let o = Arc::clone(&orchestrator);
        tasks.push(tokio::spawn(async move {
            scan(&o, "QR-0003", at(10, 13)).await
        }));
    }
    let mut outcomes = Vec::new();
    for t in tasks {
        outcomes.push(t.await.unwrap());
    }

    let allowed = outcomes
        .iter()
        .filter(|r| r.outcome == Outcome::Allow)
        .count();
    let limited = outcomes
        .iter()
        .filter(|r| r.error_code == Some(ErrorCode::MealLimitExceeded))
        .count();
    assert_eq!((allowed, limited), (1, 11));
    assert_eq!(usage(&s.repo, "card-3"), 1);
    assert_eq!(s.audit.scans().len(), 12);
}

// ── Failure handling ────────────────────────────────────────────────

struct BrokenAudit;

#[async_trait]
impl AuditSink for BrokenAudit {
    async fn record_scan(&self, _: &ScanResult) -> Result<(), CoreError> {
        Err(CoreError::Audit {
            message: "disk full".into(),
        })
    }

    async fn record_gate_event(&self, _: &GateEvent) -> Result<(), CoreError> {
        Err(CoreError::Audit {
            message: "disk full".into(),
        })
    }
}

#[tokio::test]
async fn audit_failure_keeps_the_decision() {
    let repo = Arc::new(MemoryRepository::from_fixture(venue()).unwrap());
    let orchestrator =
        ScanOrchestrator::new(repo.clone(), Arc::new(BrokenAudit), ScanConfig::default());
    let result = scan(&orchestrator, "QR-0001", at(10, 13)).await;
    assert_eq!(result.outcome, Outcome::Allow);
    assert_eq!(usage(&repo, "card-1"), 1);
}

/// Repository whose snapshot read never completes.
struct Stalled(MemoryRepository);

#[async_trait]
impl EntityRepository for Stalled {
    async fn load_scan_snapshot(&self, _: &ScanPayload) -> Result<ScanSnapshot, CoreError> {
        std::future::pending().await
    }
    async fn station_restaurant(&self, s: &StationId) -> Result<Option<EntityId>, CoreError> {
        self.0.station_restaurant(s).await
    }
    async fn card_usage(&self, id: &EntityId) -> Result<Option<(u32, u32)>, CoreError> {
        self.0.card_usage(id).await
    }
    async fn compare_and_set_usage(
        &self,
        id: &EntityId,
        expected: u32,
        new: u32,
    ) -> Result<bool, CoreError> {
        self.0.compare_and_set_usage(id, expected, new).await
    }
    async fn gate_configs(&self) -> Result<Vec<GateConfig>, CoreError> {
        self.0.gate_configs().await
    }
}

#[tokio::test(start_paused = true)]
async fn stalled_repository_becomes_system_error() {
    let repo = Arc::new(Stalled(MemoryRepository::from_fixture(venue()).unwrap()));
    let audit = Arc::new(MemoryAuditSink::new());
    let orchestrator = ScanOrchestrator::new(
        repo,
        audit.clone(),
        ScanConfig {
            scan_timeout: Duration::from_millis(500),
            ..ScanConfig::default()
        },
    );
    let result = scan(&orchestrator, "QR-0001", at(10, 13)).await;
    assert_eq!(result.outcome, Outcome::Deny);
    assert_eq!(result.error_code, Some(ErrorCode::SystemError));
    assert!(result.card.is_none());
    assert_eq!(audit.scans().len(), 1);
}

// ── Auto-open ───────────────────────────────────────────────────────

#[derive(Default)]
struct RecordingDriver {
    sent: Mutex<Vec<GateCommand>>,
}

#[async_trait]
impl GateDriver for RecordingDriver {
    fn protocol(&self) -> GateProtocol {
        GateProtocol::TcpIp
    }

    async fn send(
        &self,
        _gate_id: &str,
        command: &GateCommand,
        _timeout: Duration,
    ) -> Result<GateResponse, mealgate_gate::Error> {
        self.sent.lock().unwrap().push(command.clone());
        let status = command.action.implied_status().unwrap_or(DoorStatus::Closed);
        Ok(GateResponse {
            status,
            raw: status.to_string(),
        })
    }
}

struct Shared(Arc<RecordingDriver>);

impl DriverFactory for Shared {
    fn build(&self, _: &GateConfig) -> Result<Arc<dyn GateDriver>, CoreError> {
        Ok(Arc::clone(&self.0) as Arc<dyn GateDriver>)
    }
}

#[tokio::test]
async fn allowed_scan_opens_the_restaurant_gate() {
    let repo = Arc::new(MemoryRepository::from_fixture(venue()).unwrap());
    let audit = Arc::new(MemoryAuditSink::new());
    let driver = Arc::new(RecordingDriver::default());
    let supervisor = GateSupervisor::from_repository(
        repo.as_ref(),
        SupervisorConfig {
            retry: RetryPolicy::none(),
            ..SupervisorConfig::default()
        },
        &Shared(Arc::clone(&driver)),
        audit.clone(),
    )
    .await
    .unwrap();
    let gate_id = EntityId::from("gate-1");
    supervisor.refresh(&gate_id).await.unwrap();

    let orchestrator = ScanOrchestrator::new(
        repo,
        audit.clone(),
        ScanConfig {
            auto_open: Some(AutoOpen { duration_secs: 8 }),
            ..ScanConfig::default()
        },
    )
    .with_supervisor(supervisor);

    let warned = scan(&orchestrator, "QR-0001", at(10, 16)).await;
    assert_eq!(warned.outcome, Outcome::Warn);
    let allowed = scan(&orchestrator, "QR-0001", at(10, 13)).await;
    assert_eq!(allowed.outcome, Outcome::Allow);

    let sent = driver.sent.lock().unwrap().clone();
    let opens: Vec<&GateCommand> = sent
        .iter()
        .filter(|c| c.action == GateAction::Open)
        .collect();
    assert_eq!(opens.len(), 1);
    assert_eq!(opens[0].duration_secs, Some(8));
    assert_eq!(
        opens[0].reason.as_deref(),
        Some(format!("scan {}", allowed.scan_id).as_str())
    );
}
