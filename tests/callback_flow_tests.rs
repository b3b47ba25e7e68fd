//! End-to-end callback processing tests: signature verification through
//! idempotent state-machine application, with counting collaborators.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use creditgate::audit::{AuditLevel, AuditLog, NullAlertHook, NullSink};
use creditgate::config::{GatewayConfig, IdempotencyConfig};
use creditgate::error::CallbackError;
use creditgate::gateway::signature::sign_payload;
use creditgate::gateway::types::{CallbackPayload, PaymentStatus};
use creditgate::services::idempotency::IdempotencyService;
use creditgate::services::lifecycle::{
    CollaboratorError, CreditLedger, CreditPackCatalog, InvoiceGenerator, PaymentLifecycle,
    ViewNotifier,
};
use creditgate::services::processor::{CallbackProcessor, RequestProvenance};
use creditgate::store::memory::InMemoryStore;
use creditgate::store::{PaymentRecord, PaymentStore};

const SECRET: &str = "whsec_test";

struct CountingLedger {
    calls: AtomicUsize,
    credited: AtomicUsize,
    delay: Duration,
}

#[async_trait]
impl CreditLedger for CountingLedger {
    async fn add_credits(&self, _user_id: &str, credits: u32) -> Result<(), CollaboratorError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.credited.fetch_add(credits as usize, Ordering::SeqCst);
        Ok(())
    }
}

struct StaticCatalog {
    packs: HashMap<String, u32>,
}

#[async_trait]
impl CreditPackCatalog for StaticCatalog {
    async fn credits_for(&self, credit_pack_id: &str) -> Result<u32, CollaboratorError> {
        self.packs
            .get(credit_pack_id)
            .copied()
            .ok_or_else(|| CollaboratorError::new("unknown credit pack"))
    }
}

struct CountingInvoices {
    calls: AtomicUsize,
}

#[async_trait]
impl InvoiceGenerator for CountingInvoices {
    async fn create_invoice(
        &self,
        _payment_id: &str,
        _invoice_number: &str,
        _metadata: JsonValue,
    ) -> Result<(), CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct CountingNotifier {
    calls: AtomicUsize,
}

#[async_trait]
impl ViewNotifier for CountingNotifier {
    async fn invalidate(&self, _user_id: &str) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

struct Harness {
    processor: Arc<CallbackProcessor>,
    store: Arc<InMemoryStore>,
    ledger: Arc<CountingLedger>,
    invoices: Arc<CountingInvoices>,
    audit: Arc<AuditLog>,
}

fn harness() -> Harness {
    harness_with(5, Duration::ZERO)
}

fn harness_with(operation_timeout_secs: u64, ledger_delay: Duration) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let audit = Arc::new(AuditLog::new(
        256,
        Arc::new(NullSink),
        Arc::new(NullAlertHook),
    ));
    let ledger = Arc::new(CountingLedger {
        calls: AtomicUsize::new(0),
        credited: AtomicUsize::new(0),
        delay: ledger_delay,
    });
    let invoices = Arc::new(CountingInvoices {
        calls: AtomicUsize::new(0),
    });

    let gateway_config = GatewayConfig {
        webhook_secret: SECRET.to_string(),
        success_code: "0".to_string(),
    };
    let idempotency_config = IdempotencyConfig {
        ttl_minutes: 60,
        max_wait_attempts: 10,
        initial_backoff_ms: 1,
        max_backoff_ms: 50,
        operation_timeout_secs,
    };

    let idempotency = Arc::new(IdempotencyService::new(
        store.clone(),
        audit.clone(),
        idempotency_config,
    ));
    let lifecycle = Arc::new(PaymentLifecycle::new(
        store.clone(),
        ledger.clone(),
        Arc::new(StaticCatalog {
            packs: HashMap::from([("pack-small".to_string(), 20_u32)]),
        }),
        invoices.clone(),
        Arc::new(CountingNotifier {
            calls: AtomicUsize::new(0),
        }),
        audit.clone(),
    ));
    let processor = Arc::new(CallbackProcessor::new(
        gateway_config,
        idempotency,
        lifecycle,
        audit.clone(),
    ));

    Harness {
        processor,
        store,
        ledger,
        invoices,
        audit,
    }
}

async fn seed_payment(store: &InMemoryStore, id: &str) {
    PaymentStore::insert(
        store,
        PaymentRecord::new(id, "u1", "pack-small", Decimal::from(100)),
    )
    .await
    .unwrap();
}

fn signed_callback(payment_id: &str, transaction_id: &str, result_code: &str) -> CallbackPayload {
    let mut payload = CallbackPayload {
        payment_id: payment_id.to_string(),
        transaction_id: transaction_id.to_string(),
        result_code: result_code.to_string(),
        amount: Decimal::from(100),
        signature: String::new(),
    };
    payload.signature = sign_payload(&payload, SECRET).unwrap();
    payload
}

#[tokio::test]
async fn successful_callback_credits_the_user_once() {
    let h = harness();
    seed_payment(&h.store, "p1").await;

    let response = h
        .processor
        .process_callback(
            &signed_callback("p1", "T1", "0"),
            &RequestProvenance::default(),
        )
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(response.payment_status, Some(PaymentStatus::Succeeded));
    assert_eq!(h.ledger.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.ledger.credited.load(Ordering::SeqCst), 20);
    assert_eq!(h.invoices.calls.load(Ordering::SeqCst), 1);

    let record = PaymentStore::get(&*h.store, "p1").await.unwrap().unwrap();
    assert_eq!(record.status, PaymentStatus::Succeeded);
    assert_eq!(record.transaction_id.as_deref(), Some("T1"));
}

#[tokio::test]
async fn duplicate_delivery_replays_without_recrediting() {
    let h = harness();
    seed_payment(&h.store, "p1").await;
    let payload = signed_callback("p1", "T1", "0");

    let first = h
        .processor
        .process_callback(&payload, &RequestProvenance::default())
        .await
        .unwrap();
    let second = h
        .processor
        .process_callback(&payload, &RequestProvenance::default())
        .await
        .unwrap();

    // Both deliveries observe the same stored outcome.
    assert_eq!(first, second);
    assert_eq!(h.ledger.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.ledger.credited.load(Ordering::SeqCst), 20);
}

#[tokio::test]
async fn concurrent_duplicate_deliveries_credit_exactly_once() {
    let h = harness();
    seed_payment(&h.store, "p1").await;
    let payload = signed_callback("p1", "T1", "0");

    let a = {
        let processor = h.processor.clone();
        let payload = payload.clone();
        tokio::spawn(async move {
            processor
                .process_callback(&payload, &RequestProvenance::default())
                .await
        })
    };
    let b = {
        let processor = h.processor.clone();
        let payload = payload.clone();
        tokio::spawn(async move {
            processor
                .process_callback(&payload, &RequestProvenance::default())
                .await
        })
    };

    let (a, b) = (a.await.unwrap(), b.await.unwrap());
    assert!(a.is_ok());
    assert!(b.is_ok());
    assert_eq!(h.ledger.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn timed_out_delivery_still_credits_exactly_once() -> anyhow::Result<()> {
    // A ledger slower than the request timeout must not strand the payment
    // half-applied: the delivery times out but the work keeps running.
    let h = harness_with(1, Duration::from_secs(2));
    seed_payment(&h.store, "p1").await;
    let payload = signed_callback("p1", "T1", "0");

    let err = h
        .processor
        .process_callback(&payload, &RequestProvenance::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CallbackError::OperationTimeout { .. }));
    assert!(err.is_retryable());
    assert_eq!(h.ledger.calls.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_millis(2500)).await;
    let record = PaymentStore::get(&*h.store, "p1")
        .await?
        .ok_or_else(|| anyhow::anyhow!("payment p1 disappeared"))?;
    assert_eq!(record.status, PaymentStatus::Succeeded);
    assert_eq!(h.ledger.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.ledger.credited.load(Ordering::SeqCst), 20);

    // A gateway retry replays the settled success without re-crediting.
    let response = h
        .processor
        .process_callback(&payload, &RequestProvenance::default())
        .await?;
    assert!(response.success);
    assert_eq!(response.payment_status, Some(PaymentStatus::Succeeded));
    assert_eq!(h.ledger.calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn forged_signature_is_rejected_before_any_processing() {
    let h = harness();
    seed_payment(&h.store, "p1").await;

    let mut payload = signed_callback("p1", "T1", "0");
    payload.amount = Decimal::from(1); // tamper after signing

    let err = h
        .processor
        .process_callback(
            &payload,
            &RequestProvenance {
                ip_address: Some("203.0.113.9".to_string()),
                user_agent: Some("curl/8.0".to_string()),
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CallbackError::InvalidSignature));
    assert_eq!(h.ledger.calls.load(Ordering::SeqCst), 0);

    let record = PaymentStore::get(&*h.store, "p1").await.unwrap().unwrap();
    assert_eq!(record.status, PaymentStatus::Pending);

    let incidents: Vec<_> = h
        .audit
        .recent(10)
        .into_iter()
        .filter(|e| e.event == "invalid_callback_signature")
        .collect();
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].level, AuditLevel::Critical);
    assert_eq!(incidents[0].ip_address.as_deref(), Some("203.0.113.9"));
}

#[tokio::test]
async fn declined_callback_fails_the_payment_with_user_facing_text() {
    let h = harness();
    seed_payment(&h.store, "p1").await;

    let response = h
        .processor
        .process_callback(
            &signed_callback("p1", "T1", "51"),
            &RequestProvenance::default(),
        )
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(response.payment_status, Some(PaymentStatus::Failed));
    assert_eq!(
        response.message,
        "Insufficient funds. Please try a different card."
    );
    assert_eq!(h.ledger.calls.load(Ordering::SeqCst), 0);

    let record = PaymentStore::get(&*h.store, "p1").await.unwrap().unwrap();
    assert_eq!(record.status, PaymentStatus::Failed);
}

#[tokio::test]
async fn late_failure_cannot_downgrade_a_succeeded_payment() {
    let h = harness();
    seed_payment(&h.store, "p1").await;

    h.processor
        .process_callback(
            &signed_callback("p1", "T1", "0"),
            &RequestProvenance::default(),
        )
        .await
        .unwrap();

    // A different provider transaction reports failure for the same payment.
    let response = h
        .processor
        .process_callback(
            &signed_callback("p1", "T2", "51"),
            &RequestProvenance::default(),
        )
        .await
        .unwrap();

    assert!(!response.success);
    assert_eq!(response.message, "Cannot mark succeeded payment as failed.");
    assert_eq!(response.payment_status, Some(PaymentStatus::Succeeded));

    let record = PaymentStore::get(&*h.store, "p1").await.unwrap().unwrap();
    assert_eq!(record.status, PaymentStatus::Succeeded);
    assert_eq!(h.ledger.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn reused_transaction_id_with_different_payload_is_a_collision() {
    let h = harness();
    seed_payment(&h.store, "p1").await;
    seed_payment(&h.store, "p2").await;

    h.processor
        .process_callback(
            &signed_callback("p1", "T1", "0"),
            &RequestProvenance::default(),
        )
        .await
        .unwrap();

    // Same provider transaction id, different payment: either a client bug
    // or a replay attack.
    let err = h
        .processor
        .process_callback(
            &signed_callback("p2", "T1", "0"),
            &RequestProvenance::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CallbackError::KeyCollision { .. }));
    // Technical detail never reaches the end user.
    assert_eq!(
        err.user_message(),
        "Payment processing failed. Please contact support"
    );
    // The second payment was never touched.
    let record = PaymentStore::get(&*h.store, "p2").await.unwrap().unwrap();
    assert_eq!(record.status, PaymentStatus::Pending);
    assert_eq!(h.ledger.calls.load(Ordering::SeqCst), 1);

    let incidents: Vec<_> = h
        .audit
        .recent(20)
        .into_iter()
        .filter(|e| e.event == "idempotency_key_collision")
        .collect();
    assert_eq!(incidents.len(), 1);
}

#[tokio::test]
async fn duplicate_failure_deliveries_settle_on_one_stored_outcome() {
    let h = harness();
    seed_payment(&h.store, "p1").await;
    let payload = signed_callback("p1", "T1", "54");

    let first = h
        .processor
        .process_callback(&payload, &RequestProvenance::default())
        .await
        .unwrap();
    let second = h
        .processor
        .process_callback(&payload, &RequestProvenance::default())
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(first.payment_status, Some(PaymentStatus::Failed));
}

#[tokio::test]
async fn audit_report_reflects_processed_callbacks() {
    let h = harness();
    seed_payment(&h.store, "p1").await;
    seed_payment(&h.store, "p2").await;
    let start = chrono::Utc::now() - chrono::Duration::minutes(1);

    h.processor
        .process_callback(
            &signed_callback("p1", "T1", "0"),
            &RequestProvenance::default(),
        )
        .await
        .unwrap();
    h.processor
        .process_callback(
            &signed_callback("p2", "T2", "51"),
            &RequestProvenance::default(),
        )
        .await
        .unwrap();

    let report = h
        .audit
        .report(start, chrono::Utc::now() + chrono::Duration::minutes(1));
    assert_eq!(report.successes, 1);
    assert_eq!(report.failures, 1);
    assert_eq!(report.security_incidents, 0);

    let csv = h
        .audit
        .export_csv(start, chrono::Utc::now() + chrono::Duration::minutes(1));
    assert!(csv.lines().next().unwrap().starts_with("timestamp,level"));
    assert!(csv.contains("payment_succeeded"));
    assert!(csv.contains("payment_failed"));
}
