//! Integration tests for the submission flow.
//!
//! Every test runs against its own SQLite file, upload directory and work
//! directory inside a `tempfile` sandbox. The print backend is scripted; the
//! office converter is a shell script standing in for `soffice` (unix only).

use async_trait::async_trait;
use printmeter::pipeline::text::render_pdf;
use printmeter::store::TopupKind;
use printmeter::{
    Account, DispatchError, DispatchRequest, Identity, JobFilter, JobStatus, NewAccount,
    PrintBackend, PrintConfig, PrintError, PrintRequest, PrintService, RefundOutcome, Role, Store,
    Upload,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio_test::{assert_err, assert_ok};

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Backend that accepts or refuses every job and records what it saw.
#[derive(Default)]
struct ScriptedBackend {
    fail_with: Option<DispatchError>,
    delay: Option<Duration>,
    entered: Notify,
    seen: Mutex<Vec<DispatchRequest>>,
    accepted: AtomicUsize,
}

impl ScriptedBackend {
    fn accepting() -> Self {
        Self::default()
    }

    fn failing(detail: &str) -> Self {
        Self {
            fail_with: Some(DispatchError::Rejected {
                detail: detail.to_string(),
            }),
            ..Self::default()
        }
    }

    fn seen(&self) -> Vec<DispatchRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl PrintBackend for ScriptedBackend {
    async fn submit(&self, req: &DispatchRequest) -> Result<String, DispatchError> {
        assert!(req.file.is_file(), "dispatched file must exist: {}", req.file.display());
        self.seen.lock().unwrap().push(req.clone());
        self.entered.notify_one();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.fail_with {
            Some(e) => Err(e.clone()),
            None => {
                let n = self.accepted.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(format!("{}-{n}", req.printer))
            }
        }
    }
}

struct Harness {
    _sandbox: TempDir,
    upload_dir: PathBuf,
    work_dir: PathBuf,
    backend: Arc<ScriptedBackend>,
    service: PrintService,
}

fn harness(backend: ScriptedBackend) -> Harness {
    harness_with(backend, |b| b)
}

fn harness_with(
    backend: ScriptedBackend,
    tweak: impl FnOnce(printmeter::PrintConfigBuilder) -> printmeter::PrintConfigBuilder,
) -> Harness {
    let sandbox = tempfile::tempdir().unwrap();
    let upload_dir = sandbox.path().join("uploads");
    let work_dir = sandbox.path().join("work");
    let store = Store::open(sandbox.path().join("printmeter.db")).unwrap();
    let config = tweak(
        PrintConfig::builder()
            .upload_dir(&upload_dir)
            .work_dir(&work_dir)
            .dispatch_timeout_secs(10),
    )
    .build()
    .unwrap();
    let backend = Arc::new(backend);
    let service = PrintService::new(store, backend.clone(), config);
    Harness {
        _sandbox: sandbox,
        upload_dir,
        work_dir,
        backend,
        service,
    }
}

impl Harness {
    async fn account(&self, username: &str, balance: i64, monthly: i64) -> (Identity, Account) {
        let account = self
            .service
            .create_account(NewAccount {
                username: username.into(),
                role: Role::User,
                balance_cents: balance,
                monthly_limit_cents: monthly,
                yearly_limit_cents: 0,
            })
            .await
            .unwrap();
        let identity = Identity {
            user_id: account.id,
            username: account.username.clone(),
            role: account.role,
        };
        (identity, account)
    }

    async fn balance(&self, id: &Identity) -> Account {
        self.service.account(id.user_id).await.unwrap()
    }

    async fn jobs(&self) -> Vec<printmeter::PrintJob> {
        let admin = Identity {
            user_id: 0,
            username: "root".into(),
            role: Role::Admin,
        };
        self.service
            .list_jobs(&admin, JobFilter::default())
            .await
            .unwrap()
    }
}

/// A real PDF with `pages` pages.
fn pdf_bytes(pages: usize) -> Vec<u8> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fixture.pdf");
    let content: Vec<Vec<String>> = (1..=pages).map(|i| vec![format!("page {i}")]).collect();
    render_pdf(&content, &path).unwrap();
    std::fs::read(&path).unwrap()
}

fn files_under(dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return out;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            out.extend(files_under(&path));
        } else {
            out.push(path);
        }
    }
    out
}

// ── Happy path ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn pdf_is_charged_and_printed() {
    let h = harness(ScriptedBackend::accepting());
    let (dana, _) = h.account("dana", 500, 0).await;

    let upload = Upload::new("report.pdf", pdf_bytes(5));
    let printed = assert_ok!(
        h.service
            .submit(&dana, &upload, &PrintRequest::new("office"))
            .await
    );

    assert!(printed.ok);
    assert_eq!(printed.job_id, "office-1");
    assert_eq!(printed.pages, 5);
    assert_eq!(printed.cost_cents, 50);
    assert_eq!(printed.balance_cents, 450);
    assert_eq!(printed.month_spent_cents, 50);
    assert!(!printed.is_duplex);

    let account = h.balance(&dana).await;
    assert_eq!(account.balance_cents, 450);
    assert_eq!(account.year_spent_cents, 50);

    let jobs = h.jobs().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Printed);
    assert_eq!(jobs[0].backend_job_id.as_deref(), Some("office-1"));
    assert_eq!(jobs[0].balance_before_cents, 500);
    assert_eq!(jobs[0].balance_after_cents, 450);

    // The stored upload outlives the request once billed.
    let stored = h.upload_dir.join(&jobs[0].stored_path);
    assert!(stored.is_file(), "missing {}", stored.display());

    let seen = h.backend.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].mime, "application/pdf");
    assert_eq!(seen[0].username, "dana");
    assert_eq!(seen[0].filename, "report.pdf");
}

#[tokio::test]
async fn print_options_reach_backend_and_record() {
    let h = harness(ScriptedBackend::accepting());
    let (dana, _) = h.account("dana", 1000, 0).await;

    let request = PrintRequest {
        color: true,
        copies: 3,
        page_range: Some("2-3".into()),
        sides: printmeter::Sides::TwoSidedShortEdge,
        ..PrintRequest::new("lobby")
    };
    let printed = assert_ok!(
        h.service
            .submit(&dana, &Upload::new("deck.pdf", pdf_bytes(4)), &request)
            .await
    );
    // Colour rate, copies not billed.
    assert_eq!(printed.cost_cents, 4 * 30);
    assert!(printed.is_color);
    assert!(printed.is_duplex);

    let seen = &h.backend.seen()[0];
    assert_eq!(seen.copies, 3);
    assert_eq!(seen.page_range.as_deref(), Some("2-3"));
    assert!(seen.color);

    let job = &h.jobs().await[0];
    assert_eq!(job.sides, "two-sided-short-edge");
    assert_eq!(job.copies, 3);
    assert!(job.is_color);
}

#[tokio::test]
async fn text_upload_is_estimated_and_printed_as_pdf() {
    let h = harness(ScriptedBackend::accepting());
    let (dana, _) = h.account("dana", 500, 0).await;
    let body: String = (0..130).map(|i| format!("line {i}\n")).collect();

    let est = assert_ok!(
        h.service
            .estimate(&dana, &Upload::new("notes.txt", body.clone().into_bytes()), false)
            .await
    );
    assert!(est.estimated);
    assert_eq!(est.pages, 3);

    let printed = assert_ok!(
        h.service
            .submit(
                &dana,
                &Upload::new("notes.txt", body.into_bytes()),
                &PrintRequest::new("office")
            )
            .await
    );
    assert_eq!(printed.pages, 3);
    assert_eq!(h.backend.seen()[0].mime, "application/pdf");
    // Converted intermediates are gone once settled.
    assert!(files_under(&h.work_dir).is_empty());
}

// ── Constraints ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn insufficient_balance_is_flagged_and_rejected() {
    let h = harness(ScriptedBackend::accepting());
    let (dana, _) = h.account("dana", 20, 0).await;
    let upload = Upload::new("report.pdf", pdf_bytes(5));

    let est = assert_ok!(h.service.estimate(&dana, &upload, false).await);
    assert_eq!(est.cost_cents, 50);
    assert_eq!(est.balance_cents, 20);
    assert!(est.insufficient_balance);
    assert!(!est.would_exceed_monthly);

    let err = assert_err!(
        h.service
            .submit(&dana, &upload, &PrintRequest::new("office"))
            .await
    );
    assert!(matches!(err, PrintError::InsufficientBalance { .. }), "{err:?}");
    assert_eq!(err.status_code(), 402);

    assert_eq!(h.balance(&dana).await.balance_cents, 20);
    assert!(h.jobs().await.is_empty());
    assert!(h.backend.seen().is_empty());
    assert!(files_under(&h.upload_dir).is_empty());
}

#[tokio::test]
async fn monthly_limit_is_enforced() {
    let h = harness(ScriptedBackend::accepting());
    let (dana, _) = h.account("dana", 10_000, 100).await;

    assert_ok!(
        h.service
            .submit(&dana, &Upload::new("a.pdf", pdf_bytes(8)), &PrintRequest::new("p"))
            .await
    );
    assert_eq!(h.balance(&dana).await.month_spent_cents, 80);

    let upload = Upload::new("b.pdf", pdf_bytes(3));
    let est = assert_ok!(h.service.estimate(&dana, &upload, false).await);
    assert!(est.would_exceed_monthly);
    assert!(!est.insufficient_balance);

    let err = assert_err!(h.service.submit(&dana, &upload, &PrintRequest::new("p")).await);
    match err {
        PrintError::MonthlyLimitExceeded {
            spent_cents,
            cost_cents,
            limit_cents,
        } => assert_eq!((spent_cents, cost_cents, limit_cents), (80, 30, 100)),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(h.jobs().await.len(), 1);
}

#[tokio::test]
async fn estimate_never_mutates() {
    let h = harness(ScriptedBackend::accepting());
    let (dana, before) = h.account("dana", 500, 0).await;

    for _ in 0..3 {
        assert_ok!(
            h.service
                .estimate(&dana, &Upload::new("r.pdf", pdf_bytes(2)), true)
                .await
        );
    }

    let after = h.balance(&dana).await;
    assert_eq!(after.balance_cents, before.balance_cents);
    assert_eq!(after.month_spent_cents, before.month_spent_cents);
    assert_eq!(after.updated_at, before.updated_at);
    assert!(h.jobs().await.is_empty());
    assert!(files_under(&h.upload_dir).is_empty());
    assert!(files_under(&h.work_dir).is_empty());
}

#[tokio::test]
async fn out_of_range_copies_are_rejected_before_anything_happens() {
    let h = harness(ScriptedBackend::accepting());
    let (dana, _) = h.account("dana", 500, 0).await;
    let upload = Upload::new("r.pdf", pdf_bytes(2));

    for copies in [0, 101] {
        let request = PrintRequest {
            copies,
            ..PrintRequest::new("office")
        };
        let err = assert_err!(h.service.submit(&dana, &upload, &request).await);
        assert!(matches!(err, PrintError::InvalidCopies { max: 100, .. }), "{err:?}");
        assert_eq!(err.status_code(), 400);
    }

    let err = assert_err!(h.service.submit(&dana, &upload, &PrintRequest::new("  ")).await);
    assert!(matches!(err, PrintError::MissingField { field: "printer" }), "{err:?}");

    assert_eq!(h.balance(&dana).await.balance_cents, 500);
    assert!(h.jobs().await.is_empty());
    assert!(h.backend.seen().is_empty());
    assert!(files_under(&h.upload_dir).is_empty());
}

// ── Compensation ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn dispatch_failure_refunds_and_marks_failed() {
    let h = harness(ScriptedBackend::failing("printer on fire"));
    let (dana, _) = h.account("dana", 500, 1000).await;

    let err = assert_err!(
        h.service
            .submit(&dana, &Upload::new("r.pdf", pdf_bytes(5)), &PrintRequest::new("office"))
            .await
    );
    let job_id = match &err {
        PrintError::DispatchFailed { job_id, source } => {
            assert!(source.to_string().contains("printer on fire"));
            *job_id
        }
        other => panic!("unexpected {other:?}"),
    };

    let account = h.balance(&dana).await;
    assert_eq!(account.balance_cents, 500);
    assert_eq!(account.month_spent_cents, 0);
    assert_eq!(account.year_spent_cents, 0);

    let jobs = h.jobs().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].id, job_id);
    assert_eq!(jobs[0].status, JobStatus::Failed);
    assert_eq!(jobs[0].backend_job_id, None);

    let topups = h.service.topups(dana.user_id).await.unwrap();
    assert_eq!(topups.len(), 1);
    assert_eq!(topups[0].kind, TopupKind::Refund);
    assert_eq!(topups[0].amount_cents, 50);
    assert_eq!(topups[0].job_id, Some(job_id));

    // Compensating again changes nothing.
    let again = assert_ok!(h.service.refund_job(job_id).await);
    assert_eq!(again, RefundOutcome::AlreadySettled(JobStatus::Failed));
    assert_eq!(h.balance(&dana).await.balance_cents, 500);
}

#[tokio::test]
async fn printed_job_cannot_be_refunded() {
    let h = harness(ScriptedBackend::accepting());
    let (dana, _) = h.account("dana", 500, 0).await;
    assert_ok!(
        h.service
            .submit(&dana, &Upload::new("r.pdf", pdf_bytes(1)), &PrintRequest::new("p"))
            .await
    );
    let job_id = h.jobs().await[0].id;
    let outcome = assert_ok!(h.service.refund_job(job_id).await);
    assert_eq!(outcome, RefundOutcome::AlreadySettled(JobStatus::Printed));
    assert_eq!(h.balance(&dana).await.balance_cents, 490);
}

#[tokio::test]
async fn refund_ledger_row_is_optional() {
    let h = harness_with(ScriptedBackend::failing("offline"), |b| b.record_refunds(false));
    let (dana, _) = h.account("dana", 500, 0).await;
    assert_err!(
        h.service
            .submit(&dana, &Upload::new("r.pdf", pdf_bytes(2)), &PrintRequest::new("p"))
            .await
    );
    assert_eq!(h.balance(&dana).await.balance_cents, 500);
    assert!(h.service.topups(dana.user_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn dispatch_timeout_is_compensated() {
    let backend = ScriptedBackend {
        delay: Some(Duration::from_secs(30)),
        ..ScriptedBackend::default()
    };
    let h = harness_with(backend, |b| b.dispatch_timeout_secs(1));
    let (dana, _) = h.account("dana", 500, 0).await;

    let err = assert_err!(
        h.service
            .submit(&dana, &Upload::new("r.pdf", pdf_bytes(2)), &PrintRequest::new("p"))
            .await
    );
    assert!(
        matches!(
            err,
            PrintError::DispatchFailed {
                source: DispatchError::Timeout { secs: 1 },
                ..
            }
        ),
        "{err:?}"
    );
    assert_eq!(h.balance(&dana).await.balance_cents, 500);
    assert_eq!(h.jobs().await[0].status, JobStatus::Failed);
}

#[tokio::test]
async fn refund_is_refused_while_dispatch_is_running() {
    let backend = ScriptedBackend {
        delay: Some(Duration::from_millis(500)),
        ..ScriptedBackend::default()
    };
    let h = harness(backend);
    let (dana, _) = h.account("dana", 500, 0).await;
    let upload = Upload::new("r.pdf", pdf_bytes(5));
    let request = PrintRequest::new("office");

    let (printed, refund) = tokio::join!(h.service.submit(&dana, &upload, &request), async {
        h.backend.entered.notified().await;
        let job_id = h.jobs().await[0].id;
        h.service.refund_job(job_id).await
    });

    let err = assert_err!(refund);
    assert!(matches!(err, PrintError::JobInFlight { .. }), "{err:?}");
    assert_eq!(err.status_code(), 409);

    let printed = assert_ok!(printed);
    assert!(printed.ok);
    let jobs = h.jobs().await;
    assert_eq!(jobs[0].status, JobStatus::Printed);
    assert_eq!(jobs[0].backend_job_id.as_deref(), Some("office-1"));
    assert_eq!(h.balance(&dana).await.balance_cents, 450);
    assert!(h.service.topups(dana.user_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn stuck_job_is_refundable_after_the_window() {
    let h = harness_with(ScriptedBackend::accepting(), |b| {
        b.dispatch_timeout_secs(1).settle_grace_secs(0)
    });
    let (dana, _) = h.account("dana", 500, 0).await;

    // A debit whose settlement never ran.
    let charge = printmeter::ledger::ChargeRequest {
        account_id: dana.user_id,
        pages: 4,
        color: false,
        printer: "office".into(),
        filename: "lost.pdf".into(),
        stored_path: "lost.pdf".into(),
        sides: "one-sided".into(),
        is_duplex: false,
        copies: 1,
        page_range: None,
    };
    let period = printmeter::Period::current();
    let charged = h
        .service
        .store()
        .write(move |tx| printmeter::ledger::charge(tx, &charge, &period))
        .await
        .unwrap();
    assert_eq!(h.balance(&dana).await.balance_cents, 460);

    let err = assert_err!(h.service.refund_job(charged.job_id).await);
    assert!(matches!(err, PrintError::JobInFlight { .. }), "{err:?}");

    tokio::time::sleep(Duration::from_millis(1100)).await;
    let outcome = assert_ok!(h.service.refund_job(charged.job_id).await);
    assert_eq!(
        outcome,
        RefundOutcome::Refunded {
            amount_cents: 40,
            balance_after_cents: 500
        }
    );
    assert_eq!(h.jobs().await[0].status, JobStatus::Failed);
}

#[tokio::test]
async fn abandoned_request_still_settles() {
    let backend = ScriptedBackend {
        delay: Some(Duration::from_millis(200)),
        ..ScriptedBackend::default()
    };
    let h = harness(backend);
    let (dana, _) = h.account("dana", 500, 0).await;

    let upload = Upload::new("r.pdf", pdf_bytes(3));
    let request = PrintRequest::new("office");
    // Drop the request future as soon as the backend has the job.
    tokio::select! {
        _ = h.service.submit(&dana, &upload, &request) => panic!("submit finished before dispatch"),
        _ = h.backend.entered.notified() => {}
    }

    let mut status = None;
    for _ in 0..100 {
        let jobs = h.jobs().await;
        if let Some(job) = jobs.first().filter(|j| j.status != JobStatus::Queued) {
            status = Some(job.status);
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(status, Some(JobStatus::Printed));
    assert_eq!(h.balance(&dana).await.balance_cents, 470);
}

// ── Concurrency ──────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submissions_debit_exactly_once_each() {
    let h = harness(ScriptedBackend::accepting());
    let (dana, _) = h.account("dana", 1000, 0).await;

    let uploads: Vec<Upload> = (0..10)
        .map(|i| Upload::new(format!("doc-{i}.pdf"), pdf_bytes(2)))
        .collect();
    let request = PrintRequest::new("office");
    let results = futures::future::join_all(
        uploads
            .iter()
            .map(|u| h.service.submit(&dana, u, &request)),
    )
    .await;

    for r in &results {
        assert!(r.is_ok(), "{r:?}");
    }
    let account = h.balance(&dana).await;
    assert_eq!(account.balance_cents, 1000 - 10 * 20);
    assert_eq!(account.month_spent_cents, 200);

    let jobs = h.jobs().await;
    assert_eq!(jobs.len(), 10);
    assert!(jobs.iter().all(|j| j.status == JobStatus::Printed));
    let mut paths: Vec<_> = jobs.iter().map(|j| j.stored_path.clone()).collect();
    paths.sort();
    paths.dedup();
    assert_eq!(paths.len(), 10, "stored uploads must not collide");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submissions_never_overdraw() {
    let h = harness(ScriptedBackend::accepting());
    let (dana, _) = h.account("dana", 50, 0).await;

    let uploads: Vec<Upload> = (0..5)
        .map(|i| Upload::new(format!("doc-{i}.pdf"), pdf_bytes(2)))
        .collect();
    let request = PrintRequest::new("office");
    let results = futures::future::join_all(
        uploads
            .iter()
            .map(|u| h.service.submit(&dana, u, &request)),
    )
    .await;

    let ok = results.iter().filter(|r| r.is_ok()).count();
    let refused = results
        .iter()
        .filter(|r| matches!(r, Err(PrintError::InsufficientBalance { .. })))
        .count();
    assert_eq!((ok, refused), (2, 3));
    assert_eq!(h.balance(&dana).await.balance_cents, 10);
    assert_eq!(h.jobs().await.len(), 2);
}

// ── Visibility and top-ups ───────────────────────────────────────────────────

#[tokio::test]
async fn users_only_see_their_own_jobs() {
    let h = harness(ScriptedBackend::accepting());
    let (dana, _) = h.account("dana", 500, 0).await;
    let (eli, _) = h.account("eli", 500, 0).await;
    for who in [&dana, &eli, &eli] {
        assert_ok!(
            h.service
                .submit(who, &Upload::new("r.pdf", pdf_bytes(1)), &PrintRequest::new("p"))
                .await
        );
    }

    let sneaky = JobFilter {
        account_id: Some(eli.user_id),
        ..JobFilter::default()
    };
    let visible = h.service.list_jobs(&dana, sneaky).await.unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].username, "dana");
    assert_eq!(h.jobs().await.len(), 3);
}

#[tokio::test]
async fn topup_appends_manual_row() {
    let h = harness(ScriptedBackend::accepting());
    let (dana, _) = h.account("dana", 100, 0).await;

    let record = assert_ok!(h.service.topup(dana.user_id, 250, "frontdesk").await);
    assert_eq!(record.kind, TopupKind::Manual);
    assert_eq!(record.balance_before_cents, 100);
    assert_eq!(record.balance_after_cents, 350);
    assert_eq!(h.balance(&dana).await.balance_cents, 350);

    let err = assert_err!(h.service.topup(dana.user_id, 0, "frontdesk").await);
    assert!(matches!(err, PrintError::InvalidField { field: "amount", .. }));
    let err = assert_err!(h.service.topup(9999, 10, "frontdesk").await);
    assert!(matches!(err, PrintError::AccountNotFound { .. }));
}

// ── Office conversion (fake soffice) ─────────────────────────────────────────

#[cfg(unix)]
mod office {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn fake_soffice(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("soffice");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// Copies the input (already a PDF) to `<outdir>/<stem>.pdf`.
    const COPYING: &str = r#"
outdir=""
input=""
while [ $# -gt 0 ]; do
  case "$1" in
    --outdir) outdir="$2"; shift 2 ;;
    *) input="$1"; shift ;;
  esac
done
name=$(basename "$input")
cp "$input" "$outdir/${name%.*}.pdf"
"#;

    #[tokio::test]
    async fn office_document_is_converted_and_counted() {
        let bin = tempfile::tempdir().unwrap();
        let soffice = fake_soffice(bin.path(), COPYING);
        let h = harness_with(ScriptedBackend::accepting(), |b| b.soffice_path(&soffice));
        let (dana, _) = h.account("dana", 500, 0).await;

        let printed = assert_ok!(
            h.service
                .submit(
                    &dana,
                    &Upload::new("thesis.docx", pdf_bytes(7)),
                    &PrintRequest::new("office")
                )
                .await
        );
        assert_eq!(printed.pages, 7);
        assert_eq!(printed.cost_cents, 70);
        assert_eq!(h.backend.seen()[0].mime, "application/pdf");
        assert!(files_under(&h.work_dir).is_empty());
    }

    #[tokio::test]
    async fn conversion_timeout_leaves_no_trace() {
        let bin = tempfile::tempdir().unwrap();
        let soffice = fake_soffice(bin.path(), "exec sleep 30");
        let h = harness_with(ScriptedBackend::accepting(), |b| {
            b.soffice_path(&soffice).convert_timeout_secs(1)
        });
        let (dana, _) = h.account("dana", 500, 0).await;

        let err = assert_err!(
            h.service
                .submit(
                    &dana,
                    &Upload::new("slow.odt", b"PK not really".to_vec()),
                    &PrintRequest::new("office")
                )
                .await
        );
        assert!(matches!(err, PrintError::ConversionTimeout { secs: 1 }), "{err:?}");
        assert_eq!(err.status_code(), 400);

        assert!(h.jobs().await.is_empty());
        assert_eq!(h.balance(&dana).await.balance_cents, 500);
        assert!(files_under(&h.work_dir).is_empty());
        assert!(files_under(&h.upload_dir).is_empty());
        assert!(h.backend.seen().is_empty());
    }

    #[tokio::test]
    async fn converter_failure_is_rejected() {
        let bin = tempfile::tempdir().unwrap();
        let soffice = fake_soffice(bin.path(), "echo 'general error' >&2\nexit 77");
        let h = harness_with(ScriptedBackend::accepting(), |b| b.soffice_path(&soffice));
        let (dana, _) = h.account("dana", 500, 0).await;

        let err = assert_err!(
            h.service
                .estimate(&dana, &Upload::new("x.pptx", b"PK".to_vec()), false)
                .await
        );
        match err {
            PrintError::ConversionFailed { detail, .. } => {
                assert!(detail.contains("general error"), "{detail}")
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
