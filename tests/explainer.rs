//! Integration tests for the document explainer.
//!
//! Every collaborator with I/O is replaced by an in-process fake: a scripted
//! language model, a canned OCR engine, an in-memory blob store, and a
//! manual clock. Uploads are PNG images so the pdfium path is not needed.
//!
//! Run with:
//!   cargo test --test explainer

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use docexplain::{
    AnalysisStore, AnonymousIdentity, BlobStore, ClientInfo, DocumentExplainer, DocumentSession,
    ExplainError, ExplainProgressCallback, ExplainerConfig, Gated, IdentityResolver,
    LanguageModel, LlmReply, LlmRequest, ManualClock, MemoryStore, OcrEngine, SessionTokenIdentity,
    SqliteAnalysisStore, Upload,
};
use image::{DynamicImage, Rgba, RgbaImage};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// ── Fakes ────────────────────────────────────────────────────────────────────

const ANALYSIS_JSON: &str = r#"{
  "summary": "Your landlord raises the rent from 1 April.",
  "important_points": ["New rent is 850 EUR", "Based on the local rent index"],
  "deadlines": ["Consent requested by 31 March"],
  "obligations": ["Pay the new rent from April"],
  "risks": ["Landlord may sue for consent"],
  "recommended_next_steps": ["Check the rent index"],
  "action_items": ["Compare with the Mietspiegel", "Reply in writing"],
  "confidence": "high"
}"#;

/// Replies from a queue; when the queue is empty, answers chat questions.
#[derive(Default)]
struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String, ExplainError>>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedModel {
    fn with(replies: Vec<Result<&str, ExplainError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().map(|r| r.map(str::to_string)).collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn push(&self, reply: &str) {
        self.replies.lock().unwrap().push_back(Ok(reply.to_string()));
    }

    fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmReply, ExplainError> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self.replies.lock().unwrap().pop_front();
        let content = match next {
            Some(r) => r?,
            None => format!(
                "Answer: {}",
                request.messages.last().map(|m| m.content.as_str()).unwrap_or("")
            ),
        };
        Ok(LlmReply {
            content,
            ..Default::default()
        })
    }
}

struct CannedOcr(&'static str);

impl OcrEngine for CannedOcr {
    fn recognize(&self, _image: &DynamicImage) -> Result<String, ExplainError> {
        Ok(self.0.to_string())
    }
}

#[derive(Default)]
struct MemoryBlobs {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl BlobStore for MemoryBlobs {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn upload(&self, bytes: &[u8], filename: &str, _content_type: &str) -> Option<String> {
        let key = format!("documents/test-{filename}");
        self.objects.lock().unwrap().insert(key.clone(), bytes.to_vec());
        Some(key)
    }

    async fn download(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    async fn delete(&self, key: &str) -> bool {
        self.objects.lock().unwrap().remove(key).is_some()
    }
}

struct BrokenStore;

impl AnalysisStore for BrokenStore {
    fn save(&self, _record: &docexplain::store::NewAnalysis<'_>) -> Result<i64, ExplainError> {
        Err(ExplainError::Store("disk full".into()))
    }

    fn list_all(&self) -> Result<Vec<docexplain::StoredAnalysis>, ExplainError> {
        Ok(Vec::new())
    }

    fn delete_all(&self) -> Result<docexplain::store::DeleteSummary, ExplainError> {
        Ok(Default::default())
    }
}

#[derive(Default)]
struct Warnings(Mutex<Vec<String>>);

impl ExplainProgressCallback for Warnings {
    fn on_warning(&self, message: &str) {
        self.0.lock().unwrap().push(message.to_string());
    }
}

// ── Harness ──────────────────────────────────────────────────────────────────

struct Harness {
    explainer: DocumentExplainer,
    model: Arc<ScriptedModel>,
    store: Arc<SqliteAnalysisStore>,
    blobs: Arc<MemoryBlobs>,
    clock: Arc<ManualClock>,
    warnings: Arc<Warnings>,
    _dir: TempDir,
}

async fn harness(config: ExplainerConfig, model: Arc<ScriptedModel>, ocr_text: &'static str) -> Harness {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteAnalysisStore::open_in_memory().unwrap());
    let blobs = Arc::new(MemoryBlobs::default());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 6, 3, 8, 0, 0).unwrap(),
    ));
    let warnings = Arc::new(Warnings::default());
    let identity = IdentityResolver::new(AnonymousIdentity::new(dir.path().join(".user_id")))
        .with_strategy(SessionTokenIdentity);

    let explainer = DocumentExplainer::builder()
        .config(config)
        .model(model.clone())
        .ocr(Arc::new(CannedOcr(ocr_text)))
        .analysis_store(store.clone())
        .blob_store(blobs.clone())
        .rate_limit_store(Arc::new(MemoryStore::new()))
        .clock(clock.clone())
        .identity(identity)
        .progress_callback(warnings.clone())
        .build()
        .await
        .unwrap();

    Harness {
        explainer,
        model,
        store,
        blobs,
        clock,
        warnings,
        _dir: dir,
    }
}

fn png_upload(name: &str) -> Upload {
    let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([255, 255, 255, 255])));
    let mut bytes = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    Upload::new(name, bytes)
}

fn session(token: &str) -> DocumentSession {
    DocumentSession::new(ClientInfo::new().with_session_token(token))
}

fn config() -> ExplainerConfig {
    ExplainerConfig::builder()
        .analysis_limit(2)
        .chat_limit(3)
        .build()
        .unwrap()
}

// ── Analysis ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn image_upload_is_analysed_saved_and_counted() {
    let h = harness(config(), ScriptedModel::with(vec![Ok(ANALYSIS_JSON)]), "Mieterhöhung").await;
    let mut s = session("alice");

    let report = h
        .explainer
        .analyze_upload(&mut s, png_upload("scan.png"))
        .await
        .unwrap()
        .allowed()
        .expect("allowed");

    assert_eq!(report.analysis.action_items.len(), 2);
    assert_eq!(report.ocr_pages, vec![1]);
    assert_eq!(report.extracted_chars, "Mieterhöhung".chars().count());
    assert_eq!(report.remaining, 1);
    assert!(report.record_id.is_some());
    assert!(report.warnings.is_empty());

    let active = s.active().expect("active document");
    assert_eq!(active.filename, "scan.png");
    assert_eq!(active.text, "Mieterhöhung");

    let rows = h.store.list_all().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].analysis, report.analysis);

    let usage = h.explainer.usage(&s).unwrap();
    assert_eq!(usage.analysis_count, 1);
    assert_eq!(usage.analysis_remaining, 1);
}

#[tokio::test]
async fn third_analysis_is_denied_until_window_passes() {
    let model = ScriptedModel::with((0..4).map(|_| Ok(ANALYSIS_JSON)).collect());
    let h = harness(config(), model, "text").await;
    let mut s = session("bob");

    for _ in 0..2 {
        let out = h.explainer.analyze_upload(&mut s, png_upload("a.png")).await.unwrap();
        assert!(!out.is_denied());
    }

    match h.explainer.analyze_upload(&mut s, png_upload("a.png")).await.unwrap() {
        Gated::Denied(d) => {
            assert_eq!(d.remaining, 0);
            let msg = d.message.unwrap();
            assert!(msg.starts_with("Analysis limit reached (2/2). Resets in"), "{msg}");
        }
        Gated::Allowed(_) => panic!("third analysis should be denied"),
    }
    assert_eq!(h.model.requests().len(), 2);
    assert_eq!(h.store.count().unwrap(), 2);

    // Another identity is unaffected.
    let mut other = session("carol");
    assert!(!h
        .explainer
        .analyze_upload(&mut other, png_upload("b.png"))
        .await
        .unwrap()
        .is_denied());

    h.clock.advance(Duration::hours(25));
    assert!(!h
        .explainer
        .analyze_upload(&mut s, png_upload("a.png"))
        .await
        .unwrap()
        .is_denied());
}

#[tokio::test]
async fn failed_analysis_costs_nothing() {
    let model = ScriptedModel::with(vec![Ok("not json"), Ok("still not json")]);
    let h = harness(config(), model, "text").await;
    let mut s = session("dave");

    let err = h
        .explainer
        .analyze_upload(&mut s, png_upload("a.png"))
        .await
        .unwrap_err();
    assert!(matches!(err, ExplainError::MalformedJson { .. }));
    assert_eq!(h.model.requests().len(), 2);
    assert_eq!(
        *h.warnings.0.lock().unwrap(),
        vec!["Invalid JSON received. Retrying...".to_string()]
    );

    assert_eq!(h.explainer.usage(&s).unwrap().analysis_count, 0);
    assert_eq!(h.store.count().unwrap(), 0);
    assert!(s.active().is_none());
}

#[tokio::test]
async fn rejected_upload_touches_nothing() {
    let h = harness(config(), ScriptedModel::with(vec![]), "text").await;
    let mut s = session("erin");

    let err = h
        .explainer
        .analyze_upload(&mut s, Upload::new("contract.docx", vec![1, 2, 3]))
        .await
        .unwrap_err();
    assert!(matches!(err, ExplainError::UnsupportedFileType { .. }));

    let err = h
        .explainer
        .analyze_upload(&mut s, Upload::new("fake.pdf", b"GIF89a".to_vec()))
        .await
        .unwrap_err();
    assert!(matches!(err, ExplainError::NotAPdf { .. }));

    assert!(h.model.requests().is_empty());
    assert_eq!(h.explainer.usage(&s).unwrap().analysis_count, 0);
}

#[tokio::test]
async fn blank_scan_reports_no_text() {
    let h = harness(config(), ScriptedModel::with(vec![Ok(ANALYSIS_JSON)]), "  \n ").await;
    let mut s = session("frank");

    let err = h
        .explainer
        .analyze_upload(&mut s, png_upload("blank.png"))
        .await
        .unwrap_err();
    assert!(matches!(err, ExplainError::NoText));
    assert!(h.model.requests().is_empty());
    assert_eq!(h.explainer.usage(&s).unwrap().analysis_count, 0);
}

#[tokio::test]
async fn history_save_failure_is_a_warning() {
    let model = ScriptedModel::with(vec![Ok(ANALYSIS_JSON)]);
    let warnings = Arc::new(Warnings::default());
    let explainer = DocumentExplainer::builder()
        .config(config())
        .model(model)
        .ocr(Arc::new(CannedOcr("text")))
        .analysis_store(Arc::new(BrokenStore))
        .blob_store(Arc::new(docexplain::DisabledBlobStore))
        .rate_limit_store(Arc::new(MemoryStore::new()))
        .identity(IdentityResolver::new(AnonymousIdentity::new(
            TempDir::new().unwrap().path().join(".user_id"),
        )))
        .progress_callback(warnings.clone())
        .build()
        .await
        .unwrap();
    let mut s = session("gina");

    let report = explainer
        .analyze_upload(&mut s, png_upload("a.png"))
        .await
        .unwrap()
        .allowed()
        .unwrap();
    assert_eq!(report.record_id, None);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("disk full"));
    assert_eq!(warnings.0.lock().unwrap().len(), 1);
    assert_eq!(explainer.usage(&s).unwrap().analysis_count, 1);
}

// ── Chat ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn chat_requires_an_analysed_document() {
    let h = harness(config(), ScriptedModel::with(vec![]), "text").await;
    let mut s = session("hank");
    let err = h.explainer.ask(&mut s, "What is this?").await.unwrap_err();
    assert!(matches!(err, ExplainError::NoActiveDocument));
}

#[tokio::test]
async fn chat_is_grounded_gated_and_reset_by_new_document() {
    let model = ScriptedModel::with(vec![Ok(ANALYSIS_JSON)]);
    let h = harness(config(), model, "Mieterhöhungsverlangen nach § 558 BGB").await;
    let mut s = session("ivy");

    h.explainer.analyze_upload(&mut s, png_upload("rent.png")).await.unwrap();

    let answer = h
        .explainer
        .ask(&mut s, "When must I reply?")
        .await
        .unwrap()
        .allowed()
        .unwrap();
    assert_eq!(answer, "Answer: When must I reply?");
    assert_eq!(s.history().len(), 2);

    let req = h.model.requests().pop().unwrap();
    assert_eq!(req.temperature, 0.7);
    assert!(req.messages[1].content.contains("§ 558 BGB"));
    assert!(req.messages[1]
        .content
        .contains("Your landlord raises the rent from 1 April."));

    h.explainer.ask(&mut s, "Second?").await.unwrap();
    h.explainer.ask(&mut s, "Third?").await.unwrap();
    match h.explainer.ask(&mut s, "Fourth?").await.unwrap() {
        Gated::Denied(d) => assert!(d.message.unwrap().starts_with("Chat limit reached (3/3)")),
        Gated::Allowed(_) => panic!("fourth question should be denied"),
    }
    assert_eq!(s.history().len(), 6);

    h.model.push(ANALYSIS_JSON);
    h.explainer.analyze_upload(&mut s, png_upload("next.png")).await.unwrap();
    assert!(s.history().is_empty());
}

// ── History and blob storage ─────────────────────────────────────────────────

#[tokio::test]
async fn originals_are_stored_and_purged_with_history() {
    let model = ScriptedModel::with(vec![Ok(ANALYSIS_JSON), Ok(ANALYSIS_JSON)]);
    let h = harness(config(), model, "text").await;
    let mut s = session("jack");

    let kept = h
        .explainer
        .analyze_upload(&mut s, png_upload("kept.png").with_store_original(true))
        .await
        .unwrap()
        .allowed()
        .unwrap();
    let key = kept.storage_key.clone().expect("stored original");
    h.explainer
        .analyze_upload(&mut s, png_upload("plain.png"))
        .await
        .unwrap();

    let rows = h.explainer.history().unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().any(|r| r.storage_key.as_deref() == Some(key.as_str())));
    assert!(h.explainer.download_original(&key).await.is_some());

    let deleted = h.explainer.delete_history().await.unwrap();
    assert_eq!(deleted.records, 2);
    assert_eq!(deleted.blobs_deleted, 1);
    assert!(h.explainer.history().unwrap().is_empty());
    assert!(h.blobs.objects.lock().unwrap().is_empty());
}
