//! End-to-end tests against real pdfium, Tesseract and an LLM provider.
//!
//! Gated behind `E2E_ENABLED` so they never run in CI by accident. Place
//! sample documents in `./test_cases/` (`letter.pdf`, `scan.png`).
//!
//! Run with:
//!   E2E_ENABLED=1 OPENAI_API_KEY=sk-... cargo test --test e2e -- --nocapture

use docexplain::{
    ClientInfo, DocumentExplainer, DocumentSession, ExplainerConfig, Gated, MemoryStore,
    SqliteAnalysisStore, Upload,
};
use docexplain::document::REQUIRED_FIELDS;
use std::path::PathBuf;
use std::sync::Arc;

fn test_cases_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases")
}

/// Skip this test if E2E_ENABLED is not set *or* no file at `path`.
macro_rules! e2e_skip_unless_ready {
    ($path:expr) => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP: set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        let p: PathBuf = $path;
        if !p.exists() {
            println!("SKIP: test file not found: {}", p.display());
            return;
        }
        p
    }};
}

async fn explainer() -> DocumentExplainer {
    let config = ExplainerConfig::from_env().expect("config");
    DocumentExplainer::builder()
        .config(config)
        .analysis_store(Arc::new(SqliteAnalysisStore::open_in_memory().unwrap()))
        .rate_limit_store(Arc::new(MemoryStore::new()))
        .blob_store(Arc::new(docexplain::DisabledBlobStore))
        .build()
        .await
        .expect("explainer")
}

#[tokio::test]
async fn e2e_pdf_letter() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("letter.pdf"));
    let explainer = explainer().await;
    let mut session = DocumentSession::new(ClientInfo::new().with_session_token("e2e"));

    let upload = Upload::from_path(&path).await.unwrap();
    let report = match explainer.analyze_upload(&mut session, upload).await.unwrap() {
        Gated::Allowed(r) => r,
        Gated::Denied(d) => panic!("unexpected denial: {:?}", d.message),
    };
    println!("{}", report.analysis.render_text());
    assert!(!report.analysis.summary.trim().is_empty());
    assert_eq!(
        serde_json::to_value(&report.analysis)
            .unwrap()
            .as_object()
            .unwrap()
            .len(),
        REQUIRED_FIELDS.len()
    );

    let answer = explainer
        .ask(&mut session, "What should I do first?")
        .await
        .unwrap()
        .allowed()
        .unwrap();
    println!("{answer}");
    assert!(!answer.trim().is_empty());
}

#[tokio::test]
async fn e2e_scanned_image() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("scan.png"));
    let explainer = explainer().await;
    let upload = Upload::from_path(&path).await.unwrap();

    let doc = explainer.extract(&upload).await.unwrap();
    assert_eq!(doc.ocr_pages(), vec![1]);
    println!("{} chars via OCR", doc.full_text().chars().count());
}
