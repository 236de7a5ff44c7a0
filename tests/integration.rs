//! End-to-end tests through `RetrievalService`, using the offline hash
//! embedder and temporary corpora.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use corpus_rag::answer::INSUFFICIENT_CONTEXT;
use corpus_rag::config::{Config, IndexMode};
use corpus_rag::embedding::{DisabledProvider, HashProvider};
use corpus_rag::error::RetrievalError;
use corpus_rag::extract::ExtractorTable;
use corpus_rag::router::RoutingRule;
use corpus_rag::service::{QueryRequest, RetrievalService};
use serde_json::json;
use tempfile::TempDir;

const TICKET_GUIDE: &str = "## Opening a ticket\n\n\
To open a new ticket select a table and press the New button on the main screen.\n\n\
## Closing a ticket\n\n\
To close a ticket press Close, choose the payment method and confirm the closing.\n";

fn hash_config(files: Vec<PathBuf>) -> Config {
    let mut config = Config::default();
    config.corpus.files = files;
    config.embedding.provider = "hash".to_string();
    config.embedding.dims = Some(1024);
    config.routing.rules = Vec::new();
    config
}

fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    path
}

fn files_request(query: &str, files: &[&Path]) -> QueryRequest {
    QueryRequest {
        query: query.to_string(),
        scope: Some("files".to_string()),
        files: Some(files.iter().map(|p| p.display().to_string()).collect()),
        top_k: None,
    }
}

fn sentence(topic: &str) -> String {
    format!(
        "This paragraph describes {} in enough words to be indexed properly.",
        topic
    )
}

#[tokio::test]
async fn ticket_example_returns_closing_section() {
    let tmp = TempDir::new().unwrap();
    let guide = write(tmp.path(), "tickets.md", TICKET_GUIDE);
    let service = RetrievalService::from_config(hash_config(vec![guide]))
        .await
        .unwrap();

    let mut request = QueryRequest::new("How do I close a ticket?");
    request.top_k = Some(json!(1));
    let response = service.run(request).await.unwrap();

    assert_eq!(response.results.len(), 1);
    let top = &response.results[0];
    assert!(top.source.ends_with("tickets.md#section-2"), "{}", top.source);
    assert!(top.snippet.contains("To close a ticket"));
    assert!(!response.low_confidence);
    assert!(response.best_answer.contains("To close a ticket"));
    assert_eq!(response.debug.indexed.len(), 1);
    assert!(response.debug.skipped.is_empty());
}

#[tokio::test]
async fn repeated_query_reuses_the_index() {
    let tmp = TempDir::new().unwrap();
    let guide = write(tmp.path(), "tickets.md", TICKET_GUIDE);
    let service = RetrievalService::from_config(hash_config(vec![guide]))
        .await
        .unwrap();

    let first = service.run(QueryRequest::new("close a ticket")).await.unwrap();
    let second = service.run(QueryRequest::new("close a ticket")).await.unwrap();

    assert_eq!(first.results, second.results);
    let stats = service.store().stats();
    assert_eq!(stats.builds, 1);
    assert!(stats.hits >= 1);
}

#[tokio::test]
async fn modified_file_is_reindexed() {
    let tmp = TempDir::new().unwrap();
    let doc = write(tmp.path(), "notes.md", &sentence("the morning waiters"));
    let service = RetrievalService::from_config(hash_config(Vec::new()))
        .await
        .unwrap();

    let before = service
        .run(files_request("waiters", &[&doc]))
        .await
        .unwrap();
    assert!(before.results[0].snippet.contains("waiters"));

    fs::write(&doc, sentence("the evening cashier and the final count")).unwrap();
    let after = service.run(files_request("cashier", &[&doc])).await.unwrap();
    assert!(after.results[0].snippet.contains("cashier"));
    assert!(!after.results[0].snippet.contains("waiters"));
    assert_eq!(service.store().stats().builds, 2);
}

#[tokio::test]
async fn touched_file_with_same_size_is_reindexed() {
    let tmp = TempDir::new().unwrap();
    let doc = write(tmp.path(), "notes.md", &sentence("the morning waiters"));
    let service = RetrievalService::from_config(hash_config(Vec::new()))
        .await
        .unwrap();

    service.run(files_request("waiters", &[&doc])).await.unwrap();
    let file = fs::File::options().write(true).open(&doc).unwrap();
    file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(86_400))
        .unwrap();
    drop(file);
    service.run(files_request("waiters", &[&doc])).await.unwrap();

    assert_eq!(service.store().stats().builds, 2);
}

#[tokio::test]
async fn sixth_document_evicts_down_to_three() {
    let tmp = TempDir::new().unwrap();
    let docs: Vec<PathBuf> = (0..6)
        .map(|i| {
            let body = sentence(&format!("topic {}", i));
            write(tmp.path(), &format!("doc{}.md", i), &body)
        })
        .collect();
    let mut config = hash_config(Vec::new());
    config.index.max_docs = 5;
    let service = RetrievalService::from_config(config).await.unwrap();

    for doc in &docs {
        service.run(files_request("topic", &[doc])).await.unwrap();
    }

    let store = service.store();
    assert_eq!(store.len(), 3);
    assert_eq!(store.stats().evictions, 3);
    for doc in &docs[..3] {
        assert!(!store.contains(doc));
    }
    for doc in &docs[3..] {
        assert!(store.contains(doc));
    }
}

#[tokio::test]
async fn broken_document_is_skipped_not_fatal() {
    let tmp = TempDir::new().unwrap();
    let good = write(tmp.path(), "good.md", &sentence("closing the cash register"));
    let broken = write(tmp.path(), "broken.pdf", "this is not a pdf");
    let service = RetrievalService::from_config(hash_config(vec![good, broken]))
        .await
        .unwrap();

    let response = service
        .run(QueryRequest::new("cash register"))
        .await
        .unwrap();

    assert!(!response.results.is_empty());
    assert!(response.results.iter().all(|r| r.source.contains("good.md")));
    assert_eq!(response.debug.indexed.len(), 1);
    assert_eq!(response.debug.skipped.len(), 1);
    assert!(response.debug.skipped[0].contains("broken.pdf: "));
}

#[tokio::test]
async fn explicit_files_report_missing_and_unsupported() {
    let tmp = TempDir::new().unwrap();
    let good = write(tmp.path(), "good.md", &sentence("closing the cash register"));
    let missing = tmp.path().join("missing.md");
    let text = write(tmp.path(), "notes.txt", "plain text");
    let service = RetrievalService::from_config(hash_config(Vec::new()))
        .await
        .unwrap();

    let response = service
        .run(files_request("cash register", &[&good, &missing, &text, &good]))
        .await
        .unwrap();

    assert_eq!(response.debug.indexed.len(), 1);
    assert_eq!(response.debug.skipped.len(), 2);
    let skipped = response.debug.skipped.join("\n");
    assert!(skipped.contains("missing.md: file not found"));
    assert!(skipped.contains("notes.txt: unsupported document kind"));
}

#[tokio::test]
async fn keyword_rule_selects_only_mapped_document() {
    let tmp = TempDir::new().unwrap();
    let tables = write(tmp.path(), "tables.md", &sentence("assigning guests to tables"));
    let orders = write(tmp.path(), "orders.md", &sentence("charging and closing orders"));
    let mut config = hash_config(vec![tables, orders]);
    config.routing.rules = vec![RoutingRule::new(
        vec!["seating".to_string()],
        "tables.md",
    )];
    let service = RetrievalService::from_config(config).await.unwrap();

    let routed = service
        .run(QueryRequest::new("Seating plan for tonight"))
        .await
        .unwrap();
    assert_eq!(routed.debug.indexed.len(), 1);
    assert!(routed.debug.indexed[0].ends_with("tables.md"));

    let fallback = service
        .run(QueryRequest::new("anything else entirely"))
        .await
        .unwrap();
    assert_eq!(fallback.debug.indexed.len(), 2);
}

#[tokio::test]
async fn empty_corpus_is_low_confidence() {
    let service = RetrievalService::from_config(hash_config(Vec::new()))
        .await
        .unwrap();
    let response = service
        .run(QueryRequest::new("how do I close a ticket?"))
        .await
        .unwrap();
    assert!(response.low_confidence);
    assert!(response.results.is_empty());
    assert_eq!(response.best_answer, INSUFFICIENT_CONTEXT);
}

#[tokio::test]
async fn unrelated_query_is_low_confidence() {
    let tmp = TempDir::new().unwrap();
    let guide = write(tmp.path(), "tickets.md", TICKET_GUIDE);
    let service = RetrievalService::from_config(hash_config(vec![guide]))
        .await
        .unwrap();
    let response = service
        .run(QueryRequest::new("zebra quantum xylophone"))
        .await
        .unwrap();
    assert!(response.low_confidence);
    assert_eq!(response.best_answer, INSUFFICIENT_CONTEXT);
}

#[tokio::test]
async fn results_are_bounded_and_sorted() {
    let tmp = TempDir::new().unwrap();
    let body: String = (0..10)
        .map(|i| format!("## Step {}\n\n{}\n\n", i, sentence(&format!("ticket step {}", i))))
        .collect();
    let a = write(tmp.path(), "a.md", &body);
    let b = write(tmp.path(), "b.md", &body);
    let service = RetrievalService::from_config(hash_config(vec![a, b]))
        .await
        .unwrap();

    for top_k in [1usize, 3, 8] {
        let mut request = QueryRequest::new("ticket step");
        request.top_k = Some(json!(top_k));
        let response = service.run(request).await.unwrap();
        assert!(response.results.len() <= top_k);
        assert!(!response.results.is_empty());
        for pair in response.results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }
}

#[tokio::test]
async fn equal_scores_keep_corpus_order() {
    let tmp = TempDir::new().unwrap();
    let body = format!("## Steps\n\n{}\n", sentence("ticket steps"));
    let first = write(tmp.path(), "b_first.md", &body);
    let second = write(tmp.path(), "a_second.md", &body);
    let service = RetrievalService::from_config(hash_config(vec![first, second]))
        .await
        .unwrap();

    let response = service.run(QueryRequest::new("ticket steps")).await.unwrap();

    assert_eq!(response.results.len(), 2);
    assert_eq!(response.results[0].score, response.results[1].score);
    assert!(response.results[0].source.ends_with("b_first.md#section-1"));
    assert!(response.results[1].source.ends_with("a_second.md#section-1"));
}

#[tokio::test]
async fn huge_top_k_returns_every_chunk() {
    let tmp = TempDir::new().unwrap();
    let guide = write(tmp.path(), "tickets.md", TICKET_GUIDE);
    let service = RetrievalService::from_config(hash_config(vec![guide]))
        .await
        .unwrap();

    let mut request = QueryRequest::new("close a ticket");
    request.top_k = Some(json!(u64::MAX));
    let response = service.run(request).await.unwrap();
    assert_eq!(response.results.len(), 2);
}

#[tokio::test]
async fn answer_falls_back_to_results_below_threshold() {
    let tmp = TempDir::new().unwrap();
    let guide = write(
        tmp.path(),
        "tickets.md",
        "To close a ticket press Close, choose the payment method and confirm the closing.\n",
    );
    let mut config = hash_config(vec![guide]);
    config.retrieval.threshold = 0.95;
    let service = RetrievalService::from_config(config).await.unwrap();

    let response = service
        .run(QueryRequest::new("how do I close a ticket"))
        .await
        .unwrap();

    assert!(!response.low_confidence);
    assert_eq!(response.results.len(), 1);
    assert!(response.results[0].score < 0.95);
    assert_ne!(response.best_answer, INSUFFICIENT_CONTEXT);
    assert!(response.best_answer.contains("To close a ticket"));
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let service = RetrievalService::from_config(hash_config(Vec::new()))
        .await
        .unwrap();

    let err = service.run(QueryRequest::new("   ")).await.unwrap_err();
    assert!(matches!(err, RetrievalError::EmptyQuery));

    let mut request = QueryRequest::new("q");
    request.scope = Some("files".to_string());
    let err = service.run(request).await.unwrap_err();
    assert!(matches!(err, RetrievalError::MissingFileList));

    let mut request = QueryRequest::new("q");
    request.scope = Some("everywhere".to_string());
    let err = service.run(request).await.unwrap_err();
    assert!(matches!(err, RetrievalError::InvalidScope(_)));

    let mut request = QueryRequest::new("q");
    request.top_k = Some(json!(0));
    let err = service.run(request).await.unwrap_err();
    assert!(matches!(err, RetrievalError::InvalidTopK(_)));
}

#[tokio::test]
async fn missing_corpus_files_fail_startup() {
    let tmp = TempDir::new().unwrap();
    let config = hash_config(vec![tmp.path().join("a.md"), tmp.path().join("b.pdf")]);
    let err = RetrievalService::from_config(config)
        .await
        .err()
        .expect("startup should fail");
    match err.downcast::<RetrievalError>().unwrap() {
        RetrievalError::MissingCorpusFile(paths) => assert_eq!(paths.len(), 2),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn query_embedding_failure_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let guide = write(tmp.path(), "tickets.md", TICKET_GUIDE);
    let service = RetrievalService::with_provider(
        hash_config(vec![guide]),
        Arc::new(DisabledProvider),
        ExtractorTable::with_builtins(),
    )
    .unwrap();
    let err = service
        .run(QueryRequest::new("close a ticket"))
        .await
        .unwrap_err();
    assert!(matches!(err, RetrievalError::Embedding(_)));
}

#[tokio::test]
async fn eager_mode_indexes_everything_at_startup() {
    let tmp = TempDir::new().unwrap();
    let files: Vec<PathBuf> = (0..7)
        .map(|i| write(tmp.path(), &format!("doc{}.md", i), &sentence("eager indexing")))
        .collect();
    let mut config = hash_config(files);
    config.index.mode = IndexMode::Eager;
    let service = RetrievalService::from_config(config).await.unwrap();

    assert_eq!(service.store().len(), 7);
    assert_eq!(service.store().stats().evictions, 0);

    service.run(QueryRequest::new("eager")).await.unwrap();
    assert_eq!(service.store().stats().builds, 7);
}

#[tokio::test]
async fn warm_reports_indexed_and_skipped() {
    let tmp = TempDir::new().unwrap();
    let good = write(tmp.path(), "good.md", TICKET_GUIDE);
    let broken = write(tmp.path(), "broken.docx", "not a zip archive");
    let service = RetrievalService::with_provider(
        hash_config(vec![good, broken]),
        Arc::new(HashProvider::new(256)),
        ExtractorTable::with_builtins(),
    )
    .unwrap();

    let report = service.warm().await;
    assert_eq!(report.indexed.len(), 1);
    assert_eq!(report.indexed[0].1, 2);
    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].contains("broken.docx"));
}

#[tokio::test]
async fn http_query_health_and_errors() {
    let tmp = TempDir::new().unwrap();
    let guide = write(tmp.path(), "tickets.md", TICKET_GUIDE);
    let service = Arc::new(
        RetrievalService::from_config(hash_config(vec![guide]))
            .await
            .unwrap(),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(corpus_rag::server::serve(listener, service));
    let base = format!("http://{}", addr);
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/query", base))
        .json(&json!({ "query": "How do I close a ticket?", "top_k": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["results"].as_array().unwrap().len(), 1);
    assert_eq!(body["low_confidence"], json!(false));
    assert!(body["debug"]["timings_ms"]["total_ms"].is_u64());

    let resp = client
        .post(format!("{}/query", base))
        .json(&json!({ "query": "" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], json!("bad_request"));

    let resp = client
        .post(format!("{}/query", base))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);

    let health: serde_json::Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], json!("ok"));
    assert_eq!(health["model"], json!("hash"));
    assert_eq!(health["indexed_documents"], json!(1));

    let corpus: serde_json::Value = client
        .get(format!("{}/corpus", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(corpus["documents"][0]["kind"], json!("markdown"));
    assert_eq!(corpus["documents"][0]["indexed"], json!(true));
}
