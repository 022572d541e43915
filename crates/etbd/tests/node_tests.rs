//! Node-level tests: the full daemon stack short of a socket, driven
//! through the same dispatch the RPC server uses.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use etb_core::config::EtbConfig;
use etb_core::wire::{Method, ResponseData};
use etb_core::{sha1_hex, Term};
use etbd::node::Node;
use etbd::server;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

fn start_node(tmp: &TempDir, rules: Option<&str>) -> Arc<Node> {
    let mut config = EtbConfig::default();
    config.etb.workdir = tmp.path().join("wd").display().to_string();
    if let Some(text) = rules {
        let path = tmp.path().join("startup.rules");
        fs::write(&path, text).unwrap();
        config.etb.rule_files = vec![path.display().to_string()];
    }
    Node::start(config).unwrap()
}

const ANCESTOR_RULES: &str = "\
    parent(bill, mary).\n\
    parent(mary, john).\n\
    ancestor(X, Y) :- parent(X, Y).\n\
    ancestor(X, Y) :- parent(X, Z), ancestor(Z, Y).\n";

#[tokio::test]
async fn test_query_lifecycle_through_dispatch() {
    let tmp = TempDir::new().unwrap();
    let node = start_node(&tmp, Some(ANCESTOR_RULES));

    let reply = server::dispatch(
        Method::Query {
            goal: "ancestor(bill, Y)".into(),
        },
        &node,
    )
    .await
    .unwrap();
    let ResponseData::QueryId { query } = reply else {
        panic!("expected a query id");
    };

    let reply = server::dispatch(Method::QueryWait { query: query.clone() }, &node)
        .await
        .unwrap();
    assert!(matches!(reply, ResponseData::Done { done: true }));

    let reply = server::dispatch(Method::QueryAnswers { query: query.clone() }, &node)
        .await
        .unwrap();
    let ResponseData::Answers { answers } = reply else {
        panic!("expected answers");
    };
    let values: Vec<String> = answers
        .iter()
        .filter_map(|s| s.get("Y").map(Term::to_string))
        .collect();
    assert_eq!(answers.len(), 2);
    assert!(values.contains(&"mary".to_string()));
    assert!(values.contains(&"john".to_string()));

    let reply = server::dispatch(Method::QueryClaims { query: query.clone() }, &node)
        .await
        .unwrap();
    let ResponseData::Claims { claims } = reply else {
        panic!("expected claims");
    };
    assert_eq!(claims.len(), 5);

    assert_eq!(node.done_queries(), vec![query.clone()]);
    assert!(node.active_queries().is_empty());

    let reply = server::dispatch(Method::QueryClose { query }, &node).await.unwrap();
    assert!(matches!(reply, ResponseData::Ok));
}

#[tokio::test]
async fn test_parse_error_is_a_synchronous_fault() {
    let tmp = TempDir::new().unwrap();
    let node = start_node(&tmp, None);
    let reply = server::dispatch(
        Method::Query {
            goal: "ancestor(bill,".into(),
        },
        &node,
    )
    .await;
    let message = reply.unwrap_err();
    assert!(message.contains("parse error"));
    // nothing was admitted
    assert!(node.active_queries().is_empty());
    assert!(node.done_queries().is_empty());
}

#[tokio::test]
async fn test_put_get_roundtrip_through_dispatch() {
    let tmp = TempDir::new().unwrap();
    let node = start_node(&tmp, None);
    let body = b"file body bytes";

    let reply = server::dispatch(
        Method::PutFile {
            path: "docs/a.txt".into(),
            contents: BASE64.encode(body),
        },
        &node,
    )
    .await
    .unwrap();
    let ResponseData::File(fileref) = reply else {
        panic!("expected a file reference");
    };
    assert_eq!(fileref.sha1, sha1_hex(body));
    assert_eq!(fileref.file, "docs/a.txt");

    let reply = server::dispatch(Method::GetFile { file: fileref }, &node)
        .await
        .unwrap();
    let ResponseData::FileContents { contents } = reply else {
        panic!("expected contents");
    };
    assert_eq!(BASE64.decode(contents.as_bytes()).unwrap(), body);

    let reply = server::dispatch(Method::Ls { dir: "docs".into() }, &node)
        .await
        .unwrap();
    let ResponseData::Listing(listing) = reply else {
        panic!("expected a listing");
    };
    assert_eq!(listing.in_sync, vec!["docs/a.txt"]);
}

#[tokio::test]
async fn test_offers_reflects_rules_and_wrappers() {
    let tmp = TempDir::new().unwrap();
    let node = start_node(&tmp, Some(ANCESTOR_RULES));
    assert!(node.offers("ancestor/2"));
    assert!(node.offers("parent/2"));
    assert!(node.offers("in_range/3"));
    assert!(!node.offers("ancestor/3"));
    assert!(!node.offers("nonsense/1"));
}

#[tokio::test]
async fn test_wrapper_query_through_node() {
    let tmp = TempDir::new().unwrap();
    let node = start_node(&tmp, None);
    let query = node.query("in_range(1, 4, X)").unwrap();
    assert!(node.query_wait(&query).await);
    let answers = node.query_answers(&query).unwrap();
    assert_eq!(answers.len(), 4);
    let claims = node.query_claims(&query).unwrap();
    assert_eq!(claims.len(), 4);
    assert!(node.query_errors(&query).unwrap().is_empty());
}
