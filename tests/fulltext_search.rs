//! Full-text behavior over the fast and fuzzy engines.

use kitedb::{Context, IndexDef, IndexType, KeyValueKind, Namespace};

fn docs(index_type: IndexType) -> Namespace {
    let ns = Namespace::new("docs", 0, Default::default(), Default::default());
    let ctx = Context::new();
    ns.add_index(IndexDef::new("id", KeyValueKind::Int, IndexType::Hash).pk(), &ctx)
        .unwrap();
    let mut def = IndexDef::new("text", KeyValueKind::String, index_type);
    // Keep literal word forms: stemming would fold the fixture words.
    def.opts.config = Some(r#"{"stemmers": []}"#.to_string());
    ns.add_index(def, &ctx).unwrap();
    for (id, text) in [(1, "terminator"), (2, "terminate"), (3, "term")] {
        let mut item = ns.new_item();
        item.from_json(&format!(r#"{{"id": {id}, "text": "{text}"}}"#)).unwrap();
        ns.upsert(&mut item, &ctx).unwrap();
    }
    ns
}

#[test]
fn prefix_query_matches_all_three() {
    let ns = docs(IndexType::FtFast);
    let ctx = Context::new();
    let results = ns
        .select_sql("SELECT * FROM docs WHERE text @@ 'termin*'", &ctx)
        .unwrap();
    assert_eq!(results.len(), 3);
}

#[test]
fn exact_query_ranks_exact_doc_strictly_higher() {
    let ns = docs(IndexType::FtFast);
    let ctx = Context::new();
    let results = ns
        .select_sql("SELECT * FROM docs WHERE text @@ 'terminator'", &ctx)
        .unwrap();
    assert!(!results.is_empty());
    assert_eq!(results.to_json(0).unwrap()["id"], 1);
    for item in results.iter().skip(1) {
        assert!(results.items[0].rank > item.rank);
    }
}

#[test]
fn search_works_after_incremental_updates() {
    let ns = docs(IndexType::FtFast);
    let ctx = Context::new();

    let mut item = ns.new_item();
    item.from_json(r#"{"id": 4, "text": "termination notice"}"#).unwrap();
    ns.upsert(&mut item, &ctx).unwrap();

    let results = ns
        .select_sql("SELECT * FROM docs WHERE text @@ 'termination'", &ctx)
        .unwrap();
    assert_eq!(results.to_json(0).unwrap()["id"], 4);

    let mut gone = ns.new_item();
    gone.from_json(r#"{"id": 4}"#).unwrap();
    ns.delete_item(&mut gone, &ctx).unwrap();
    let results = ns
        .select_sql("SELECT * FROM docs WHERE text @@ 'notice'", &ctx)
        .unwrap();
    assert!(results.is_empty(), "deleted document must leave the engine");
}

#[test]
fn excluded_term_drops_documents() {
    let ns = Namespace::new("docs", 0, Default::default(), Default::default());
    let ctx = Context::new();
    ns.add_index(IndexDef::new("id", KeyValueKind::Int, IndexType::Hash).pk(), &ctx)
        .unwrap();
    ns.add_index(IndexDef::new("text", KeyValueKind::String, IndexType::FtFast), &ctx)
        .unwrap();
    for (id, text) in [(1, "quick brown fox"), (2, "quick red fox")] {
        let mut item = ns.new_item();
        item.from_json(&format!(r#"{{"id": {id}, "text": "{text}"}}"#)).unwrap();
        ns.upsert(&mut item, &ctx).unwrap();
    }

    let results = ns
        .select_sql("SELECT * FROM docs WHERE text @@ 'quick -brown'", &ctx)
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results.to_json(0).unwrap()["id"], 2);
}

#[test]
fn fuzzy_engine_tolerates_misspelling() {
    let ns = docs(IndexType::FtFuzzy);
    let ctx = Context::new();
    let results = ns
        .select_sql("SELECT * FROM docs WHERE text @@ 'treminator'", &ctx)
        .unwrap();
    assert!(!results.is_empty());
    assert_eq!(results.to_json(0).unwrap()["id"], 1);
}

#[test]
fn fulltext_condition_dominates_mixed_query() {
    let ns = docs(IndexType::FtFast);
    let ctx = Context::new();
    let results = ns
        .select_sql("SELECT * FROM docs WHERE text @@ 'termin*' AND id < 3", &ctx)
        .unwrap();
    assert_eq!(results.len(), 2);
    // Results stay in rank order, ranks attached.
    assert!(results.items.iter().all(|item| item.rank > 0.0));
}
