//! Filter helpers for Qdrant searches and deletions.

use serde_json::{Value, json};

use super::types::SearchFilterArgs;

/// Compose the standard Qdrant filter payload from optional search arguments.
pub fn build_search_filter(args: &SearchFilterArgs) -> Option<Value> {
    let mut must: Vec<Value> = Vec::new();

    for (key, value) in [
        ("book_id", args.book_id.as_deref()),
        ("chapter_id", args.chapter_id.as_deref()),
        ("lesson_id", args.lesson_id.as_deref()),
    ] {
        if let Some(value) = value.and_then(non_empty) {
            must.push(json!({
                "key": key,
                "match": { "value": value }
            }));
        }
    }

    if let Some(grade) = args.grade {
        must.push(json!({
            "key": "grade",
            "match": { "value": grade }
        }));
    }

    if must.is_empty() {
        None
    } else {
        Some(json!({ "must": must }))
    }
}

/// Filter selecting every point that belongs to a book.
pub fn book_filter(book_id: &str) -> Value {
    json!({
        "must": [
            {
                "key": "book_id",
                "match": { "value": book_id }
            }
        ]
    })
}

/// Filter selecting a book's points except the listed ids.
pub fn stale_points_filter(book_id: &str, keep: &[String]) -> Value {
    let mut filter = book_filter(book_id);
    if !keep.is_empty()
        && let Some(object) = filter.as_object_mut()
    {
        object.insert("must_not".into(), json!([{ "has_id": keep }]));
    }
    filter
}

fn non_empty(input: &str) -> Option<&str> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_args_produce_no_filter() {
        assert!(build_search_filter(&SearchFilterArgs::default()).is_none());
    }

    #[test]
    fn blank_values_are_ignored() {
        let filter = build_search_filter(&SearchFilterArgs {
            book_id: Some("   ".into()),
            ..Default::default()
        });
        assert!(filter.is_none());
    }

    #[test]
    fn filter_combines_book_and_grade() {
        let filter = build_search_filter(&SearchFilterArgs {
            book_id: Some("book-1".into()),
            grade: Some(8),
            ..Default::default()
        })
        .expect("filter");
        let must = filter["must"].as_array().expect("must clause");
        assert_eq!(must.len(), 2);
        assert_eq!(must[0]["key"], "book_id");
        assert_eq!(must[0]["match"]["value"], "book-1");
        assert_eq!(must[1]["key"], "grade");
        assert_eq!(must[1]["match"]["value"], 8);
    }

    #[test]
    fn book_filter_targets_book_id() {
        let filter = book_filter("abc");
        assert_eq!(filter["must"][0]["key"], "book_id");
        assert_eq!(filter["must"][0]["match"]["value"], "abc");
    }

    #[test]
    fn stale_filter_spares_current_points() {
        let keep = vec!["p-1".to_string(), "p-2".to_string()];
        let filter = stale_points_filter("abc", &keep);
        assert_eq!(filter["must"][0]["match"]["value"], "abc");
        assert_eq!(filter["must_not"][0]["has_id"], json!(["p-1", "p-2"]));

        assert!(stale_points_filter("abc", &[]).get("must_not").is_none());
    }
}
