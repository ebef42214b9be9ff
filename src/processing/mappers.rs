//! Mapping helpers between pipeline stages, Qdrant payloads and catalogue rows.

use crate::{
    catalog::{ChapterDraft, ChunkRecord, LessonDraft, ids},
    parser::{BookStructure, OutlineChapter},
    qdrant::{self, compute_chunk_hash},
    rag::RetrievedChunk,
};
use std::collections::HashSet;

/// Chunk produced from one page, tagged with the section in effect on that page.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PageChunk {
    pub(crate) page: u32,
    pub(crate) chapter: Option<String>,
    pub(crate) lesson: Option<String>,
    pub(crate) text: String,
}

/// Page chunk with its content digest, ready to embed.
#[derive(Debug, Clone)]
pub(crate) struct PreparedChunk {
    pub(crate) chunk: PageChunk,
    pub(crate) chunk_hash: String,
}

/// Remove duplicate chunks within a book, keeping the first occurrence.
pub(crate) fn dedupe_chunks(chunks: Vec<PageChunk>) -> (Vec<PreparedChunk>, usize) {
    let mut seen = HashSet::new();
    let mut prepared = Vec::new();
    let mut skipped = 0;

    for chunk in chunks {
        if chunk.text.trim().is_empty() {
            continue;
        }
        let hash = compute_chunk_hash(&chunk.text);
        if seen.insert(hash.clone()) {
            prepared.push(PreparedChunk {
                chunk,
                chunk_hash: hash,
            });
        } else {
            skipped += 1;
        }
    }

    (prepared, skipped)
}

/// Translate the detected outline into catalogue drafts with ids scoped to the book.
pub(crate) fn outline_to_drafts(book_id: &str, structure: &BookStructure) -> Vec<ChapterDraft> {
    structure
        .outline
        .iter()
        .zip(0i64..)
        .map(|(chapter, order)| chapter_draft(book_id, chapter, order))
        .collect()
}

fn chapter_draft(book_id: &str, chapter: &OutlineChapter, order: i64) -> ChapterDraft {
    let chapter_id = ids::chapter_id(book_id, &chapter.title);
    let lessons = chapter
        .lessons
        .iter()
        .zip(0i64..)
        .map(|(lesson, order)| LessonDraft {
            lesson_id: ids::lesson_id(&chapter_id, &lesson.title),
            title: lesson.title.clone(),
            page: lesson.first_page,
            order,
        })
        .collect();
    ChapterDraft {
        chapter_id,
        title: chapter.title.clone(),
        order,
        lessons,
    }
}

/// Resolve chapter and lesson ids for a chunk from the drafts of its book.
pub(crate) fn section_ids(
    drafts: &[ChapterDraft],
    chapter: Option<&str>,
    lesson: Option<&str>,
) -> (Option<String>, Option<String>) {
    let Some(draft) = chapter.and_then(|title| drafts.iter().find(|draft| draft.title == title))
    else {
        return (None, None);
    };
    let lesson_id = lesson.and_then(|title| {
        draft
            .lessons
            .iter()
            .find(|lesson| lesson.title == title)
            .map(|lesson| lesson.lesson_id.clone())
    });
    (Some(draft.chapter_id.clone()), lesson_id)
}

/// Map a Qdrant scored point into a retrieved chunk; points without a readable payload are dropped.
pub(crate) fn retrieved_chunk(point: qdrant::ScoredPoint) -> Option<RetrievedChunk> {
    let qdrant::ScoredPoint { id, score, payload } = point;
    let payload = qdrant::parse_payload(payload?)?;
    let text = payload.text.trim();
    if text.is_empty() {
        return None;
    }
    Some(RetrievedChunk {
        point_id: id,
        book_id: payload.book_id,
        book_name: payload.book_name,
        page: payload.page,
        text: text.to_string(),
        embedding_index: payload.embedding_index,
        score,
    })
}

/// Build a retrieved chunk from the catalogue row of a point whose payload was unusable.
///
/// The book name starts out as the book id until the caller looks the book up.
pub(crate) fn catalog_chunk(record: ChunkRecord, score: f32) -> Option<RetrievedChunk> {
    let text = record.text.trim();
    if text.is_empty() {
        return None;
    }
    Some(RetrievedChunk {
        text: text.to_string(),
        point_id: record.point_id,
        book_name: record.book_id.clone(),
        book_id: record.book_id,
        page: record.page,
        embedding_index: record.embedding_index,
        score,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{OutlineLesson, PageSection};
    use serde_json::{Map, Value, json};

    fn page_chunk(page: u32, text: &str) -> PageChunk {
        PageChunk {
            page,
            chapter: None,
            lesson: None,
            text: text.into(),
        }
    }

    #[test]
    fn dedupe_chunks_removes_duplicates_and_counts_skips() {
        let chunks = vec![
            page_chunk(1, "alpha"),
            page_chunk(1, "beta"),
            page_chunk(2, "alpha"),
            page_chunk(2, "   "),
            page_chunk(3, "beta"),
        ];
        let (deduped, skipped) = dedupe_chunks(chunks);
        let texts: Vec<_> = deduped.iter().map(|p| p.chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["alpha", "beta"]);
        assert_eq!(skipped, 2);
        assert_eq!(deduped[0].chunk.page, 1);
        assert_ne!(deduped[0].chunk_hash, deduped[1].chunk_hash);
    }

    fn structure() -> BookStructure {
        BookStructure {
            sections: vec![PageSection::default()],
            outline: vec![OutlineChapter {
                title: "Chương 1".into(),
                first_page: 1,
                lessons: vec![
                    OutlineLesson {
                        title: "Bài 1".into(),
                        first_page: 2,
                    },
                    OutlineLesson {
                        title: "Bài 2".into(),
                        first_page: 5,
                    },
                ],
            }],
        }
    }

    #[test]
    fn drafts_use_scoped_ids_and_order() {
        let drafts = outline_to_drafts("book", &structure());
        assert_eq!(drafts.len(), 1);
        let chapter = &drafts[0];
        assert_eq!(chapter.chapter_id, ids::chapter_id("book", "Chương 1"));
        assert_eq!(chapter.lessons[1].order, 1);
        assert_eq!(chapter.lessons[1].page, 5);
        assert_eq!(
            chapter.lessons[0].lesson_id,
            ids::lesson_id(&chapter.chapter_id, "Bài 1")
        );
    }

    #[test]
    fn section_ids_resolve_known_titles() {
        let drafts = outline_to_drafts("book", &structure());
        let (chapter, lesson) = section_ids(&drafts, Some("Chương 1"), Some("Bài 2"));
        assert_eq!(chapter.as_deref(), Some(drafts[0].chapter_id.as_str()));
        assert_eq!(lesson.as_deref(), Some(drafts[0].lessons[1].lesson_id.as_str()));

        assert_eq!(section_ids(&drafts, None, Some("Bài 2")), (None, None));
        let (chapter, lesson) = section_ids(&drafts, Some("Chương 1"), None);
        assert!(chapter.is_some());
        assert!(lesson.is_none());
    }

    #[test]
    fn retrieved_chunk_reads_payload() {
        let payload: Map<String, Value> = json!({
            "book_id": "book",
            "book_name": "Toán 8",
            "grade": 8,
            "page": 12,
            "chunk_id": "chunk_000003",
            "embedding_index": 2,
            "chunk_hash": "abc",
            "text": "  Định lý Pythagoras  ",
            "indexed_at": "2025-01-01T00:00:00Z"
        })
        .as_object()
        .cloned()
        .expect("object");

        let hit = retrieved_chunk(qdrant::ScoredPoint {
            id: "point-1".into(),
            score: 0.42,
            payload: Some(payload),
        })
        .expect("hit");
        assert_eq!(hit.book_name, "Toán 8");
        assert_eq!(hit.book_id, "book");
        assert_eq!(hit.page, 12);
        assert_eq!(hit.embedding_index, 2);
        assert_eq!(hit.text, "Định lý Pythagoras");
        assert!((hit.score - 0.42).abs() < f32::EPSILON);
    }

    #[test]
    fn points_without_payload_are_dropped() {
        let point = qdrant::ScoredPoint {
            id: "x".into(),
            score: 0.9,
            payload: None,
        };
        assert!(retrieved_chunk(point).is_none());
    }

    #[test]
    fn catalog_rows_stand_in_for_unreadable_payloads() {
        let record = ChunkRecord {
            point_id: "point-7".into(),
            chunk_id: ids::chunk_label(7),
            book_id: "book".into(),
            chapter_id: None,
            lesson_id: None,
            chapter: None,
            lesson: None,
            page: 31,
            text: " Hằng đẳng thức ".into(),
            embedding_index: 7,
            chunk_hash: "h".into(),
        };
        let hit = catalog_chunk(record.clone(), 0.61).expect("hit");
        assert_eq!(hit.point_id, "point-7");
        assert_eq!(hit.book_id, "book");
        assert_eq!(hit.text, "Hằng đẳng thức");
        assert_eq!(hit.embedding_index, 7);

        let blank = ChunkRecord {
            text: "  ".into(),
            ..record
        };
        assert!(catalog_chunk(blank, 0.61).is_none());
    }
}
