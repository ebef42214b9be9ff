use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::PathBuf,
};

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::Deserialize;
use serde_json::Value;
use textbook_rag::{
    catalog::{Catalog, ChapterDraft, ChunkRecord, LessonDraft, ids},
    logging,
    qdrant::{compute_chunk_hash, generate_point_id},
};

#[derive(Parser)]
#[command(
    name = "import-metadata",
    about = "Import a legacy metadata.json into the catalogue"
)]
struct Cli {
    /// Path to the legacy metadata file.
    #[arg(long, default_value = "data/metadata.json")]
    input: PathBuf,
    /// Catalogue connection string.
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://data/catalog.db")]
    database_url: String,
    /// Report what would be imported without writing.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Deserialize)]
struct Metadata {
    #[serde(default)]
    books: BTreeMap<String, LegacyBook>,
    #[serde(default)]
    chunks: Vec<LegacyChunk>,
}

#[derive(Deserialize)]
struct LegacyBook {
    #[serde(default)]
    grade: Option<u32>,
    /// Chapter → lesson → arbitrary details.
    #[serde(default)]
    structure: BTreeMap<String, BTreeMap<String, Value>>,
}

#[derive(Deserialize)]
struct LegacyChunk {
    book: Option<String>,
    #[serde(default)]
    grade: Option<u32>,
    #[serde(default)]
    chunk_id: Option<String>,
    #[serde(default)]
    page: u32,
    #[serde(default)]
    chapter: Option<String>,
    #[serde(default)]
    lesson: Option<String>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    embedding_index: Option<u64>,
}

#[derive(Default)]
struct BookImport {
    grade: u32,
    structure: BTreeMap<String, BTreeMap<String, Value>>,
    chunks: Vec<LegacyChunk>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    logging::init_tracing();

    let raw = fs::read_to_string(&cli.input)
        .with_context(|| format!("Failed to read {}", cli.input.display()))?;
    let metadata: Metadata = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse {}", cli.input.display()))?;
    let books = group_by_book(metadata);
    if books.is_empty() {
        bail!("{} contains no books or chunks", cli.input.display());
    }

    let catalog = Catalog::connect(&cli.database_url)
        .await
        .with_context(|| format!("Failed to open catalogue at {}", cli.database_url))?;

    let mut imported_books = 0usize;
    let mut imported_chunks = 0usize;
    for (book_name, import) in books {
        let known = catalog
            .get_book_by_name(&book_name)
            .await?
            .filter(|book| book.grade == import.grade);
        if let Some(book) = &known {
            let existing = catalog.count_chunks(&book.book_id).await?;
            if existing > 0 {
                tracing::info!(book = %book_name, existing, "Book already has chunks; skipping");
                continue;
            }
        }

        if cli.dry_run {
            let book_id = known
                .map(|book| book.book_id)
                .unwrap_or_else(|| ids::book_id(&book_name, import.grade));
            let drafts = section_drafts(&book_id, &import);
            let records = chunk_records(&book_id, &drafts, &import.chunks);
            println!(
                "{book_name} (grade {}): {} chapter(s), {} chunk(s)",
                import.grade,
                drafts.len(),
                records.len()
            );
            continue;
        }

        let total_pages = import.chunks.iter().map(|c| c.page).max().unwrap_or(0);
        catalog.ensure_grade(import.grade).await?;
        let book_id = catalog
            .upsert_book(&book_name, import.grade, total_pages, None)
            .await?
            .book_id;
        let drafts = section_drafts(&book_id, &import);
        let records = chunk_records(&book_id, &drafts, &import.chunks);
        catalog.replace_book_content(&book_id, &drafts, &records).await?;
        tracing::info!(
            book = %book_name,
            book_id = %book_id,
            chunks = records.len(),
            "Imported book"
        );
        imported_books += 1;
        imported_chunks += records.len();
    }

    tracing::warn!(
        "Imported chunks have no vectors; re-ingest the PDFs to make them searchable"
    );
    println!("Imported {imported_books} book(s) and {imported_chunks} chunk(s)");
    Ok(())
}

/// Group chunks under their book, inferring the grade from the chunk when the book entry lacks one.
fn group_by_book(metadata: Metadata) -> BTreeMap<String, BookImport> {
    let mut books: BTreeMap<String, BookImport> = metadata
        .books
        .into_iter()
        .map(|(name, book)| {
            let import = BookImport {
                grade: book.grade.unwrap_or(0),
                structure: book.structure,
                chunks: Vec::new(),
            };
            (name, import)
        })
        .collect();

    for chunk in metadata.chunks {
        let Some(name) = chunk.book.clone().filter(|name| !name.trim().is_empty()) else {
            continue;
        };
        let entry = books.entry(name).or_insert_with(|| BookImport {
            grade: chunk.grade.unwrap_or(0),
            ..BookImport::default()
        });
        entry.chunks.push(chunk);
    }
    books
}

/// Chapters and lessons from the stored structure, then any extra titles found on chunks.
fn section_drafts(book_id: &str, import: &BookImport) -> Vec<ChapterDraft> {
    let mut drafts: Vec<ChapterDraft> = Vec::new();
    let mut add = |chapter: &str, lesson: Option<&str>, page: u32| {
        let chapter_id = ids::chapter_id(book_id, chapter);
        let index = match drafts.iter().position(|d| d.chapter_id == chapter_id) {
            Some(index) => index,
            None => {
                drafts.push(ChapterDraft {
                    chapter_id: chapter_id.clone(),
                    title: chapter.to_string(),
                    order: drafts.len() as i64,
                    lessons: Vec::new(),
                });
                drafts.len() - 1
            }
        };
        if let Some(lesson) = lesson {
            let draft = &mut drafts[index];
            let lesson_id = ids::lesson_id(&chapter_id, lesson);
            if !draft.lessons.iter().any(|l| l.lesson_id == lesson_id) {
                draft.lessons.push(LessonDraft {
                    lesson_id,
                    title: lesson.to_string(),
                    page,
                    order: draft.lessons.len() as i64,
                });
            }
        }
    };

    for (chapter, lessons) in &import.structure {
        if lessons.is_empty() {
            add(chapter, None, 0);
        }
        for (lesson, details) in lessons {
            add(chapter, Some(lesson), first_page(details));
        }
    }
    for chunk in &import.chunks {
        if let Some(chapter) = chunk.chapter.as_deref() {
            add(chapter, chunk.lesson.as_deref(), chunk.page);
        }
    }
    drafts
}

fn first_page(details: &Value) -> u32 {
    details
        .get("pages")
        .and_then(Value::as_array)
        .and_then(|pages| pages.iter().filter_map(Value::as_u64).min())
        .and_then(|page| u32::try_from(page).ok())
        .unwrap_or(0)
}

fn chunk_records(
    book_id: &str,
    drafts: &[ChapterDraft],
    chunks: &[LegacyChunk],
) -> Vec<ChunkRecord> {
    let lessons: HashMap<(&str, &str), &str> = drafts
        .iter()
        .flat_map(|chapter| {
            chapter.lessons.iter().map(move |lesson| {
                (
                    (chapter.title.as_str(), lesson.title.as_str()),
                    lesson.lesson_id.as_str(),
                )
            })
        })
        .collect();

    chunks
        .iter()
        .filter(|chunk| !chunk.text.trim().is_empty())
        .enumerate()
        .map(|(index, chunk)| {
            let chapter_id = chunk
                .chapter
                .as_deref()
                .map(|title| ids::chapter_id(book_id, title));
            let lesson_id = chunk
                .chapter
                .as_deref()
                .zip(chunk.lesson.as_deref())
                .and_then(|key| lessons.get(&key))
                .map(|id| id.to_string());
            ChunkRecord {
                point_id: generate_point_id(),
                chunk_id: chunk
                    .chunk_id
                    .clone()
                    .unwrap_or_else(|| ids::chunk_label(index)),
                book_id: book_id.to_string(),
                chapter_id,
                lesson_id,
                chapter: chunk.chapter.clone(),
                lesson: chunk.lesson.clone(),
                page: chunk.page,
                text: chunk.text.clone(),
                embedding_index: chunk.embedding_index.unwrap_or(index as u64),
                chunk_hash: compute_chunk_hash(&chunk.text),
            }
        })
        .collect()
}
