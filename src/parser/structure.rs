//! Chapter and lesson heading detection.
//!
//! Lines are matched against explicit heading patterns (Vietnamese and English textbook
//! conventions). The most recent chapter and lesson carry over to later pages until a new
//! heading replaces them.

use super::Page;
use regex::Regex;
use std::sync::LazyLock;

/// Lines longer than this are body text, not headings.
const MAX_HEADING_CHARS: usize = 100;

/// Chapter name used for lessons that appear before any chapter heading.
pub const DEFAULT_CHAPTER_TITLE: &str = "General";

static CHAPTER_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(?i)^(chương|chapter)\s+([0-9]+|[ivxlc]+)\b",
        r"(?i)^(phần|part)\s+([0-9]+|[ivxlc]+)\b",
    ])
});

static LESSON_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(?i)^(bài|lesson|tiết)\s+[0-9]+\b",
        r"^§\s*[0-9]+",
    ])
});

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| match Regex::new(pattern) {
            Ok(regex) => Some(regex),
            Err(error) => {
                tracing::error!(pattern, error = %error, "Invalid heading pattern");
                None
            }
        })
        .collect()
}

/// Kind of heading recognised on a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Heading {
    /// Chapter (or part) heading.
    Chapter(String),
    /// Lesson heading.
    Lesson(String),
}

/// Chapter and lesson in effect for a page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageSection {
    /// Chapter heading, if one has been seen.
    pub chapter: Option<String>,
    /// Lesson heading, if one has been seen in the current chapter.
    pub lesson: Option<String>,
}

/// Lesson entry of the detected outline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineLesson {
    /// Lesson heading text.
    pub title: String,
    /// Page the heading was found on.
    pub first_page: u32,
}

/// Chapter entry of the detected outline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineChapter {
    /// Chapter heading text.
    pub title: String,
    /// Page the heading was found on.
    pub first_page: u32,
    /// Lessons in order of appearance.
    pub lessons: Vec<OutlineLesson>,
}

/// Result of running the detector over a book.
#[derive(Debug, Clone, Default)]
pub struct BookStructure {
    /// One entry per input page, in the same order.
    pub sections: Vec<PageSection>,
    /// Chapters in order of first appearance.
    pub outline: Vec<OutlineChapter>,
}

/// Regex-based heading detector.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructureDetector;

impl StructureDetector {
    /// Create a detector using the built-in heading patterns.
    pub fn new() -> Self {
        Self
    }

    /// Classify a single line.
    pub fn detect_heading(&self, line: &str) -> Option<Heading> {
        let trimmed = normalize_heading(line);
        if trimmed.is_empty() || trimmed.chars().count() > MAX_HEADING_CHARS {
            return None;
        }
        if CHAPTER_PATTERNS.iter().any(|re| re.is_match(&trimmed)) {
            return Some(Heading::Chapter(trimmed));
        }
        if LESSON_PATTERNS.iter().any(|re| re.is_match(&trimmed)) {
            return Some(Heading::Lesson(trimmed));
        }
        None
    }

    /// Assign a chapter and lesson to every page and build the outline.
    pub fn analyze(&self, pages: &[Page]) -> BookStructure {
        let mut structure = BookStructure {
            sections: Vec::with_capacity(pages.len()),
            outline: Vec::new(),
        };
        let mut current = PageSection::default();

        for page in pages {
            for line in page.text.lines() {
                match self.detect_heading(line) {
                    Some(Heading::Chapter(title)) => {
                        if current.chapter.as_deref() != Some(title.as_str()) {
                            chapter_entry(&mut structure.outline, &title, page.page_num);
                            current.chapter = Some(title);
                            current.lesson = None;
                        }
                    }
                    Some(Heading::Lesson(title)) => {
                        if current.lesson.as_deref() == Some(title.as_str()) {
                            continue;
                        }
                        let chapter_title = current
                            .chapter
                            .get_or_insert_with(|| DEFAULT_CHAPTER_TITLE.to_string())
                            .clone();
                        let chapter =
                            chapter_entry(&mut structure.outline, &chapter_title, page.page_num);
                        if !chapter.lessons.iter().any(|lesson| lesson.title == title) {
                            chapter.lessons.push(OutlineLesson {
                                title: title.clone(),
                                first_page: page.page_num,
                            });
                        }
                        current.lesson = Some(title);
                    }
                    None => {}
                }
            }
            structure.sections.push(current.clone());
        }

        tracing::debug!(
            pages = pages.len(),
            chapters = structure.outline.len(),
            lessons = structure
                .outline
                .iter()
                .map(|chapter| chapter.lessons.len())
                .sum::<usize>(),
            "Detected book structure"
        );
        structure
    }
}

fn chapter_entry<'a>(
    outline: &'a mut Vec<OutlineChapter>,
    title: &str,
    page: u32,
) -> &'a mut OutlineChapter {
    let position = match outline.iter().position(|chapter| chapter.title == title) {
        Some(position) => position,
        None => {
            outline.push(OutlineChapter {
                title: title.to_string(),
                first_page: page,
                lessons: Vec::new(),
            });
            outline.len() - 1
        }
    };
    &mut outline[position]
}

/// Collapse internal whitespace runs so repeated running headers compare equal.
fn normalize_heading(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}
