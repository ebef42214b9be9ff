//! Deterministic identifiers derived from natural keys.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Hex characters kept from the SHA-256 digest.
const ID_LEN: usize = 32;

fn digest(key: &str) -> String {
    let mut encoded = hex::encode(Sha256::digest(key.as_bytes()));
    encoded.truncate(ID_LEN);
    encoded
}

/// Lowercase and collapse whitespace so cosmetic differences map to the same key.
///
/// Stored alongside names and titles so lookups by natural key survive renames.
pub fn name_key(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Identifier of the grade with the given number.
pub fn grade_id(grade_number: u32) -> String {
    digest(&format!("grade_{grade_number}"))
}

/// Identifier of a subject; codes are case-insensitive.
pub fn subject_id(subject_code: &str) -> String {
    digest(&format!("subject::{}", subject_code.trim().to_lowercase()))
}

/// Identifier of a book from its name and grade number.
pub fn book_id(book_name: &str, grade: u32) -> String {
    digest(&format!("book::{}::{grade}", name_key(book_name)))
}

/// Identifier of a chapter within a book.
pub fn chapter_id(book_id: &str, title: &str) -> String {
    digest(&format!("chapter::{book_id}::{}", name_key(title)))
}

/// Identifier of a lesson within a chapter.
pub fn lesson_id(chapter_id: &str, title: &str) -> String {
    digest(&format!("lesson::{chapter_id}::{}", name_key(title)))
}

/// Replacement for a derived id already held by a record that has since been renamed.
pub fn reissue(derived: &str) -> String {
    digest(&format!("{derived}::{}", Uuid::new_v4()))
}

/// Ordinal label of the `index`-th chunk of a book (1-based in the label).
pub fn chunk_label(index: usize) -> String {
    format!("chunk_{:06}", index + 1)
}
