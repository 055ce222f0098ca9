/// Title artifacts are usually `Title: <title>`; the prefix is dropped so the
/// compiled header does not repeat it.
pub fn display_title(raw: &str) -> &str {
    let trimmed = raw.trim();
    match trimmed.get(..6) {
        Some(prefix) if prefix.eq_ignore_ascii_case("title:") => trimmed[6..].trim(),
        _ => trimmed,
    }
}

/// Assembles the final manuscript from the title, the table of contents and
/// the chapter prose in order.
pub fn compile_book<S: AsRef<str>>(title: &str, toc: &str, chapters: &[S]) -> String {
    let mut book = format!(
        "Title: {}\n\nTable of Contents:\n{}\n\n",
        display_title(title),
        toc
    );
    for (index, chapter) in chapters.iter().enumerate() {
        book.push_str(&format!("\nChapter {}:\n\n{}\n", index + 1, chapter.as_ref()));
    }
    book
}
