use std::io::{self, BufRead, Write};

use bookgen_core::{outline_name, prose_name, BookStage, Reviewer, ACCEPT_TOKEN};

/// Writes `prompt` and reads one line. End of input is an error so callers
/// never spin on a closed stdin.
pub fn ask_with<R: BufRead, W: Write>(input: &mut R, output: &mut W, prompt: &str) -> io::Result<String> {
    write!(output, "{prompt}")?;
    output.flush()?;

    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "input closed before an answer was given",
        ));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Asks until `parse` accepts the answer.
pub fn ask_until_with<R, W, T, F>(
    input: &mut R,
    output: &mut W,
    prompt: &str,
    retry_prompt: &str,
    parse: F,
) -> io::Result<T>
where
    R: BufRead,
    W: Write,
    F: Fn(&str) -> Option<T>,
{
    let mut answer = ask_with(input, output, prompt)?;
    loop {
        if let Some(value) = parse(&answer) {
            return Ok(value);
        }
        answer = ask_with(input, output, retry_prompt)?;
    }
}

pub fn ask(prompt: &str) -> io::Result<String> {
    ask_with(&mut io::stdin().lock(), &mut io::stdout(), prompt)
}

pub fn ask_until<T, F>(prompt: &str, retry_prompt: &str, parse: F) -> io::Result<T>
where
    F: Fn(&str) -> Option<T>,
{
    ask_until_with(
        &mut io::stdin().lock(),
        &mut io::stdout(),
        prompt,
        retry_prompt,
        parse,
    )
}

/// Human-readable name for an artifact shown during review.
pub fn describe_artifact(artifact: &str) -> String {
    if let Some(stage) = BookStage::ALL
        .iter()
        .find(|stage| stage.artifact_name() == artifact)
    {
        return stage.label().to_string();
    }

    if let Some(number) = artifact
        .strip_prefix("outline_chapter_")
        .and_then(|n| n.parse::<usize>().ok())
    {
        if outline_name(number) == artifact {
            return format!("outline for chapter {number}");
        }
    }

    if let Some(number) = artifact
        .strip_prefix("chapter_0")
        .and_then(|n| n.parse::<usize>().ok())
    {
        if prose_name(number) == artifact {
            return format!("chapter {number}");
        }
    }

    artifact.replace('_', " ")
}

/// Shows each stage result on the terminal and reads the answer from stdin.
pub struct ConsoleReviewer;

impl ConsoleReviewer {
    fn review_with<R: BufRead, W: Write>(
        input: &mut R,
        output: &mut W,
        stage: &str,
        content: &str,
    ) -> io::Result<String> {
        let label = describe_artifact(stage);
        writeln!(output, "\nHere is the {label}:\n")?;
        writeln!(output, "{content}")?;
        ask_with(
            input,
            output,
            &format!(
                "\nFeedback on the {label}? Describe what to change, or type '{ACCEPT_TOKEN}' to move on: "
            ),
        )
    }
}

impl Reviewer for ConsoleReviewer {
    fn review(&self, stage: &str, content: &str) -> io::Result<String> {
        Self::review_with(&mut io::stdin().lock(), &mut io::stdout(), stage, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn ask_strips_line_ending_and_fails_on_eof() {
        let mut input = Cursor::new("dark\r\n");
        let mut output = Vec::new();
        assert_eq!(ask_with(&mut input, &mut output, "Tone? ").unwrap(), "dark");
        assert_eq!(String::from_utf8(output).unwrap(), "Tone? ");

        let err = ask_with(&mut input, &mut Vec::new(), "Again? ").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn ask_until_repeats_on_invalid_answers() {
        let mut input = Cursor::new("zero\n0\n4\n");
        let mut output = Vec::new();
        let chapters = ask_until_with(&mut input, &mut output, "Chapters? ", "Try again: ", |raw| {
            raw.trim().parse::<u32>().ok().filter(|n| *n > 0)
        })
        .unwrap();
        assert_eq!(chapters, 4);
        assert_eq!(
            String::from_utf8(output).unwrap(),
            "Chapters? Try again: Try again: "
        );
    }

    #[test]
    fn artifacts_get_readable_names() {
        assert_eq!(describe_artifact("toc"), "table of contents");
        assert_eq!(describe_artifact("content_types"), "initial content types");
        assert_eq!(describe_artifact("outline_chapter_3"), "outline for chapter 3");
        assert_eq!(describe_artifact("chapter_01"), "chapter 1");
        assert_eq!(describe_artifact("chapter_012"), "chapter 12");
        assert_eq!(describe_artifact("compiled_book"), "compiled book");
    }

    #[test]
    fn reviewer_prints_content_before_asking() {
        let mut input = Cursor::new("perfect\n");
        let mut output = Vec::new();
        let answer =
            ConsoleReviewer::review_with(&mut input, &mut output, "premise", "A premise.").unwrap();
        assert_eq!(answer, "perfect");

        let shown = String::from_utf8(output).unwrap();
        let content = shown.find("A premise.").unwrap();
        let question = shown.find("type 'perfect'").unwrap();
        assert!(content < question);
    }
}
