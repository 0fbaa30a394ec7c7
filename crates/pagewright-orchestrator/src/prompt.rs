//! Prompt construction for app and README generation.
//!
//! [`PromptBuilder`] turns a [`GenerationRequest`] into the user message sent
//! to the model. Round 1 asks for a new app; later rounds embed the round
//! history and the current code and ask for a revision that keeps earlier
//! checks passing.

use std::borrow::Cow;
use std::fmt::Write;

use crate::attachment::DataUri;
use crate::generation::GenerationRequest;
use crate::task::{truncate_chars, Attachment, RoundRecord, ROOT_PAGE};

/// System message for app generation.
pub const APP_SYSTEM_PROMPT: &str = "You are an expert web developer. Generate complete, \
working HTML/CSS/JS applications based on user requirements. Return your response as a JSON \
object with file paths as keys and file contents as values.";

/// System message for README generation.
pub const README_SYSTEM_PROMPT: &str = "You are a technical writer. Write clear, concise \
README files in Markdown for small static web applications.";

/// Characters of each current file embedded in a revision prompt.
pub const MAX_FILE_CHARS: usize = 6000;

/// Characters of an attachment URL embedded in a prompt.
pub const MAX_ATTACHMENT_URL_CHARS: usize = 4000;

/// Characters of decoded attachment text previewed in a prompt.
pub const MAX_ATTACHMENT_PREVIEW_CHARS: usize = 2000;

/// Builds the user message for an app generation call.
pub struct PromptBuilder<'a> {
    request: &'a GenerationRequest,
}

impl<'a> PromptBuilder<'a> {
    /// Creates a builder for the given request.
    #[must_use]
    pub const fn new(request: &'a GenerationRequest) -> Self {
        Self { request }
    }

    /// Renders the prompt for the request's round.
    #[must_use]
    pub fn build(&self) -> String {
        let mut output = String::new();

        if self.request.round <= 1 {
            self.write_build_intro(&mut output);
        } else {
            self.write_update_intro(&mut output);
        }
        self.write_checks(&mut output);
        self.write_attachments(&mut output);
        if self.request.round > 1 {
            self.write_history(&mut output);
            self.write_current_files(&mut output);
            Self::write_update_rules(&mut output);
        }
        Self::write_output_format(&mut output);

        output
    }

    fn write_build_intro(&self, output: &mut String) {
        let _ = writeln!(
            output,
            "Create a complete, working static web application for the brief below.\n"
        );
        let _ = writeln!(output, "## Brief\n\n{}\n", self.request.brief.trim());
    }

    fn write_update_intro(&self, output: &mut String) {
        let _ = writeln!(
            output,
            "Update the existing web application below for round {}.\n",
            self.request.round
        );
        let _ = writeln!(output, "## New brief\n\n{}\n", self.request.brief.trim());
    }

    fn write_checks(&self, output: &mut String) {
        let heading = if self.request.round > 1 {
            "New mandatory checks"
        } else {
            "Mandatory checks"
        };
        let _ = writeln!(output, "## {heading}\n");

        if self.request.checks.is_empty() {
            let _ = writeln!(output, "None provided.\n");
            return;
        }

        let _ = writeln!(
            output,
            "An automated evaluator runs every check below against the deployed page. \
             Use exactly the element IDs, class names, text and letter case they mention.\n"
        );
        for (index, check) in self.request.checks.iter().enumerate() {
            let _ = writeln!(output, "{}. {}", index + 1, check.trim());
        }
        output.push('\n');
    }

    fn write_attachments(&self, output: &mut String) {
        if self.request.attachments.is_empty() {
            return;
        }

        let _ = writeln!(output, "## Attachments\n");
        let _ = writeln!(
            output,
            "Attachments are data URIs of the form `data:[<mime>][;base64],<payload>`. \
             Decode base64 payloads before use, or embed the URI directly where a URL is expected.\n"
        );
        for attachment in &self.request.attachments {
            write_attachment(output, attachment);
        }
    }

    fn write_history(&self, output: &mut String) {
        let _ = writeln!(output, "## Previous rounds\n");
        if self.request.prior_rounds.is_empty() {
            let _ = writeln!(output, "No history was recorded.\n");
            return;
        }
        for record in &self.request.prior_rounds {
            write_round_record(output, record);
        }
    }

    fn write_current_files(&self, output: &mut String) {
        let _ = writeln!(output, "## Current code\n");
        if self.request.current_files.is_empty() {
            let _ = writeln!(output, "The repository has no readable files.\n");
            return;
        }
        for (path, content) in &self.request.current_files {
            let _ = writeln!(
                output,
                "### {path}\n\n```\n{}\n```\n",
                truncate_with_marker(content, MAX_FILE_CHARS)
            );
        }
    }

    fn write_update_rules(output: &mut String) {
        let _ = writeln!(output, "## Instructions\n");
        let _ = writeln!(
            output,
            "- Every check from previous rounds must keep passing.\n\
             - Every new check must pass.\n\
             - Return ALL files of the application, changed or not, with their full content.\n\
             - Where a file above is truncated, rewrite it completely.\n"
        );
    }

    fn write_output_format(output: &mut String) {
        let _ = writeln!(output, "## Output format\n");
        let _ = writeln!(
            output,
            "Return only a JSON object mapping file paths to complete file contents, for example \
             {{\"{ROOT_PAGE}\": \"<!DOCTYPE html>...\", \"app.js\": \"...\"}}.\n\
             - \"{ROOT_PAGE}\" is required; it is served at the site root.\n\
             - Use static HTML, CSS and JavaScript only, with no build step.\n\
             - Load third-party libraries from a CDN.\n\
             - Do not include README.md or LICENSE."
        );
    }
}

/// Builds the user message for a README generation call.
#[must_use]
pub fn readme_prompt(task: &str, brief: &str, round: u32) -> String {
    format!(
        "Write a professional README.md for the web application '{task}' (round {round}).\n\n\
         Brief:\n{}\n\n\
         Include these sections: a one-paragraph summary, Features, Setup \
         (open {ROOT_PAGE} in a browser; no build step), Usage, Code explanation, \
         and License (MIT).\n\
         Return only the Markdown.",
        brief.trim()
    )
}

fn write_attachment(output: &mut String, attachment: &Attachment) {
    let Some(uri) = DataUri::parse(&attachment.url) else {
        let _ = writeln!(
            output,
            "- `{}`: {}",
            attachment.name,
            truncate_with_marker(&attachment.url, MAX_ATTACHMENT_URL_CHARS)
        );
        return;
    };

    let encoding = if uri.base64 { "base64" } else { "percent-encoded" };
    let _ = writeln!(
        output,
        "- `{}` ({}, {} bytes, {encoding})",
        attachment.name,
        uri.media_type,
        uri.len()
    );
    if let Some(text) = uri.text() {
        let _ = writeln!(
            output,
            "  Decoded content:\n```\n{}\n```",
            truncate_with_marker(text, MAX_ATTACHMENT_PREVIEW_CHARS)
        );
    }
    let _ = writeln!(
        output,
        "  URI: {}\n",
        truncate_with_marker(&attachment.url, MAX_ATTACHMENT_URL_CHARS)
    );
}

fn write_round_record(output: &mut String, record: &RoundRecord) {
    let _ = writeln!(output, "### Round {}\n", record.round);
    let _ = writeln!(output, "Brief: {}\n", record.brief.trim());
    if record.checks.is_empty() {
        let _ = writeln!(output, "Checks: none");
    } else {
        let _ = writeln!(output, "Checks:");
        for check in &record.checks {
            let _ = writeln!(output, "- {}", check.trim());
        }
    }
    if !record.attachments.is_empty() {
        let _ = writeln!(output, "Attachments: {}", record.attachments.join(", "));
    }
    output.push('\n');
}

/// Cuts `text` to `max_chars` and appends an explicit marker when it does.
fn truncate_with_marker(text: &str, max_chars: usize) -> Cow<'_, str> {
    let kept = truncate_chars(text, max_chars);
    if kept.len() == text.len() {
        return Cow::Borrowed(text);
    }
    let total = text.chars().count();
    Cow::Owned(format!(
        "{kept}\n[... truncated: showing {max_chars} of {total} characters]"
    ))
}
