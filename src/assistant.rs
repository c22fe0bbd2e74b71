//! AI assistance for notebook cells.
//!
//! Prompts are assembled here and sent through a [`TextGenerator`]; the
//! generator itself knows nothing about notebooks.

use crate::{
    errors::{NotebookError, Result},
    llm::{ChatMessage, ContentPart, Role, TextGenerator},
    normalize::NormalizedResult,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::sync::Arc;
use tracing::{debug, info};

const FENCE: &str = "```";

const GENERATE_SYSTEM_PROMPT: &str = "\
- you are a Python code generator.
- generate only the code without any explanations.
- the code should be clean, efficient, and well-commented.
- do not use if __name__ == '__main__': or print statement as this a jupyter notebook like environment.";

const GENERATE_WITH_FILES_SYSTEM_PROMPT: &str = "\
- you are a Python code generator.
- generate only the code without any explanations.
- the code should be clean, efficient, and well-commented.
- do not use if __name__ == '__main__': or print function as this a jupyter notebook like environment so just put the output variable in the last line of the code.
- use pandas to read CSV files from the current directory
- do not overcomplicate the code, just use pandas to read the files and process the data as requested
- include error handling for file operations";

const ANALYZE_SYSTEM_PROMPT: &str = "\
You are a data analysis expert. Provide clear, technical insights about code outputs and results.
Provide a clear, concise analysis of:
1. What the output shows
2. Key findings or patterns
3. Any potential issues or anomalies
4. Suggestions for further analysis
5. Do not use any markdown formatting
6. Explain in 3-4 sentences";

const FIX_SYSTEM_PROMPT: &str =
    "You are a Python debugging expert. Fix the code while maintaining its original functionality.";

/// Pull code out of a model response.
///
/// Returns the trimmed interior of the first fenced block, dropping an
/// optional language tag such as `python`. Without a complete fence the
/// whole response is returned trimmed.
pub fn extract_code(text: &str) -> String {
    if let Some(start) = text.find(FENCE) {
        let after = &text[start + FENCE.len()..];
        if let Some(end) = after.find(FENCE) {
            let block = &after[..end];
            let body = match block.find('\n') {
                Some(nl) if is_language_tag(&block[..nl]) => &block[nl + 1..],
                _ => block,
            };
            return body.trim().to_string();
        }
    }
    text.trim().to_string()
}

/// An info string such as `python`, `py3` or `c++`, or nothing at all
fn is_language_tag(line: &str) -> bool {
    line.trim()
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '-'))
}

fn files_prompt(prompt: &str, file_names: &[String]) -> String {
    let listing = file_names
        .iter()
        .map(|name| format!("- {}", name))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Files available:\n{}\n\nUser prompt:\n{}\n\n\
         Generate Python code that:\n\
         1. Reads the CSV files using pandas\n\
         2. Processes the data as requested\n\
         3. Creates visualizations if needed\n\
         4. Uses proper error handling for file operations\n",
        listing, prompt
    )
}

fn fix_prompt(code: &str, error: &str) -> String {
    format!(
        "Fix this Python code that produced an error:\n\n\
         Code:\n{}\n\n\
         Error:\n{}\n\n\
         Requirements:\n\
         1. Keep the original functionality\n\
         2. Fix the error\n\
         3. Return only the fixed code without explanations\n\
         4. Use the same style and comments as the original\n",
        code, error
    )
}

/// Image parts for every picture in `results`, SVG markup base64-encoded
fn image_parts(results: &[NormalizedResult]) -> Vec<ContentPart> {
    results
        .iter()
        .flat_map(|result| result.images())
        .map(|(mime, payload)| {
            if mime == "image/svg+xml" {
                ContentPart::image(mime, &STANDARD.encode(payload))
            } else {
                ContentPart::image(mime, payload)
            }
        })
        .collect()
}

pub struct CodeAssistant {
    generator: Arc<dyn TextGenerator>,
}

impl CodeAssistant {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    pub async fn generate_code(&self, prompt: &str) -> Result<String> {
        let text = self
            .generator
            .complete(vec![
                ChatMessage::new(Role::System, GENERATE_SYSTEM_PROMPT),
                ChatMessage::new(Role::User, prompt),
            ])
            .await?;
        let code = non_empty(extract_code(&text), NotebookError::Generation)?;
        info!("[ASSISTANT] Generated {} bytes of code", code.len());
        Ok(code)
    }

    /// Generate code that works on already staged files
    pub async fn generate_code_with_files(
        &self,
        prompt: &str,
        file_names: &[String],
    ) -> Result<String> {
        let text = self
            .generator
            .complete(vec![
                ChatMessage::new(Role::System, GENERATE_WITH_FILES_SYSTEM_PROMPT),
                ChatMessage::new(Role::User, files_prompt(prompt, file_names)),
            ])
            .await?;
        let code = non_empty(extract_code(&text), NotebookError::Generation)?;
        info!(
            "[ASSISTANT] Generated {} bytes of code for {} file(s)",
            code.len(),
            file_names.len()
        );
        Ok(code)
    }

    pub async fn analyze_output(
        &self,
        output: &str,
        results: &[NormalizedResult],
    ) -> Result<String> {
        let mut parts = vec![ContentPart::text(format!(
            "Analyze this Python code output:\n\n{}",
            output
        ))];
        let images = image_parts(results);
        debug!("[ASSISTANT] Analyzing output with {} image(s)", images.len());
        parts.extend(images);

        let text = self
            .generator
            .complete(vec![
                ChatMessage::new(Role::System, ANALYZE_SYSTEM_PROMPT),
                ChatMessage::multimodal(Role::User, parts),
            ])
            .await
            .map_err(|e| NotebookError::Analysis(e.to_string()))?;
        non_empty(text.trim().to_string(), NotebookError::Analysis)
    }

    pub async fn fix_code(&self, code: &str, error: &str) -> Result<String> {
        let text = self
            .generator
            .complete(vec![
                ChatMessage::new(Role::System, FIX_SYSTEM_PROMPT),
                ChatMessage::new(Role::User, fix_prompt(code, error)),
            ])
            .await
            .map_err(|e| NotebookError::Fix(e.to_string()))?;
        non_empty(extract_code(&text), NotebookError::Fix)
    }
}

fn non_empty(text: String, err: fn(String) -> NotebookError) -> Result<String> {
    if text.is_empty() {
        return Err(err("model returned an empty response".to_string()));
    }
    Ok(text)
}
