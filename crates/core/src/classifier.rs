//! File classification: a model lookup with an extension-based fallback.
//!
//! Callers never see a classification error. Whatever goes wrong with the
//! model (no provider configured, HTTP failure, a label outside the fixed set)
//! degrades to the local rules below.

use crate::models::Category;
use providers::{LlmProvider, ProviderRegistry};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// Capability the pipeline uses to decide what a file is.
#[async_trait::async_trait]
pub trait ClassificationPort: Send + Sync {
    async fn classify(&self, path: &Path) -> Category;
    async fn generate_tags(&self, path: &Path, category: Category) -> Vec<String>;
}

pub struct AiClassifier {
    llm: Option<Arc<dyn LlmProvider>>,
}

impl AiClassifier {
    pub fn new(llm: Option<Arc<dyn LlmProvider>>) -> Self {
        Self { llm }
    }

    pub fn from_registry(registry: &ProviderRegistry) -> Self {
        Self::new(registry.llm(None).ok())
    }

    /// Classifier that never calls out.
    pub fn offline() -> Self {
        Self::new(None)
    }
}

#[async_trait::async_trait]
impl ClassificationPort for AiClassifier {
    async fn classify(&self, path: &Path) -> Category {
        let Some(llm) = &self.llm else {
            return fallback_category(path);
        };
        match llm.complete(&classify_prompt(path)).await {
            Ok(answer) => match answer.parse::<Category>() {
                Ok(category) => category,
                Err(err) => {
                    warn!(path = %path.display(), "{err}; using fallback classification");
                    fallback_category(path)
                }
            },
            Err(err) => {
                warn!(path = %path.display(), "classification failed: {err}; using fallback");
                fallback_category(path)
            }
        }
    }

    async fn generate_tags(&self, path: &Path, category: Category) -> Vec<String> {
        let Some(llm) = &self.llm else {
            return fallback_tags(path);
        };
        match llm.complete(&tags_prompt(path, category)).await {
            Ok(answer) => {
                let tags = split_tags(&answer);
                if tags.is_empty() {
                    fallback_tags(path)
                } else {
                    tags
                }
            }
            Err(err) => {
                warn!(path = %path.display(), "tag generation failed: {err}");
                fallback_tags(path)
            }
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default()
}

fn classify_prompt(path: &Path) -> String {
    format!(
        "Put this file into exactly one of these categories: \
         [images, documents, videos, audio, code, archives, other].\n\
         Judge by the file name and extension. Use \"other\" when nothing fits.\n\n\
         Filename: \"{}\"\nExtension: \"{}\"\n\
         Answer with the category name only.",
        file_name(path),
        extension(path)
    )
}

fn tags_prompt(path: &Path, category: Category) -> String {
    format!(
        "Suggest 3 to 5 short tags for this file.\n\
         Filename: \"{}\"\nExtension: \"{}\"\nCategory: {}\n\n\
         Answer with lowercase comma-separated tags only, e.g. \"finance,report,quarterly\".",
        file_name(path),
        extension(path),
        category
    )
}

fn split_tags(answer: &str) -> Vec<String> {
    answer
        .split(',')
        .map(|t| t.trim().trim_matches('"').to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Extension rules used whenever the model is unavailable.
pub fn fallback_category(path: &Path) -> Category {
    match extension(path).as_str() {
        ".jpg" | ".jpeg" | ".png" | ".gif" | ".webp" => Category::Images,
        ".doc" | ".docx" | ".pdf" | ".txt" | ".rtf" => Category::Documents,
        ".mp4" | ".mov" | ".avi" | ".mkv" | ".webm" => Category::Videos,
        ".mp3" | ".wav" | ".flac" | ".aac" => Category::Audio,
        ".go" | ".py" | ".js" | ".java" | ".cpp" | ".rs" => Category::Code,
        ".zip" | ".tar" | ".gz" | ".7z" | ".rar" => Category::Archives,
        _ => Category::Other,
    }
}

/// Tags from the extension when it is a well-known type, otherwise from the
/// name itself.
pub fn fallback_tags(path: &Path) -> Vec<String> {
    let fixed: &[&str] = match extension(path).as_str() {
        ".jpg" | ".jpeg" | ".png" | ".gif" => &["image", "photo"],
        ".doc" | ".docx" | ".pdf" => &["document"],
        ".mp4" | ".mov" | ".avi" => &["video"],
        ".mp3" | ".wav" => &["audio"],
        ".go" | ".py" | ".js" => &["code", "programming"],
        _ => &[],
    };
    if !fixed.is_empty() {
        return fixed.iter().map(|t| t.to_string()).collect();
    }
    name_tokens(path)
}

/// Lowercased pieces of the file stem longer than two characters.
pub fn name_tokens(path: &Path) -> Vec<String> {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    stem.split(|c: char| matches!(c, '-' | '_' | ' ' | '.'))
        .filter(|part| part.chars().count() > 2)
        .map(str::to_lowercase)
        .collect()
}

/// Tags for the `tag` command: name tokens, the category (unless `other`),
/// and model tags for images and documents. Order-preserving, no repeats.
pub async fn derive_tags(
    classifier: &dyn ClassificationPort,
    path: &Path,
    category: Category,
) -> Vec<String> {
    let mut tags = name_tokens(path);
    if category != Category::Other {
        tags.push(category.to_string());
    }
    if matches!(category, Category::Images | Category::Documents) {
        tags.extend(classifier.generate_tags(path, category).await);
    }
    unique_tags(tags)
}

pub fn unique_tags<I: IntoIterator<Item = String>>(tags: I) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.into_iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use providers::ProviderError;
    use std::sync::Mutex;

    struct Scripted {
        answer: Result<String, ()>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn answering(answer: &str) -> Arc<Self> {
            Arc::new(Self {
                answer: Ok(answer.to_string()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                answer: Err(()),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl LlmProvider for Scripted {
        async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.answer
                .clone()
                .map_err(|_| ProviderError::RequestFailed("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn unavailable_model_falls_back_to_extension() {
        let classifier = AiClassifier::new(Some(Scripted::failing()));
        let category = classifier.classify(Path::new("/data/report.pdf")).await;
        assert_eq!(category, Category::Documents);

        let offline = AiClassifier::offline();
        assert_eq!(
            offline.classify(Path::new("/data/report.pdf")).await,
            Category::Documents
        );
    }

    #[tokio::test]
    async fn model_answer_is_normalized() {
        let llm = Scripted::answering("  Images\n");
        let classifier = AiClassifier::new(Some(llm.clone()));
        assert_eq!(
            classifier.classify(Path::new("/data/x.bin")).await,
            Category::Images
        );
        let prompts = llm.prompts.lock().unwrap();
        assert!(prompts[0].contains("x.bin"));
        assert!(prompts[0].contains(".bin"));
    }

    #[tokio::test]
    async fn label_outside_the_set_uses_fallback() {
        let classifier = AiClassifier::new(Some(Scripted::answering("spreadsheet")));
        assert_eq!(
            classifier.classify(Path::new("/data/song.mp3")).await,
            Category::Audio
        );
    }

    #[test]
    fn fallback_covers_every_bucket() {
        assert_eq!(fallback_category(Path::new("a.PNG")), Category::Images);
        assert_eq!(fallback_category(Path::new("a.mkv")), Category::Videos);
        assert_eq!(fallback_category(Path::new("a.py")), Category::Code);
        assert_eq!(fallback_category(Path::new("a.7z")), Category::Archives);
        assert_eq!(fallback_category(Path::new("README")), Category::Other);
    }

    #[tokio::test]
    async fn tags_degrade_to_name_tokens() {
        let classifier = AiClassifier::new(Some(Scripted::failing()));
        let tags = classifier
            .generate_tags(Path::new("/x/quarterly-sales_report.xyz"), Category::Other)
            .await;
        assert_eq!(tags, vec!["quarterly", "sales", "report"]);

        let tags = classifier
            .generate_tags(Path::new("/x/cat.jpg"), Category::Images)
            .await;
        assert_eq!(tags, vec!["image", "photo"]);
    }

    #[tokio::test]
    async fn derived_tags_merge_model_tags_without_repeats() {
        let classifier = AiClassifier::new(Some(Scripted::answering("Report, finance ,report")));
        let tags = derive_tags(&classifier, Path::new("/x/annual_report.pdf"), Category::Documents).await;
        assert_eq!(tags, vec!["annual", "report", "documents", "finance"]);
    }

    #[tokio::test]
    async fn other_category_skips_model_and_category_tag() {
        let llm = Scripted::answering("never,used");
        let classifier = AiClassifier::new(Some(llm.clone()));
        let tags = derive_tags(&classifier, Path::new("/x/my notes.zzz"), Category::Other).await;
        assert_eq!(tags, vec!["notes"]);
        assert!(llm.prompts.lock().unwrap().is_empty());
    }
}
