use crate::domain::model::ComposeDocument;
use crate::utils::error::{ComposeError, Result};
use std::path::Path;

/// 定義文件格式，依副檔名判斷
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Yaml,
    Toml,
}

impl DocumentFormat {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        match path
            .as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("toml") => DocumentFormat::Toml,
            _ => DocumentFormat::Yaml,
        }
    }
}

/// 從檔案載入定義文件
pub fn load_document<P: AsRef<Path>>(path: P) -> Result<ComposeDocument> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ComposeError::ParseError {
        file: path.display().to_string(),
        message: e.to_string(),
    })?;
    parse_document(&content, DocumentFormat::from_path(path), &path.display().to_string())
}

/// 從字串解析定義文件，並把服務名稱寫回每個定義
pub fn parse_document(content: &str, format: DocumentFormat, label: &str) -> Result<ComposeDocument> {
    let parsed = match format {
        DocumentFormat::Yaml => {
            if content.trim().is_empty() {
                Ok(ComposeDocument::default())
            } else {
                serde_yaml::from_str::<ComposeDocument>(content).map_err(|e| e.to_string())
            }
        }
        DocumentFormat::Toml => toml::from_str::<ComposeDocument>(content).map_err(|e| e.to_string()),
    };

    let mut document = parsed.map_err(|message| ComposeError::ParseError {
        file: label.to_string(),
        message,
    })?;

    for (name, def) in document.services.iter_mut() {
        def.name = name.clone();
    }
    tracing::debug!("Loaded {} service(s) from '{}'", document.services.len(), label);
    Ok(document)
}
