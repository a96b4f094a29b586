//! 输入框状态
//!
//! 草稿文本与待上传附件。`take()` 校验内容（非空文本或至少一个附件），
//! 通过后立即清空输入框，不等待网络。

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::model::Attachment;

/// 待上传附件
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAttachment {
    /// 本地 ID（上传前使用）
    pub local_id: String,
    pub path: PathBuf,
    pub filename: String,
    pub mime: String,
    pub size: Option<u64>,
}

impl PendingAttachment {
    /// 根据本地文件创建（MIME 按扩展名猜测，大小读取失败时为空）
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());
        let mime = mime_guess::from_path(&path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        let size = std::fs::metadata(&path).ok().map(|m| m.len());

        Self {
            local_id: format!("local-{}", Uuid::new_v4()),
            path,
            filename,
            mime,
            size,
        }
    }

    /// 文件分类: "image" | "video" | "document"
    pub fn file_type(&self) -> &'static str {
        match self.mime.split('/').next() {
            Some("image") => "image",
            Some("video") => "video",
            _ => "document",
        }
    }

    /// 上传完成前展示用的占位附件（本地 URL）
    pub fn placeholder(&self) -> Attachment {
        Attachment {
            id: self.local_id.clone(),
            filename: self.filename.clone(),
            file_type: Some(self.file_type().to_string()),
            size: self.size,
            url: format!("file://{}", self.path.display()),
            mime: Some(self.mime.clone()),
            uploaded_at: None,
        }
    }
}

/// 待发送内容
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub content: String,
    pub attachments: Vec<PendingAttachment>,
}

impl Outgoing {
    pub fn placeholders(&self) -> Vec<Attachment> {
        self.attachments
            .iter()
            .map(PendingAttachment::placeholder)
            .collect()
    }
}

/// 输入框
#[derive(Debug, Clone, Default)]
pub struct Composer {
    draft: String,
    attachments: Vec<PendingAttachment>,
}

impl Composer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    pub fn attachments(&self) -> &[PendingAttachment] {
        &self.attachments
    }

    pub fn attach(&mut self, attachment: PendingAttachment) {
        self.attachments.push(attachment);
    }

    /// 移除待上传附件
    pub fn detach(&mut self, local_id: &str) -> bool {
        let before = self.attachments.len();
        self.attachments.retain(|a| a.local_id != local_id);
        before != self.attachments.len()
    }

    /// 是否有可发送的内容
    pub fn can_send(&self) -> bool {
        !self.draft.trim().is_empty() || !self.attachments.is_empty()
    }

    /// 取出待发送内容并清空；没有内容时不做任何事
    pub fn take(&mut self) -> Option<Outgoing> {
        if !self.can_send() {
            return None;
        }
        let content = self.draft.trim().to_string();
        self.draft.clear();
        Some(Outgoing {
            content,
            attachments: std::mem::take(&mut self.attachments),
        })
    }
}
