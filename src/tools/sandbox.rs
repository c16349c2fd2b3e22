//! 沙箱文件操作
//!
//! ToolSandbox 绑定 root，所有路径先做词法规范化（处理 `..`），必须仍在 root 下才允许 I/O；
//! 已存在的路径再 canonicalize 一次检查符号链接。每个操作先经过 RateLimiter（按 操作名+actor）。
//! list / search 同时受结果数上限和墙钟截止时间约束，超时返回截止前的完整部分结果。

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use serde_json::json;

use crate::core::{RateLimiter, ToolError};
use crate::llm::providers::{lookup_api_key, PROVIDERS};

/// 超过该大小的文件不参与 search
const MAX_SEARCH_FILE_SIZE: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListResult {
    pub files: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadResult {
    pub path: String,
    pub bytes: usize,
    pub truncated: bool,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchMatch {
    pub file: String,
    pub line: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub matches: Vec<SearchMatch>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatResult {
    pub path: String,
    pub size: u64,
    pub mtime: Option<DateTime<Utc>>,
    pub is_dir: bool,
    pub is_file: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteResult {
    pub applied: bool,
    pub path: String,
    pub before_bytes: u64,
    pub after_bytes: u64,
}

/// 只报告 API Key 是否存在，不含值
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub root: String,
    pub allow_write: bool,
    pub env: BTreeMap<String, bool>,
    pub tools: Vec<&'static str>,
}

/// fs_list 的文件名过滤：默认 glob，`regex:` 前缀为正则
enum NameFilter {
    Glob(glob::Pattern),
    Regex(Regex),
}

impl NameFilter {
    fn parse(pattern: &str) -> Result<Self, ToolError> {
        if let Some(expr) = pattern.strip_prefix("regex:") {
            Regex::new(expr)
                .map(NameFilter::Regex)
                .map_err(|e| ToolError::InvalidArgs(format!("invalid_regex: {e}")))
        } else {
            glob::Pattern::new(pattern)
                .map(NameFilter::Glob)
                .map_err(|e| ToolError::InvalidArgs(format!("invalid_glob: {e}")))
        }
    }

    fn matches(&self, rel: &str) -> bool {
        match self {
            NameFilter::Glob(p) => p.matches(rel),
            NameFilter::Regex(re) => re.is_match(rel),
        }
    }
}

/// 词法规范化：去掉 `.`，`..` 弹出上一级；不访问文件系统
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

pub struct ToolSandbox {
    root: PathBuf,
    allow_write: bool,
    timeout: Duration,
    limiter: RateLimiter,
}

impl ToolSandbox {
    pub fn new(root: impl AsRef<Path>, allow_write: bool, timeout: Duration, limiter: RateLimiter) -> Self {
        let raw = root.as_ref().to_path_buf();
        let root = raw
            .canonicalize()
            .unwrap_or_else(|_| normalize_lexically(&raw));
        Self {
            root,
            allow_write,
            timeout,
            limiter,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn allow_write(&self) -> bool {
        self.allow_write
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// 解析相对 root 的路径；越界返回 PathEscape
    ///
    /// 目标不存在时，对最深的已存在祖先做 canonicalize 再接回剩余部分，
    /// 因此指向 root 外的符号链接目录下的新文件同样被拒绝。悬空符号链接一律拒绝。
    pub fn resolve(&self, path: &str) -> Result<PathBuf, ToolError> {
        let normalized = normalize_lexically(&self.root.join(path));
        if !normalized.starts_with(&self.root) {
            tracing::warn!(path = %path, "path escapes sandbox root");
            return Err(ToolError::PathEscape(path.to_string()));
        }

        let mut existing = normalized.as_path();
        let mut rest = Vec::new();
        let canonical = loop {
            if let Ok(c) = existing.canonicalize() {
                break c;
            }
            if existing.symlink_metadata().is_ok() {
                tracing::warn!(path = %path, "dangling symlink in sandbox path");
                return Err(ToolError::PathEscape(path.to_string()));
            }
            match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    rest.push(name);
                    existing = parent;
                }
                _ => break existing.to_path_buf(),
            }
        };
        let resolved = rest.iter().rev().fold(canonical, |p, name| p.join(name));
        if !resolved.starts_with(&self.root) {
            tracing::warn!(path = %path, "symlink escapes sandbox root");
            return Err(ToolError::PathEscape(path.to_string()));
        }
        Ok(resolved)
    }

    fn relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        let s = rel.to_string_lossy().replace('\\', "/");
        if s.is_empty() {
            ".".to_string()
        } else {
            s
        }
    }

    fn admit(&mut self, op: &str, actor: &str) -> Result<(), ToolError> {
        self.limiter.admit(op, actor, Utc::now()).map(|_| ())
    }

    /// 递归列出 dir 下的文件（相对 root 的路径，按文件名排序遍历）
    pub fn list(
        &mut self,
        dir: &str,
        pattern: Option<&str>,
        max_results: usize,
        actor: &str,
    ) -> Result<ListResult, ToolError> {
        self.admit("fs_list", actor)?;
        let base = self.resolve(dir)?;
        if !base.is_dir() {
            return Err(ToolError::NotFound(self.relative(&base)));
        }
        let filter = pattern
            .filter(|p| !p.is_empty())
            .map(NameFilter::parse)
            .transpose()?;

        let deadline = Instant::now() + self.timeout;
        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(&base)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if files.len() >= max_results {
                break;
            }
            if Instant::now() >= deadline {
                let count = files.len();
                return Err(ToolError::Timeout {
                    tool: "fs_list".to_string(),
                    partial: json!({ "files": files, "count": count }),
                });
            }
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = self.relative(entry.path());
            if filter.as_ref().map_or(true, |f| f.matches(&rel)) {
                files.push(rel);
            }
        }
        let count = files.len();
        Ok(ListResult { files, count })
    }

    /// 读取文件前 max_bytes 字节，非 UTF-8 内容按替换字符解码
    pub fn read(&mut self, path: &str, max_bytes: usize, actor: &str) -> Result<ReadResult, ToolError> {
        self.admit("fs_read", actor)?;
        let resolved = self.resolve(path)?;
        if !resolved.is_file() {
            return Err(ToolError::NotFound(self.relative(&resolved)));
        }
        let file = fs::File::open(&resolved)?;
        let total = file.metadata().map(|m| m.len()).unwrap_or(0);
        let mut data = Vec::new();
        file.take(max_bytes as u64).read_to_end(&mut data)?;
        Ok(ReadResult {
            path: self.relative(&resolved),
            bytes: data.len(),
            truncated: total > data.len() as u64,
            content: String::from_utf8_lossy(&data).into_owned(),
        })
    }

    /// 按行搜索；非法正则按字面量匹配
    pub fn search(
        &mut self,
        pattern: &str,
        dir: &str,
        max_matches: usize,
        actor: &str,
    ) -> Result<SearchResult, ToolError> {
        self.admit("search_text", actor)?;
        let base = self.resolve(dir)?;
        if !base.exists() {
            return Err(ToolError::NotFound(self.relative(&base)));
        }
        let re = match Regex::new(pattern) {
            Ok(re) => re,
            Err(_) => Regex::new(&regex::escape(pattern))
                .map_err(|e| ToolError::InvalidArgs(format!("invalid pattern: {e}")))?,
        };

        let deadline = Instant::now() + self.timeout;
        let mut matches = Vec::new();
        for entry in walkdir::WalkDir::new(&base)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if Instant::now() >= deadline {
                return Err(ToolError::Timeout {
                    tool: "search_text".to_string(),
                    partial: json!({ "matches": matches }),
                });
            }
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.metadata().map_or(true, |m| m.len() > MAX_SEARCH_FILE_SIZE) {
                continue;
            }
            let Ok(text) = fs::read_to_string(entry.path()) else {
                continue;
            };
            let file = self.relative(entry.path());
            for (idx, line) in text.lines().enumerate() {
                if re.is_match(line) {
                    matches.push(SearchMatch {
                        file: file.clone(),
                        line: idx + 1,
                        text: line.trim().to_string(),
                    });
                    if matches.len() >= max_matches {
                        return Ok(SearchResult { matches });
                    }
                }
            }
        }
        Ok(SearchResult { matches })
    }

    pub fn stat(&mut self, path: &str, actor: &str) -> Result<StatResult, ToolError> {
        self.admit("fs_stat", actor)?;
        let resolved = self.resolve(path)?;
        let meta = fs::metadata(&resolved)
            .map_err(|_| ToolError::NotFound(self.relative(&resolved)))?;
        Ok(StatResult {
            path: self.relative(&resolved),
            size: meta.len(),
            mtime: meta.modified().ok().map(DateTime::<Utc>::from),
            is_dir: meta.is_dir(),
            is_file: meta.is_file(),
        })
    }

    /// 写入文件；构造时未开启写入则返回 WritesDisabled
    pub fn write(
        &mut self,
        path: &str,
        content: &str,
        create_dirs: bool,
        allow_overwrite: bool,
        actor: &str,
    ) -> Result<WriteResult, ToolError> {
        self.admit("fs_write", actor)?;
        let resolved = self.resolve(path)?;
        let rel = self.relative(&resolved);
        if !self.allow_write {
            return Err(ToolError::WritesDisabled(rel));
        }
        let before_bytes = match fs::metadata(&resolved) {
            Ok(meta) if meta.is_dir() || !allow_overwrite => return Err(ToolError::Exists(rel)),
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };
        if create_dirs {
            if let Some(parent) = resolved.parent() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&resolved, content)?;
        let after_bytes = fs::metadata(&resolved).map(|m| m.len()).unwrap_or(0);
        tracing::info!(path = %rel, actor = %actor, before_bytes, after_bytes, "file written");
        Ok(WriteResult {
            applied: true,
            path: rel,
            before_bytes,
            after_bytes,
        })
    }

    pub fn health_check(&mut self, actor: &str) -> Result<HealthReport, ToolError> {
        self.admit("health_check", actor)?;
        let env = PROVIDERS
            .iter()
            .map(|p| (format!("has_{}_key", p.id), lookup_api_key(p.key_envs).is_some()))
            .collect();
        Ok(HealthReport {
            root: self.root.to_string_lossy().into_owned(),
            allow_write: self.allow_write,
            env,
            tools: vec!["fs_list", "fs_read", "search_text", "fs_stat", "fs_write", "health_check"],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox(root: &Path, allow_write: bool) -> ToolSandbox {
        ToolSandbox::new(root, allow_write, Duration::from_secs(5), RateLimiter::new(100, 60))
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        fs::write(dir.path().join("README.md"), "# hive\nswarm notes\n").unwrap();
        fs::write(dir.path().join("src/lib.rs"), "pub fn swarm() {}\n// TODO tidy\n").unwrap();
        fs::write(dir.path().join("src/nested/mod.rs"), "fn inner() {}\n").unwrap();
        dir
    }

    #[test]
    fn test_traversal_is_rejected_before_io() {
        let mut sb = sandbox(Path::new("/workspace"), true);
        let err = sb.read("../../etc/passwd", 100, "Grok").unwrap_err();
        assert_eq!(err, ToolError::PathEscape("../../etc/passwd".into()));
        assert_eq!(err.code(), 403);
        assert!(matches!(sb.stat("/etc/passwd", "Grok"), Err(ToolError::PathEscape(_))));
        assert!(matches!(sb.list("..", None, 10, "Grok"), Err(ToolError::PathEscape(_))));
        assert!(matches!(sb.search("root", "a/../../..", 10, "Grok"), Err(ToolError::PathEscape(_))));
        assert!(matches!(
            sb.write("../x", "y", true, true, "Grok"),
            Err(ToolError::PathEscape(_))
        ));
    }

    #[test]
    fn test_inner_dotdot_stays_inside() {
        let dir = fixture();
        let sb = sandbox(dir.path(), false);
        let p = sb.resolve("src/../README.md").unwrap();
        assert!(p.ends_with("README.md"));
    }

    #[test]
    fn test_list_with_glob_and_regex() {
        let dir = fixture();
        let mut sb = sandbox(dir.path(), false);
        let all = sb.list(".", None, 100, "a").unwrap();
        assert_eq!(all.count, 3);
        assert_eq!(all.files, vec!["README.md", "src/lib.rs", "src/nested/mod.rs"]);

        let rs = sb.list(".", Some("*.rs"), 100, "a").unwrap();
        assert_eq!(rs.count, 2);

        let re = sb.list("src", Some("regex:mod\\.rs$"), 100, "a").unwrap();
        assert_eq!(re.files, vec!["src/nested/mod.rs"]);

        let capped = sb.list(".", None, 1, "a").unwrap();
        assert_eq!(capped.count, 1);

        let bad = sb.list(".", Some("regex:("), 10, "a").unwrap_err();
        assert_eq!(bad.code(), 400);
    }

    #[test]
    fn test_zero_timeout_returns_partial_result() {
        let dir = fixture();
        let mut sb = ToolSandbox::new(dir.path(), false, Duration::ZERO, RateLimiter::new(10, 60));
        let err = sb.list(".", None, 100, "a").unwrap_err();
        assert_eq!(err.code(), 408);
        let v = err.to_value();
        assert_eq!(v["count"], 0);
        assert!(v["files"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_search_past_deadline_returns_partial_matches() {
        let dir = fixture();
        let mut sb = ToolSandbox::new(dir.path(), false, Duration::ZERO, RateLimiter::new(10, 60));
        let err = sb.search("fn", ".", 10, "a").unwrap_err();
        assert_eq!(err.code(), 408);
        let v = err.to_value();
        assert_eq!(v["error"], "timeout");
        assert_eq!(v["tool"], "search_text");
        assert!(v["matches"].as_array().unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_out_of_root_is_rejected_for_new_paths() {
        use std::os::unix::fs::symlink;

        let dir = fixture();
        let outside = tempfile::tempdir().unwrap();
        symlink(outside.path(), dir.path().join("link")).unwrap();
        symlink(outside.path().join("missing.txt"), dir.path().join("dangling")).unwrap();
        symlink(dir.path().join("src"), dir.path().join("inner")).unwrap();
        let mut sb = sandbox(dir.path(), true);

        for target in ["link/pwned.txt", "link/deep/pwned.txt", "dangling"] {
            let err = sb.write(target, "x", true, true, "Grok").unwrap_err();
            assert_eq!(err, ToolError::PathEscape(target.into()));
        }
        assert!(!outside.path().join("pwned.txt").exists());
        assert!(!outside.path().join("deep").exists());
        assert!(!outside.path().join("missing.txt").exists());
        assert!(matches!(sb.read("link/../link/x", 10, "Grok"), Err(ToolError::PathEscape(_))));

        // root 内部的符号链接照常可用
        let ok = sb.write("inner/new.rs", "fn x() {}", true, true, "Grok").unwrap();
        assert_eq!(ok.path, "src/new.rs");
        assert!(dir.path().join("src/new.rs").exists());
    }

    #[test]
    fn test_read_and_stat() {
        let dir = fixture();
        let mut sb = sandbox(dir.path(), false);
        let r = sb.read("README.md", 6, "a").unwrap();
        assert_eq!(r.content, "# hive");
        assert!(r.truncated);

        let s = sb.stat("src", "a").unwrap();
        assert!(s.is_dir);
        assert_eq!(sb.read("missing.txt", 10, "a").unwrap_err().code(), 404);
        assert_eq!(sb.stat("missing.txt", "a").unwrap_err().code(), 404);
    }

    #[test]
    fn test_search_regex_and_literal_fallback() {
        let dir = fixture();
        let mut sb = sandbox(dir.path(), false);
        let hits = sb.search(r"fn \w+", ".", 10, "a").unwrap();
        assert_eq!(hits.matches.len(), 2);
        assert_eq!(hits.matches[0].file, "src/lib.rs");
        assert_eq!(hits.matches[0].line, 1);

        let literal = sb.search("swarm(", ".", 10, "a").unwrap();
        assert_eq!(literal.matches.len(), 1);

        let capped = sb.search("fn", ".", 1, "a").unwrap();
        assert_eq!(capped.matches.len(), 1);
    }

    #[test]
    fn test_write_rules() {
        let dir = fixture();
        let mut disabled = sandbox(dir.path(), false);
        assert_eq!(
            disabled.write("out.txt", "x", true, true, "a").unwrap_err(),
            ToolError::WritesDisabled("out.txt".into())
        );
        assert!(!dir.path().join("out.txt").exists());

        let mut sb = sandbox(dir.path(), true);
        let res = sb.write("docs/new/out.txt", "hello", true, true, "a").unwrap();
        assert_eq!(res.before_bytes, 0);
        assert_eq!(res.after_bytes, 5);
        assert_eq!(fs::read_to_string(dir.path().join("docs/new/out.txt")).unwrap(), "hello");

        let err = sb.write("README.md", "x", true, false, "a").unwrap_err();
        assert_eq!(err.code(), 409);

        let over = sb.write("README.md", "x", true, true, "a").unwrap();
        assert_eq!(over.after_bytes, 1);
        assert!(over.before_bytes > 1);
    }

    #[test]
    fn test_every_operation_is_rate_limited() {
        let dir = fixture();
        let mut sb = ToolSandbox::new(dir.path(), false, Duration::from_secs(5), RateLimiter::new(1, 60));
        assert!(sb.stat("README.md", "Grok").is_ok());
        let err = sb.stat("README.md", "Grok").unwrap_err();
        assert_eq!(err.code(), 429);
        // 另一个 actor 不受影响
        assert!(sb.stat("README.md", "Claude").is_ok());
        assert!(sb.health_check("Grok").is_ok());
        assert_eq!(sb.health_check("Grok").unwrap_err().code(), 429);
    }

    #[test]
    fn test_health_report_only_has_booleans() {
        let dir = fixture();
        let mut sb = sandbox(dir.path(), true);
        let report = sb.health_check("a").unwrap();
        assert!(report.allow_write);
        assert!(report.env.contains_key("has_xai_key"));
        assert!(report.tools.contains(&"fs_write"));
    }
}
