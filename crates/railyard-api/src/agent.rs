//! Automated replies to `@ai` mentions.
//!
//! Post creation only enqueues a [`ReplyJob`]. A worker task drains the queue
//! and runs every job as its own detached task, so nothing here can slow down
//! or fail the request that triggered it. Errors end up in the log and nowhere
//! else.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use railyard_crypto::keys::random_secret;
use railyard_crypto::password::hash_password;
use railyard_db::Database;
use railyard_db::models::UserRow;

pub const SYSTEM_HANDLE: &str = "ai";
pub const SYSTEM_EMAIL: &str = "ai@railyard.local";
pub const SYSTEM_NAME: &str = "Railyard AI";

pub const MAX_PROMPT_CHARS: usize = 1000;
pub const MAX_REPLY_CHARS: usize = 400;
const MAX_REPLY_TOKENS: u32 = 200;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub const PERSONA: &str = "You are Railyard AI, a friendly railway enthusiast on a social feed \
for train fans. Reply to the post in one or two short sentences. Be warm, accurate and \
on-topic; if you are unsure of a fact, say so.";

/// A standalone `@ai`: not glued to a word or another mention on its left,
/// and not continued by word characters on its right.
static MENTION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(^|[^\w@])@ai\b").expect("Invalid mention regex"));

pub fn mentions_ai(content: &str) -> bool {
    MENTION_REGEX.is_match(content)
}

/// Strip every mention, trim, and cap the prompt length.
pub fn build_prompt(content: &str) -> String {
    let stripped = MENTION_REGEX.replace_all(content, "${1}");
    truncate_chars(stripped.trim(), MAX_PROMPT_CHARS)
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[derive(Debug, Clone)]
pub struct ReplyJob {
    pub post_id: i64,
    pub content: String,
}

/// Sending half of the reply queue, held in the request state.
#[derive(Clone)]
pub struct ReplyQueue {
    tx: mpsc::UnboundedSender<ReplyJob>,
}

impl ReplyQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ReplyJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Fire and forget. A closed queue is logged and otherwise ignored.
    pub fn enqueue(&self, job: ReplyJob) {
        let post_id = job.post_id;
        if self.tx.send(job).is_err() {
            warn!("Reply queue closed, dropping mention on post {}", post_id);
        } else {
            debug!("Queued automated reply for post {}", post_id);
        }
    }
}

/// Something that can turn a prompt into a short reply.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(&self, persona: &str, prompt: &str) -> Result<String>;
}

/// Chat-completions client with bearer auth.
pub struct OpenAiGenerator {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl OpenAiGenerator {
    pub fn new(api_key: Option<String>, base_url: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url: base_url.into(),
            model: model.into(),
        })
    }
}

#[async_trait]
impl ReplyGenerator for OpenAiGenerator {
    async fn generate(&self, persona: &str, prompt: &str) -> Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("OPENAI_API_KEY is not set"))?;

        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": persona },
                { "role": "user", "content": prompt },
            ],
            "max_tokens": MAX_REPLY_TOKENS,
        });
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("generation service error {}: {}", status, truncate_chars(&body, 200));
        }

        let data: serde_json::Value = response.json().await?;
        Ok(data
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }
}

pub struct ReplyAgent {
    db: Arc<Database>,
    generator: Arc<dyn ReplyGenerator>,
}

impl ReplyAgent {
    pub fn new(db: Arc<Database>, generator: Arc<dyn ReplyGenerator>) -> Self {
        Self { db, generator }
    }

    /// Run one job to completion. Returns the new comment id, or `None` when
    /// there was nothing to say.
    pub async fn process(&self, job: &ReplyJob) -> Result<Option<i64>> {
        let prompt = build_prompt(&job.content);
        if prompt.is_empty() {
            debug!("Mention on post {} has no prompt text, skipping", job.post_id);
            return Ok(None);
        }

        let system = self.system_account().await?;

        let reply = self.generator.generate(PERSONA, &prompt).await?;
        let reply = truncate_chars(reply.trim(), MAX_REPLY_CHARS);
        if reply.is_empty() {
            bail!("generation service returned an empty reply");
        }

        let db = self.db.clone();
        let post_id = job.post_id;
        let comment = tokio::task::spawn_blocking(move || db.insert_comment(post_id, system.id, &reply))
            .await??;

        Ok(comment.map(|c| c.id))
    }

    /// `process`, with every failure swallowed into the log.
    pub async fn handle(&self, job: ReplyJob) {
        match self.process(&job).await {
            Ok(Some(comment_id)) => {
                info!("Automated reply {} posted on post {}", comment_id, job.post_id)
            }
            Ok(None) => debug!("No automated reply for post {}", job.post_id),
            Err(e) => warn!("Automated reply for post {} failed: {:#}", job.post_id, e),
        }
    }

    /// Look up the singleton system account, creating it on first use with a
    /// credential nobody knows.
    async fn system_account(&self) -> Result<UserRow> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || -> Result<UserRow> {
            match db.get_user_by_handle(SYSTEM_HANDLE)? {
                Some(user) => Ok(user),
                None => db.ensure_system_user(
                    SYSTEM_EMAIL,
                    SYSTEM_HANDLE,
                    SYSTEM_NAME,
                    &hash_password(&random_secret()),
                ),
            }
        })
        .await?
    }
}

/// Drain the queue until every sender is gone, one detached task per job.
pub async fn run_reply_worker(mut rx: mpsc::UnboundedReceiver<ReplyJob>, agent: Arc<ReplyAgent>) {
    while let Some(job) = rx.recv().await {
        let agent = agent.clone();
        tokio::spawn(async move { agent.handle(job).await });
    }
    info!("Reply queue closed, worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Canned {
        reply: Result<String, String>,
        calls: AtomicUsize,
        last_prompt: std::sync::Mutex<String>,
    }

    impl Canned {
        fn ok(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.into()),
                calls: AtomicUsize::new(0),
                last_prompt: Default::default(),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: Err("boom".into()),
                calls: AtomicUsize::new(0),
                last_prompt: Default::default(),
            })
        }
    }

    #[async_trait]
    impl ReplyGenerator for Canned {
        async fn generate(&self, _persona: &str, prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_prompt.lock().unwrap() = prompt.to_string();
            self.reply.clone().map_err(|e| anyhow!(e))
        }
    }

    fn seeded() -> (Arc<Database>, i64) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let author = db.create_user("a@example.com", "h", Some("A")).unwrap().unwrap().id;
        let post = db.insert_post(author, "@ai tell me something").unwrap().id;
        (db, post)
    }

    fn job(post_id: i64, content: &str) -> ReplyJob {
        ReplyJob {
            post_id,
            content: content.into(),
        }
    }

    #[test]
    fn mention_detection() {
        for yes in ["@ai hi", "hey @AI", "what do you think, @Ai?", "(@ai)", "line\n@ai"] {
            assert!(mentions_ai(yes), "missed {yes:?}");
        }
        for no in ["@aid please", "@ai_bot", "mail me@ai.com", "@@ai", "no mention", "ai"] {
            assert!(!mentions_ai(no), "false positive {no:?}");
        }
    }

    #[test]
    fn prompt_strips_mentions_and_truncates() {
        assert_eq!(build_prompt("@ai tell me something"), "tell me something");
        assert_eq!(build_prompt("Hey @AI, which loco?"), "Hey , which loco?");
        assert_eq!(build_prompt("@ai"), "");

        let long = format!("@ai {}", "é".repeat(1500));
        assert_eq!(build_prompt(&long).chars().count(), MAX_PROMPT_CHARS);
    }

    #[tokio::test]
    async fn successful_reply_becomes_one_comment() {
        let (db, post) = seeded();
        let generator = Canned::ok("Did you know the first public railway opened in 1825?");
        let agent = ReplyAgent::new(db.clone(), generator.clone());

        let comment_id = agent.process(&job(post, "@ai tell me something")).await.unwrap();
        assert!(comment_id.is_some());
        assert_eq!(*generator.last_prompt.lock().unwrap(), "tell me something");

        let system = db.get_user_by_handle(SYSTEM_HANDLE).unwrap().unwrap();
        let comments = db.list_comments(post, 50).unwrap();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].author_id, system.id);
    }

    #[tokio::test]
    async fn system_account_is_created_once() {
        let (db, post) = seeded();
        let agent = ReplyAgent::new(db.clone(), Canned::ok("hello"));

        agent.process(&job(post, "@ai one")).await.unwrap();
        let first = db.get_user_by_handle(SYSTEM_HANDLE).unwrap().unwrap();
        agent.process(&job(post, "@ai two")).await.unwrap();
        let second = db.get_user_by_handle(SYSTEM_HANDLE).unwrap().unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.email, SYSTEM_EMAIL);
        assert_eq!(db.list_comments(post, 50).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failures_add_no_comment() {
        let (db, post) = seeded();
        let agent = ReplyAgent::new(db.clone(), Canned::failing());

        assert!(agent.process(&job(post, "@ai tell me something")).await.is_err());
        agent.handle(job(post, "@ai tell me something")).await;

        assert!(db.list_comments(post, 50).unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_reply_adds_no_comment() {
        let (db, post) = seeded();
        let agent = ReplyAgent::new(db.clone(), Canned::ok("   "));

        assert!(agent.process(&job(post, "@ai hi")).await.is_err());
        assert!(db.list_comments(post, 50).unwrap().is_empty());
    }

    #[tokio::test]
    async fn long_reply_is_truncated() {
        let (db, post) = seeded();
        let agent = ReplyAgent::new(db.clone(), Canned::ok(&"x".repeat(1000)));

        agent.process(&job(post, "@ai hi")).await.unwrap();
        let comments = db.list_comments(post, 50).unwrap();
        assert_eq!(comments[0].content.chars().count(), MAX_REPLY_CHARS);
    }

    #[tokio::test]
    async fn missing_credential_is_an_error_not_a_panic() {
        let generator = OpenAiGenerator::new(None, "http://127.0.0.1:9", "test-model").unwrap();
        let err = generator.generate(PERSONA, "hi").await.unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[tokio::test]
    async fn bare_mention_skips_generation() {
        let (db, post) = seeded();
        let generator = Canned::ok("hello");
        let agent = ReplyAgent::new(db.clone(), generator.clone());

        assert_eq!(agent.process(&job(post, "@ai")).await.unwrap(), None);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn worker_drains_queue() {
        let (db, post) = seeded();
        let agent = Arc::new(ReplyAgent::new(db.clone(), Canned::ok("hello")));
        let (queue, rx) = ReplyQueue::new();

        queue.enqueue(job(post, "@ai hi"));
        drop(queue);
        run_reply_worker(rx, agent).await;

        for _ in 0..200 {
            if !db.list_comments(post, 50).unwrap().is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("worker never posted the reply");
    }
}
