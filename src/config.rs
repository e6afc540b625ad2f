//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `PROCURE__*` 覆盖（双下划线表示嵌套，如 `PROCURE__MAIL__COMMAND=npx`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub embedding: EmbeddingSection,
    pub knowledge: KnowledgeSection,
    pub retrieval: RetrievalSection,
    pub mail: MailSection,
    pub purchase: PurchaseSection,
    pub supervisor: SupervisorSection,
    pub ingest: IngestSection,
}

/// [app] 段：应用名、数据目录、日志级别
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 数据根目录，未设置时用 ./data
    pub data_dir: Option<PathBuf>,
    /// 默认日志指令，RUST_LOG 可覆盖
    pub log_level: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            data_dir: None,
            log_level: "info".to_string(),
        }
    }
}

/// [llm] 段：文本生成后端
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai / mock；openai 需要 OPENAI_API_KEY，缺失时退回 mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 单次请求超时（秒）
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            request_timeout_secs: 60,
        }
    }
}

/// [embedding] 段：向量化方式
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingSection {
    /// hashing（本地，无需网络）/ openai
    pub provider: String,
    pub model: String,
    /// hashing 向量维度
    pub dimensions: usize,
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            provider: "hashing".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimensions: 1024,
        }
    }
}

/// [knowledge] 段：向量集合的存储位置与检索参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KnowledgeSection {
    /// sqlite（持久化）/ memory
    pub backend: String,
    /// SQLite 文件路径，未设置时为 <data_dir>/knowledge.db
    pub path: Option<PathBuf>,
    pub collection: String,
    pub top_k: usize,
    /// 相似度不高于该值的结果被丢弃
    pub min_score: f32,
}

impl Default for KnowledgeSection {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
            path: None,
            collection: "procurement_data".to_string(),
            top_k: 3,
            min_score: 0.0,
        }
    }
}

/// [retrieval] 段
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RetrievalSection {
    /// 是否让 LLM 基于检索结果作答；默认直接返回格式化后的检索结果
    pub synthesize_answer: bool,
}

/// [mail] 段：邮件工具进程的启动命令与工具名
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MailSection {
    pub command: String,
    pub args: Vec<String>,
    pub send_tool: String,
    pub search_tool: String,
    pub get_tool: String,
    pub modify_tool: String,
    /// 单次会话（启动 + 初始化 + 调用）超时（秒）
    pub timeout_secs: u64,
}

impl Default for MailSection {
    fn default() -> Self {
        Self {
            command: "npx".to_string(),
            args: vec![
                "-y".to_string(),
                "@modelcontextprotocol/server-gmail".to_string(),
            ],
            send_tool: "gmail_send_email".to_string(),
            search_tool: "gmail_search".to_string(),
            get_tool: "gmail_get_message".to_string(),
            modify_tool: "gmail_modify_message".to_string(),
            timeout_secs: 30,
        }
    }
}

/// [purchase] 段：采购单模板的默认值与落款
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PurchaseSection {
    pub default_shipping_address: String,
    pub default_delivery_date: String,
    pub company_name: String,
    pub signer_name: String,
    pub signer_position: String,
    pub contact: String,
}

impl Default for PurchaseSection {
    fn default() -> Self {
        Self {
            default_shipping_address: "123 Construction Lane".to_string(),
            default_delivery_date: "ASAP".to_string(),
            company_name: "Procurement Team".to_string(),
            signer_name: "Procurement Manager".to_string(),
            signer_position: "Purchasing".to_string(),
            contact: String::new(),
        }
    }
}

/// [supervisor] 段
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SupervisorSection {
    /// 规则无法判定意图时是否询问 LLM；关闭时直接走检索
    pub llm_fallback: bool,
}

/// [ingest] 段：邮件入库
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestSection {
    pub interval_secs: u64,
    pub max_per_run: usize,
    pub unread_query: String,
    /// 邮箱不可用时写入演示数据
    pub seed_mock_on_failure: bool,
}

impl Default for IngestSection {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            max_per_run: 10,
            unread_query: "is:unread label:inbox".to_string(),
            seed_mock_on_failure: true,
        }
    }
}

impl AppConfig {
    pub fn data_dir(&self) -> PathBuf {
        self.app
            .data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("data"))
    }

    pub fn knowledge_path(&self) -> PathBuf {
        self.knowledge
            .path
            .clone()
            .unwrap_or_else(|| self.data_dir().join("knowledge.db"))
    }
}

/// 从 config 目录加载配置，环境变量 PROCURE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 PROCURE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("PROCURE")
            .separator("__")
            .list_separator(" ")
            .with_list_parse_key("mail.args")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
