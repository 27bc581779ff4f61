use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chatrelay::ChatConfig;
use chatrelay::config::{DEFAULT_MODEL, DEFAULT_SYSTEM_PROMPT};
use chatrelay::upstream::DEFAULT_BASE_URL;
use clap::Parser;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Args {
    /// Address to bind the service to
    #[arg(long, env = "HTTP_ADDR", default_value = "0.0.0.0:3001")]
    pub addr: String,
    /// OpenAI API key
    #[arg(long, env = "OPENAI_KEY", hide_env_values = true)]
    pub openai_key: Option<String>,
    /// Base URL of the Responses API
    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub openai_base_url: Url,
    #[arg(long, env = "MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,
    /// Upper bound on output tokens per reply
    #[arg(long, env = "MAX_TOKENS")]
    pub max_tokens: Option<u32>,
    #[arg(long, env = "LLM_TEMPERATURE", default_value_t = 0.66)]
    pub temperature: f32,
    #[arg(long, env = "TOP_P", default_value_t = 1.0)]
    pub top_p: f32,
    #[arg(long, env = "PRESENCE_PENALTY", default_value_t = 0.0)]
    pub presence_penalty: f32,
    #[arg(long, env = "FREQUENCY_PENALTY", default_value_t = 0.0)]
    pub frequency_penalty: f32,
    /// Reasoning effort sent to reasoning models (low, medium, high)
    #[arg(long, env = "REASONING_EFFORT")]
    pub reasoning_effort: Option<String>,
    /// Supabase project URL used to validate identity tokens
    #[arg(long, env = "SUPABASE_URL")]
    pub supabase_url: Option<Url>,
    #[arg(long, env = "SUPABASE_ANON_KEY", hide_env_values = true)]
    pub supabase_anon_key: Option<String>,
    /// File whose content replaces the default system prompt
    #[arg(long, default_value = ".system_prompt")]
    pub system_prompt_file: PathBuf,
    /// MCP client config to read Supabase settings from when not given directly
    #[arg(long, default_value = ".mcp_config.json")]
    pub mcp_config: PathBuf,
}

/// Fully resolved startup configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub addr: String,
    pub openai_key: String,
    pub openai_base_url: Url,
    pub supabase_url: Url,
    pub supabase_anon_key: String,
    pub chat: ChatConfig,
}

#[derive(Deserialize, Default)]
struct McpConfig {
    #[serde(rename = "mcpServers", default)]
    mcp_servers: HashMap<String, McpServer>,
}

#[derive(Deserialize, Default)]
struct McpServer {
    #[serde(default)]
    env: HashMap<String, String>,
}

fn read_mcp_supabase_env(path: &Path) -> Result<HashMap<String, String>> {
    if !path.exists() {
        debug!(path = %path.display(), "no MCP config file");
        return Ok(HashMap::new());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading MCP config {}", path.display()))?;
    let mut cfg: McpConfig = serde_json::from_str(&raw)
        .with_context(|| format!("parsing MCP config {}", path.display()))?;
    Ok(cfg
        .mcp_servers
        .remove("supabase")
        .map(|server| server.env)
        .unwrap_or_default())
}

fn read_system_prompt(path: &Path) -> Result<String> {
    if !path.exists() {
        return Ok(DEFAULT_SYSTEM_PROMPT.to_string());
    }
    let prompt = std::fs::read_to_string(path)
        .with_context(|| format!("reading system prompt {}", path.display()))?;
    info!(path = %path.display(), "loaded system prompt");
    Ok(prompt.trim_end().to_string())
}

impl Settings {
    pub fn from_args(args: Args) -> Result<Self> {
        let openai_key = args
            .openai_key
            .filter(|k| !k.is_empty())
            .ok_or_else(|| anyhow!("OPENAI_KEY is required"))?;

        let mut supabase_env = if args.supabase_url.is_none() || args.supabase_anon_key.is_none()
        {
            read_mcp_supabase_env(&args.mcp_config)?
        } else {
            HashMap::new()
        };

        let supabase_url = match args.supabase_url {
            Some(url) => url,
            None => {
                let raw = supabase_env
                    .remove("DATABASE_URL")
                    .filter(|u| !u.is_empty())
                    .ok_or_else(|| {
                        anyhow!("SUPABASE_URL is required (or DATABASE_URL in the MCP config)")
                    })?;
                Url::parse(&raw).with_context(|| format!("invalid Supabase URL {raw:?}"))?
            }
        };

        let supabase_anon_key = args
            .supabase_anon_key
            .or_else(|| supabase_env.remove("SUPABASE_ANON_KEY"))
            .filter(|k| !k.is_empty())
            .ok_or_else(|| anyhow!("SUPABASE_ANON_KEY is required"))?;

        let chat = ChatConfig {
            model: args.model,
            system_prompt: read_system_prompt(&args.system_prompt_file)?,
            max_tokens: args.max_tokens,
            temperature: Some(args.temperature),
            top_p: Some(args.top_p),
            presence_penalty: Some(args.presence_penalty),
            frequency_penalty: Some(args.frequency_penalty),
            reasoning_effort: args.reasoning_effort,
        };

        Ok(Self {
            addr: args.addr,
            openai_key,
            openai_base_url: args.openai_base_url,
            supabase_url,
            supabase_anon_key,
            chat,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn args(dir: &Path, extra: &[&str]) -> Args {
        let prompt = dir.join(".system_prompt");
        let mcp = dir.join(".mcp_config.json");
        let mut argv = vec![
            "chatrelay-service".to_string(),
            "--system-prompt-file".to_string(),
            prompt.display().to_string(),
            "--mcp-config".to_string(),
            mcp.display().to_string(),
        ];
        argv.extend(extra.iter().map(|s| s.to_string()));
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn explicit_flags_need_no_files() {
        let dir = tempdir().unwrap();
        let settings = Settings::from_args(args(
            dir.path(),
            &[
                "--openai-key",
                "sk-test",
                "--supabase-url",
                "https://proj.supabase.co",
                "--supabase-anon-key",
                "anon",
                "--model",
                "o3-mini",
                "--reasoning-effort",
                "low",
            ],
        ))
        .unwrap();

        assert_eq!(settings.openai_key, "sk-test");
        assert_eq!(settings.supabase_url.as_str(), "https://proj.supabase.co/");
        assert_eq!(settings.chat.model, "o3-mini");
        assert_eq!(settings.chat.reasoning_effort.as_deref(), Some("low"));
        assert_eq!(settings.chat.system_prompt, DEFAULT_SYSTEM_PROMPT);
        assert_eq!(settings.chat.top_p, Some(1.0));
    }

    #[test]
    fn supabase_settings_fall_back_to_mcp_config() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(".mcp_config.json"),
            r#"{"mcpServers": {"supabase": {"command": "npx", "env": {
                "DATABASE_URL": "https://fromfile.supabase.co",
                "SUPABASE_ANON_KEY": "file-anon"
            }}}}"#,
        )
        .unwrap();
        fs::write(dir.path().join(".system_prompt"), "You are terse.\n").unwrap();

        let settings =
            Settings::from_args(args(dir.path(), &["--openai-key", "sk-test"])).unwrap();

        assert_eq!(settings.supabase_url.host_str(), Some("fromfile.supabase.co"));
        assert_eq!(settings.supabase_anon_key, "file-anon");
        assert_eq!(settings.chat.system_prompt, "You are terse.");
    }

    #[test]
    fn missing_openai_key_is_an_error() {
        let dir = tempdir().unwrap();
        let mut a = args(
            dir.path(),
            &["--supabase-url", "https://p.supabase.co", "--supabase-anon-key", "anon"],
        );
        a.openai_key = None;

        let err = Settings::from_args(a).unwrap_err();
        assert!(err.to_string().contains("OPENAI_KEY"));
    }

    #[test]
    fn missing_supabase_settings_are_an_error() {
        let dir = tempdir().unwrap();
        let mut a = args(dir.path(), &["--openai-key", "sk-test"]);
        a.supabase_url = None;
        a.supabase_anon_key = None;

        let err = Settings::from_args(a).unwrap_err();
        assert!(err.to_string().contains("SUPABASE_URL"));
    }
}
