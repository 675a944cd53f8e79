//! 对话模式与单次请求的额度消耗表

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ChatGateError;

/// 对话模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChatMode {
    #[serde(rename = "deep")]
    Deep,
    #[serde(rename = "pro")]
    Pro,
    #[serde(rename = "gpt-4o-mini")]
    Gpt4oMini,
    #[serde(rename = "gpt-4.1")]
    Gpt41,
    #[serde(rename = "gpt-4.1-mini")]
    Gpt41Mini,
    #[serde(rename = "gpt-4.1-nano")]
    Gpt41Nano,
    #[serde(rename = "o4-mini")]
    O4Mini,
    #[serde(rename = "gemini-flash-2.0")]
    Gemini2Flash,
    #[serde(rename = "deepseek-r1")]
    DeepseekR1,
    #[serde(rename = "claude-3-5-sonnet")]
    Claude35Sonnet,
    #[serde(rename = "claude-3-7-sonnet")]
    Claude37Sonnet,
    #[serde(rename = "llama-4-scout")]
    Llama4Scout,
}

impl ChatMode {
    pub const ALL: [ChatMode; 12] = [
        ChatMode::Deep,
        ChatMode::Pro,
        ChatMode::Gpt4oMini,
        ChatMode::Gpt41,
        ChatMode::Gpt41Mini,
        ChatMode::Gpt41Nano,
        ChatMode::O4Mini,
        ChatMode::Gemini2Flash,
        ChatMode::DeepseekR1,
        ChatMode::Claude35Sonnet,
        ChatMode::Claude37Sonnet,
        ChatMode::Llama4Scout,
    ];

    /// 线上传输使用的模式名
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatMode::Deep => "deep",
            ChatMode::Pro => "pro",
            ChatMode::Gpt4oMini => "gpt-4o-mini",
            ChatMode::Gpt41 => "gpt-4.1",
            ChatMode::Gpt41Mini => "gpt-4.1-mini",
            ChatMode::Gpt41Nano => "gpt-4.1-nano",
            ChatMode::O4Mini => "o4-mini",
            ChatMode::Gemini2Flash => "gemini-flash-2.0",
            ChatMode::DeepseekR1 => "deepseek-r1",
            ChatMode::Claude35Sonnet => "claude-3-5-sonnet",
            ChatMode::Claude37Sonnet => "claude-3-7-sonnet",
            ChatMode::Llama4Scout => "llama-4-scout",
        }
    }

    /// 默认额度消耗
    pub fn default_cost(&self) -> u32 {
        match self {
            ChatMode::Deep => 10,
            ChatMode::Pro
            | ChatMode::Gpt41
            | ChatMode::O4Mini
            | ChatMode::DeepseekR1
            | ChatMode::Claude35Sonnet
            | ChatMode::Claude37Sonnet => 5,
            ChatMode::Gpt41Mini => 2,
            ChatMode::Gpt4oMini
            | ChatMode::Gpt41Nano
            | ChatMode::Gemini2Flash
            | ChatMode::Llama4Scout => 1,
        }
    }
}

impl fmt::Display for ChatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChatMode {
    type Err = ChatGateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChatMode::ALL
            .iter()
            .copied()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| ChatGateError::Config(format!("unknown chat mode: {s}")))
    }
}

/// 每种模式的固定额度消耗表
#[derive(Debug, Clone, Default)]
pub struct CreditCostTable {
    overrides: HashMap<ChatMode, u32>,
}

impl CreditCostTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 覆盖某个模式的消耗
    pub fn with_cost(mut self, mode: ChatMode, cost: u32) -> Self {
        self.overrides.insert(mode, cost);
        self
    }

    /// 解析 `mode=cost,mode=cost` 形式的覆盖配置
    pub fn parse_overrides(overrides: &str) -> crate::Result<Self> {
        let mut table = Self::new();
        for pair in overrides.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (mode, cost) = pair.split_once('=').ok_or_else(|| {
                ChatGateError::Config(format!("expected mode=cost, got `{pair}`"))
            })?;
            let mode: ChatMode = mode.trim().parse()?;
            let cost: u32 = cost.trim().parse().map_err(|_| {
                ChatGateError::Config(format!("invalid credit cost for {mode}: `{cost}`"))
            })?;
            table.overrides.insert(mode, cost);
        }
        Ok(table)
    }

    pub fn cost(&self, mode: ChatMode) -> u32 {
        self.overrides
            .get(&mode)
            .copied()
            .unwrap_or_else(|| mode.default_cost())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_names_round_trip_through_serde() {
        for mode in ChatMode::ALL {
            let json = serde_json::to_string(&mode).unwrap();
            assert_eq!(json, format!("\"{}\"", mode.as_str()));
            assert_eq!(mode.as_str().parse::<ChatMode>().unwrap(), mode);
        }
        assert!("gpt-5".parse::<ChatMode>().is_err());
    }

    #[test]
    fn overrides_replace_defaults() {
        let table = CreditCostTable::parse_overrides("deep=20, gpt-4o-mini=0").unwrap();
        assert_eq!(table.cost(ChatMode::Deep), 20);
        assert_eq!(table.cost(ChatMode::Gpt4oMini), 0);
        assert_eq!(table.cost(ChatMode::Pro), 5);

        assert!(CreditCostTable::parse_overrides("deep").is_err());
        assert!(CreditCostTable::parse_overrides("deep=lots").is_err());
        assert!(CreditCostTable::parse_overrides("").is_ok());
    }
}
