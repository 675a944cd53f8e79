//! 请求身份 - 额度记账的基本单位

use std::fmt;

use serde::{Deserialize, Serialize};

/// 身份类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityKind {
    /// 已登录用户
    User,
    /// 匿名访客 (按 IP 计)
    Ip,
}

impl IdentityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityKind::User => "user",
            IdentityKind::Ip => "ip",
        }
    }
}

/// 请求身份
///
/// 同时存在用户 ID 与 IP 时，用户身份优先。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Identity {
    User(String),
    Ip(String),
}

impl Identity {
    /// 从可选的用户 ID 与 IP 解析身份，空字符串视为缺失
    pub fn resolve(user_id: Option<&str>, ip: Option<&str>) -> Option<Self> {
        let user_id = user_id.map(str::trim).filter(|s| !s.is_empty());
        let ip = ip.map(str::trim).filter(|s| !s.is_empty());

        match (user_id, ip) {
            (Some(user_id), _) => Some(Identity::User(user_id.to_string())),
            (None, Some(ip)) => Some(Identity::Ip(ip.to_string())),
            (None, None) => None,
        }
    }

    pub fn kind(&self) -> IdentityKind {
        match self {
            Identity::User(_) => IdentityKind::User,
            Identity::Ip(_) => IdentityKind::Ip,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Identity::User(value) | Identity::Ip(value) => value,
        }
    }

    /// 已登录用户的 ID
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Identity::User(value) => Some(value),
            Identity::Ip(_) => None,
        }
    }

    /// 共享存储中的余额键
    pub fn storage_key(&self) -> String {
        format!("credits:{}:{}", self.kind().as_str(), self.value())
    }

    /// 共享存储中的补充日期键
    pub fn refill_key(&self) -> String {
        format!("{}:lastRefill", self.storage_key())
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind().as_str(), self.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_takes_precedence_over_ip() {
        let identity = Identity::resolve(Some("42"), Some("10.0.0.1")).unwrap();
        assert_eq!(identity, Identity::User("42".to_string()));

        let identity = Identity::resolve(Some("  "), Some("10.0.0.1")).unwrap();
        assert_eq!(identity, Identity::Ip("10.0.0.1".to_string()));

        assert!(Identity::resolve(None, None).is_none());
    }

    #[test]
    fn storage_keys() {
        let identity = Identity::User("42".to_string());
        assert_eq!(identity.storage_key(), "credits:user:42");
        assert_eq!(identity.refill_key(), "credits:user:42:lastRefill");
        assert_eq!(identity.to_string(), "user:42");

        let identity = Identity::Ip("10.0.0.1".to_string());
        assert_eq!(identity.storage_key(), "credits:ip:10.0.0.1");
    }
}
