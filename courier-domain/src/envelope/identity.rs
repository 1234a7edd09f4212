use bon::Builder;
use serde::{Deserialize, Serialize};

/// 发送时刻的调用方身份
#[derive(Builder, Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// 用户 ID
    user_id: Option<String>,
    /// 请求 ID（链路追踪）
    request_id: Option<String>,
    /// 用户名
    user_name: Option<String>,
}

impl Identity {
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn user_name(&self) -> Option<&str> {
        self.user_name.as_deref()
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_none()
    }
}
