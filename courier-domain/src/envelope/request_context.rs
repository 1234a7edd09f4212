use crate::error::MessagingResult;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

/// 类型化的上下文键
///
/// 键名与值类型在编译期绑定，读取时按声明的类型反序列化，
/// 无需在运行时按类型查找转换方法。
pub struct ContextKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ContextKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for ContextKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ContextKey<T> {}

impl<T> fmt::Debug for ContextKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContextKey").field(&self.name).finish()
    }
}

/// 常用上下文键
pub mod keys {
    use super::ContextKey;

    pub const USER_ID: ContextKey<String> = ContextKey::new("UserId");
    pub const REQUEST_ID: ContextKey<String> = ContextKey::new("RequestId");
    pub const USER_NAME: ContextKey<String> = ContextKey::new("UserName");
    pub const CORRELATION_ID: ContextKey<String> = ContextKey::new("CorrelationId");
}

/// 请求上下文：向消费方传播的键值状态
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestContext(BTreeMap<String, Value>);

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按类型化键读取；键不存在返回 `Ok(None)`，类型不符返回反序列化错误
    pub fn get<T>(&self, key: &ContextKey<T>) -> MessagingResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        match self.0.get(key.name()) {
            Some(v) => Ok(Some(serde_json::from_value(v.clone())?)),
            None => Ok(None),
        }
    }

    pub fn insert<T>(&mut self, key: &ContextKey<T>, value: &T) -> MessagingResult<()>
    where
        T: Serialize,
    {
        self.0
            .insert(key.name().to_string(), serde_json::to_value(value)?);
        Ok(())
    }

    pub fn with<T>(mut self, key: &ContextKey<T>, value: &T) -> MessagingResult<Self>
    where
        T: Serialize,
    {
        self.insert(key, value)?;
        Ok(self)
    }

    pub fn get_raw(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn insert_raw(&mut self, name: impl Into<String>, value: Value) {
        self.0.insert(name.into(), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }

    /// 合并另一份上下文，已有键被覆盖
    pub fn merge(&mut self, other: &RequestContext) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}
