use super::{Identity, RequestContext, keys};
use crate::error::MessagingResult;
use bon::Builder;

/// 调用方主体上下文
///
/// 显式地沿发送/分发调用链传递，信封在构造（即发送）时从这里拷贝身份与请求上下文。
/// 后台投递进程不持有任何“当前主体”，重试时信封仍反映最初的请求者。
#[derive(Builder, Default, Debug, Clone, PartialEq)]
pub struct ActorContext {
    #[builder(default)]
    identity: Identity,
    #[builder(default)]
    request_context: RequestContext,
}

impl ActorContext {
    pub fn new(identity: Identity, request_context: RequestContext) -> Self {
        Self {
            identity,
            request_context,
        }
    }

    /// 由请求上下文中的常用键还原身份
    pub fn from_request_context(request_context: RequestContext) -> MessagingResult<Self> {
        let identity = Identity::builder()
            .maybe_user_id(request_context.get(&keys::USER_ID)?)
            .maybe_request_id(request_context.get(&keys::REQUEST_ID)?)
            .maybe_user_name(request_context.get(&keys::USER_NAME)?)
            .build();

        Ok(Self {
            identity,
            request_context,
        })
    }

    /// 无请求者的系统主体（例如定时任务）
    pub fn system() -> Self {
        Self::default()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn request_context(&self) -> &RequestContext {
        &self.request_context
    }

    pub fn request_context_mut(&mut self) -> &mut RequestContext {
        &mut self.request_context
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_restored_from_well_known_keys() {
        let rc = RequestContext::new()
            .with(&keys::USER_ID, &"u-9".to_string())
            .unwrap()
            .with(&keys::USER_NAME, &"alice".to_string())
            .unwrap();
        let actor = ActorContext::from_request_context(rc).unwrap();
        assert_eq!(actor.identity().user_id(), Some("u-9"));
        assert_eq!(actor.identity().user_name(), Some("alice"));
        assert_eq!(actor.identity().request_id(), None);
        assert!(ActorContext::system().identity().is_anonymous());
    }
}
