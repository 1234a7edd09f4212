use proc_macro::TokenStream;

mod bus_message;
mod cqrs_event;
mod utils;

/// 总线消息宏
/// - 为结构体或枚举实现 `::courier_domain::envelope::BusMessagePayload`
/// - 支持参数：`#[bus_message(group = "...", message_type = "...", action = "...", routing_key = "...")]`
/// - `group` 默认 `FreeFormatMessage`，`message_type` 默认取类型名
/// - 给出 `routing_key` 时作为自描述路由键，覆盖默认拼装
#[proc_macro_attribute]
pub fn bus_message(attr: TokenStream, item: TokenStream) -> TokenStream {
    bus_message::expand(attr, item)
}

/// CQRS 事件宏
/// - 追加字段：`#[serde(default)] metadata: CqrsEventMetadata`（若缺失）
/// - 合并派生 `serde::Serialize` / `serde::Deserialize`
/// - 实现 `::courier_application::cqrs::CqrsEvent`
/// - 支持参数：`#[cqrs_event(event_type = "...", name = "...", action = "...")]`，`event_type` 必填
#[proc_macro_attribute]
pub fn cqrs_event(attr: TokenStream, item: TokenStream) -> TokenStream {
    cqrs_event::expand(attr, item)
}
