//! 转换器 Trait 定义
//!
//! - `RequestTranslator`: 入站请求 -> 统一模型 -> Kiro 载荷
//! - `ResponseRenderer`: 聚合后的上游结果 -> 客户端协议的完整响应

use crate::converter::usage::Usage;
use crate::error::GatewayError;
use crate::stream::StreamResult;

/// 请求转换器
///
/// # 类型参数
///
/// - `Input`: 源协议请求
/// - `Output`: 目标协议请求
pub trait RequestTranslator {
    type Input;
    type Output;

    fn translate_request(&self, request: Self::Input) -> Result<Self::Output, GatewayError>;
}

/// 非流式响应渲染
pub trait ResponseRenderer {
    fn render(&self, result: &StreamResult, usage: &Usage) -> serde_json::Value;
}
