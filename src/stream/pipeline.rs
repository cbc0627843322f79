//! 流处理管道
//!
//! ```text
//! 上游字节 ──> [AwsEventStreamParser] ──> KiroEvent ──> [ThinkingParser] ──> KiroEvent ──> [SseGenerator] ──> SSE 帧
//! ```
//!
//! - `KiroStreamProcessor`: 解码 + 推理块识别，流式与非流式共用
//! - `SseStreamConsumer`: 实现 `StreamConsumer`，交给首 token 重试编排驱动
//! - `collect_response`: 非流式请求一次性解码完整响应体

use crate::config::ThinkingConfig;
use crate::converter::UsageCalculator;
use crate::error::GatewayError;
use crate::logger::DebugSink;
use crate::resilience::StreamConsumer;
use crate::stream::events::KiroEvent;
use crate::stream::generators::SseGenerator;
use crate::stream::parsers::AwsEventStreamParser;
use crate::stream::result::StreamResult;
use crate::stream::thinking::ThinkingParser;
use std::sync::Arc;

/// 解码器与推理块识别的组合
#[derive(Debug)]
pub struct KiroStreamProcessor {
    decoder: AwsEventStreamParser,
    thinking_config: ThinkingConfig,
    thinking: Option<ThinkingParser>,
}

impl KiroStreamProcessor {
    /// 推理未开启时正文原样通过
    pub fn new(thinking_config: &ThinkingConfig) -> Self {
        Self {
            decoder: AwsEventStreamParser::new(),
            thinking: Self::thinking_parser(thinking_config),
            thinking_config: thinking_config.clone(),
        }
    }

    fn thinking_parser(config: &ThinkingConfig) -> Option<ThinkingParser> {
        config.enabled.then(|| {
            ThinkingParser::new(
                config.mode,
                config.open_tags.clone(),
                config.initial_buffer_size,
            )
        })
    }

    /// 输入一个上游 chunk
    pub fn process(&mut self, chunk: &[u8]) -> Vec<KiroEvent> {
        let decoded = self.decoder.process(chunk);
        self.route(decoded)
    }

    /// 上游结束：先刷新推理缓冲，再完成未关闭的工具调用
    pub fn finish(&mut self) -> Vec<KiroEvent> {
        let mut events = Vec::new();
        if let Some(parser) = self.thinking.as_mut() {
            let flushed = parser.finalize();
            events.extend(parser.render(flushed));
            if parser.found_thinking_block() {
                tracing::debug!("[THINKING] 响应包含推理块");
            }
        }
        events.extend(self.decoder.finish());
        events
    }

    /// 清空全部状态以便复用
    pub fn reset(&mut self) {
        self.decoder.reset();
        self.thinking = Self::thinking_parser(&self.thinking_config);
    }

    fn route(&mut self, decoded: Vec<KiroEvent>) -> Vec<KiroEvent> {
        let Some(parser) = self.thinking.as_mut() else {
            return decoded;
        };

        let mut events = Vec::with_capacity(decoded.len());
        for event in decoded {
            match event {
                KiroEvent::Content(text) => {
                    let parsed = parser.feed(&text);
                    events.extend(parser.render(parsed));
                }
                other => events.push(other),
            }
        }
        events
    }
}

/// 非流式：解码完整响应体并合并文本工具调用
pub fn collect_response(body: &[u8], processor: &mut KiroStreamProcessor) -> StreamResult {
    let mut events = processor.process(body);
    events.extend(processor.finish());
    StreamResult::from_events(&events).finish()
}

/// 流式消费者：上游字节 -> 调用方协议的 SSE 帧
pub struct SseStreamConsumer<G: SseGenerator> {
    processor: KiroStreamProcessor,
    generator: G,
    result: StreamResult,
    usage: UsageCalculator,
    debug: Arc<dyn DebugSink>,
    request_id: String,
}

impl<G: SseGenerator> SseStreamConsumer<G> {
    pub fn new(
        processor: KiroStreamProcessor,
        generator: G,
        usage: UsageCalculator,
        debug: Arc<dyn DebugSink>,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            processor,
            generator,
            result: StreamResult::new(),
            usage,
            debug,
            request_id: request_id.into(),
        }
    }

    fn emit(&mut self, events: Vec<KiroEvent>) -> Vec<String> {
        let mut frames = Vec::new();
        for event in &events {
            self.result.push(event);
            frames.extend(self.generator.on_event(event));
        }
        frames
    }
}

impl<G: SseGenerator> StreamConsumer for SseStreamConsumer<G> {
    type Output = String;

    fn on_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        self.debug.record_chunk(&self.request_id, chunk);
        let events = self.processor.process(chunk);
        self.emit(events)
    }

    fn on_end(&mut self) -> Vec<String> {
        let events = self.processor.finish();
        let mut frames = self.emit(events);

        // 正文已经流式输出，这里只合并工具调用
        let mut result = self.result.clone();
        result.tool_calls = self.result.collect_tool_calls();
        let usage = self.usage.calculate(&result);

        tracing::info!(
            "[KIRO_STREAM] 流式响应完成: content={} chars, tool_calls={}, usage={}/{}",
            result.content.chars().count(),
            result.tool_calls.len(),
            usage.prompt_tokens,
            usage.completion_tokens
        );

        frames.extend(self.generator.finish(&result, &usage));
        self.debug.finish(&self.request_id, true);
        frames
    }

    fn on_error(&mut self, error: &GatewayError) -> String {
        self.debug.finish(&self.request_id, false);
        self.generator.error_event(error)
    }
}
