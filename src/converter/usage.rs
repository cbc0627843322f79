//! 用量计算
//!
//! Kiro 不直接返回 token 数，按以下优先级推算：
//! 1. 上游用量对象中的 `inputTokens` / `outputTokens`
//! 2. 上下文占用百分比 × 模型输入上限
//! 3. 请求内容的估算值

use crate::stream::StreamResult;
use crate::tokenizer::TokenEstimator;
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credits_used: Option<f64>,
}

impl Usage {
    pub fn to_openai_json(&self) -> Value {
        let mut usage = json!({
            "prompt_tokens": self.prompt_tokens,
            "completion_tokens": self.completion_tokens,
            "total_tokens": self.total_tokens,
        });
        if let Some(credits) = self.credits_used {
            usage["credits_used"] = json!(credits);
        }
        usage
    }

    pub fn to_anthropic_json(&self) -> Value {
        json!({
            "input_tokens": self.prompt_tokens,
            "output_tokens": self.completion_tokens,
        })
    }
}

#[derive(Debug, Clone)]
pub struct UsageCalculator {
    estimator: TokenEstimator,
    max_input_tokens: u64,
    prompt_tokens_estimate: u32,
}

impl UsageCalculator {
    /// `prompt_tokens_estimate` 为请求内容的估算值，没有上下文百分比时使用
    pub fn new(estimator: TokenEstimator, max_input_tokens: u64, prompt_tokens_estimate: u32) -> Self {
        Self {
            estimator,
            max_input_tokens,
            prompt_tokens_estimate,
        }
    }

    pub fn completion_tokens(&self, result: &StreamResult) -> u32 {
        let mut tokens = self
            .estimator
            .count_tokens(&result.content)
            .saturating_add(self.estimator.count_tokens(&result.thinking_content));
        for call in &result.tool_calls {
            tokens = tokens
                .saturating_add(self.estimator.count_tokens(&call.name))
                .saturating_add(self.estimator.count_tokens(&call.arguments));
        }
        tokens
    }

    pub fn calculate(&self, result: &StreamResult) -> Usage {
        let credits_used = result.credits_used();

        if let Some((prompt, completion)) = reported_tokens(result.usage.as_ref()) {
            return Usage {
                prompt_tokens: prompt,
                completion_tokens: completion,
                total_tokens: prompt.saturating_add(completion),
                credits_used,
            };
        }

        let completion = self.completion_tokens(result);
        let prompt = match result.context_usage_percentage {
            Some(pct) if pct > 0.0 => {
                let total = (pct / 100.0 * self.max_input_tokens as f64).round() as u32;
                total.saturating_sub(completion)
            }
            _ => self.prompt_tokens_estimate,
        };

        Usage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt.saturating_add(completion),
            credits_used,
        }
    }
}

fn reported_tokens(usage: Option<&Value>) -> Option<(u32, u32)> {
    let obj = usage?.as_object()?;
    let input = obj.get("inputTokens").and_then(Value::as_u64)?;
    let output = obj.get("outputTokens").and_then(Value::as_u64).unwrap_or(0);
    Some((clamp_u32(input), clamp_u32(output)))
}

fn clamp_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calculator(estimate: u32) -> UsageCalculator {
        UsageCalculator::new(TokenEstimator::heuristic(), 200_000, estimate)
    }

    #[test]
    fn test_reported_tokens_win() {
        let result = StreamResult {
            content: "hello".into(),
            usage: Some(json!({"inputTokens": 120, "outputTokens": 30})),
            context_usage_percentage: Some(50.0),
            ..Default::default()
        };
        let usage = calculator(10).calculate(&result);
        assert_eq!(usage.prompt_tokens, 120);
        assert_eq!(usage.completion_tokens, 30);
        assert_eq!(usage.total_tokens, 150);
    }

    #[test]
    fn test_context_percentage() {
        let result = StreamResult {
            content: "a".repeat(40),
            context_usage_percentage: Some(1.0),
            usage: Some(json!(0.25)),
            ..Default::default()
        };
        let usage = calculator(10).calculate(&result);
        // 1% of 200000 = 2000, completion = 13
        assert_eq!(usage.completion_tokens, 13);
        assert_eq!(usage.prompt_tokens, 2000 - 13);
        assert_eq!(usage.total_tokens, 2000);
        assert_eq!(usage.credits_used, Some(0.25));
    }

    #[test]
    fn test_prompt_tokens_floor_at_zero() {
        let result = StreamResult {
            content: "a".repeat(4000),
            context_usage_percentage: Some(0.001),
            ..Default::default()
        };
        let usage = calculator(10).calculate(&result);
        assert_eq!(usage.prompt_tokens, 0);
        assert_eq!(usage.total_tokens, usage.completion_tokens);
    }

    #[test]
    fn test_oversized_reported_tokens_saturate() {
        let result = StreamResult {
            usage: Some(json!({"inputTokens": 5_000_000_000u64, "outputTokens": 10})),
            ..Default::default()
        };
        let usage = calculator(10).calculate(&result);
        assert_eq!(usage.prompt_tokens, u32::MAX);
        assert_eq!(usage.completion_tokens, 10);
        assert_eq!(usage.total_tokens, u32::MAX);
    }

    #[test]
    fn test_falls_back_to_request_estimate() {
        let usage = calculator(42).calculate(&StreamResult::default());
        assert_eq!(usage.prompt_tokens, 42);
        assert_eq!(usage.completion_tokens, 0);
        assert!(usage.to_openai_json().get("credits_used").is_none());
        assert_eq!(usage.to_anthropic_json()["input_tokens"], 42);
    }
}
