//! 对话片段的传输格式：每个片段一个 JSON 对象，第一个之后的片段以 `\n` 开头。

use std::convert::Infallible;

use application::services::{FragmentStream, StreamFragment};
use futures_util::{Stream, StreamExt};
use serde_json::json;

fn fragment_json(fragment: &StreamFragment) -> String {
    match fragment {
        StreamFragment::Partial(message) => serde_json::to_string(message)
            .unwrap_or_else(|err| failure_json(&format!("encode error: {err}"))),
        StreamFragment::Failed { message } => failure_json(message),
    }
}

fn failure_json(message: &str) -> String {
    json!({ "status": "Fail", "message": message, "data": null }).to_string()
}

/// 按到达顺序编码片段。
pub fn frame(index: usize, fragment: &StreamFragment) -> String {
    let body = fragment_json(fragment);
    if index == 0 {
        body
    } else {
        format!("\n{body}")
    }
}

pub fn framed_body(fragments: FragmentStream) -> impl Stream<Item = Result<String, Infallible>> {
    fragments
        .enumerate()
        .map(|(index, fragment)| Ok(frame(index, &fragment)))
}
