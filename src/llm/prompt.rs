//! Prompts for the aspect extraction task.

use crate::category::Category;

/// Fixes the model's role and forbids anything but JSON.
pub const SYSTEM_PROMPT: &str = "너는 한국어 패션/의류 리뷰에서 속성(Aspect)과 감성(-1/0/1)을 \
추출하는 어시스턴트다. 반드시 JSON만 출력하고, 추가 텍스트/설명/마크다운을 절대 출력하지 마.";

/// Build the per-review instruction: task, allowed values, sentence, schema.
pub fn build_user_prompt(sentence: &str) -> String {
    let sentence = sentence.trim().replace(['\r', '\n'], " ");
    let categories = Category::labels()
        .iter()
        .map(|c| format!("'{c}'"))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "아래 한국어 패션/의류 리뷰에 대해 속성 기반 감성 분석을 수행하라.\n\
         - category 허용값: [{categories}]\n\
         - polarity 허용값: -1(부정), 0(중립), 1(긍정)\n\
         \n\
         리뷰: \"{sentence}\"\n\
         \n\
         반환 형식(단일 JSON만 허용):\n\
         {{\n  \"aspects\": [\n    \
         {{\"term\": \"사이즈\", \"category\": \"사이즈/핏\", \"polarity\": 1}},\n    \
         {{\"term\": \"원단\", \"category\": \"재질/원단\", \"polarity\": -1}}\n  ]\n}}\n\
         JSON 이외의 어떤 텍스트도 출력하지 마."
    )
}

/// Single-string prompt for completion-style endpoints.
pub fn completion_prompt(system: &str, user: &str) -> String {
    format!("[SYSTEM]\n{system}\n[USER]\n{user}")
}
