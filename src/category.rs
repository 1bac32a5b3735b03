//! The closed set of fashion-review aspect categories and the normalizer that
//! maps untrusted model output onto it.

use std::fmt;

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

/// Aspect category for Korean fashion/apparel reviews.
///
/// Serialized by its Korean label, which is also what the model is asked to
/// emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "사이즈/핏")]
    SizeFit,
    #[serde(rename = "재질/원단")]
    Material,
    #[serde(rename = "디자인/스타일")]
    Design,
    #[serde(rename = "색상")]
    Color,
    #[serde(rename = "가격")]
    Price,
    #[serde(rename = "배송/서비스")]
    Delivery,
    #[serde(rename = "착용감")]
    Comfort,
    #[serde(rename = "품질/내구성")]
    Quality,
    #[serde(rename = "세탁/관리")]
    Care,
    #[serde(rename = "교환/반품/AS")]
    Exchange,
}

/// Keyword table, in priority order. The first category with any keyword
/// contained in the probe string wins.
const SYNONYMS: [(Category, &[&str]); 10] = [
    (
        Category::SizeFit,
        &["사이즈", "크기", "핏", "길이", "품", "정사이즈", "루즈", "타이트", "오버핏"],
    ),
    (
        Category::Material,
        &["재질", "원단", "소재", "두께", "촉감", "보풀", "올풀림", "냄새", "퀄리티(소재)"],
    ),
    (
        Category::Design,
        &["디자인", "스타일", "디테일", "로고", "패턴", "마감(디자인)", "예쁨", "세련"],
    ),
    (Category::Color, &["색", "컬러", "색감", "염색", "물빠짐"]),
    (
        Category::Price,
        &["가격", "가성비", "가심비", "할인", "세일", "비싸", "저렴"],
    ),
    (
        Category::Delivery,
        &["배송", "포장", "택배", "CS", "응대", "판매자", "문의", "교환 안내"],
    ),
    (
        Category::Comfort,
        &["착용감", "편해", "불편", "무게감", "통풍", "따뜻", "시원", "신축성", "쫀쫀"],
    ),
    (
        Category::Quality,
        &["내구성", "퀄리티", "하자", "불량", "튼튼", "약함", "봉제", "마감"],
    ),
    (
        Category::Care,
        &["세탁", "관리", "수축", "변형", "드라이", "세탁 후 변형", "물빠짐"],
    ),
    (
        Category::Exchange,
        &["교환", "반품", "환불", "A/S", "AS", "교환 속도", "처리"],
    ),
];

const SIZE_HINTS: &[&str] = &["사이즈", "핏", "정사이즈", "타이트", "루즈"];
const DELIVERY_HINTS: &[&str] = &["배송", "포장", "판매자", "응대", "CS", "택배"];
const EXCHANGE_HINTS: &[&str] = &["교환", "반품", "환불", "A/S", "AS"];

impl Category {
    /// All categories in table order.
    pub const ALL: [Category; 10] = [
        Category::SizeFit,
        Category::Material,
        Category::Design,
        Category::Color,
        Category::Price,
        Category::Delivery,
        Category::Comfort,
        Category::Quality,
        Category::Care,
        Category::Exchange,
    ];

    /// Category assigned when nothing else matches.
    pub const FALLBACK: Category = Category::Quality;

    /// The Korean label used on the wire.
    pub fn label(self) -> &'static str {
        match self {
            Category::SizeFit => "사이즈/핏",
            Category::Material => "재질/원단",
            Category::Design => "디자인/스타일",
            Category::Color => "색상",
            Category::Price => "가격",
            Category::Delivery => "배송/서비스",
            Category::Comfort => "착용감",
            Category::Quality => "품질/내구성",
            Category::Care => "세탁/관리",
            Category::Exchange => "교환/반품/AS",
        }
    }

    /// Exact label lookup.
    pub fn from_label(label: &str) -> Option<Category> {
        Category::ALL.into_iter().find(|c| c.label() == label)
    }

    /// Map a model-claimed `(term, category)` pair onto the closed set.
    ///
    /// Never fails: unknown input lands on [`Category::FALLBACK`].
    pub fn normalize(term: &str, claimed: &str) -> Category {
        let claimed: String = claimed.trim().nfc().collect();
        if let Some(category) = Category::from_label(&claimed) {
            return category;
        }

        let probe: String = format!("{} {claimed}", term.trim()).nfc().collect();
        let contains_any = |keywords: &[&str]| keywords.iter().any(|kw| probe.contains(kw));

        if let Some((category, _)) = SYNONYMS.iter().find(|(_, kws)| contains_any(*kws)) {
            return *category;
        }

        if contains_any(SIZE_HINTS) {
            Category::SizeFit
        } else if contains_any(DELIVERY_HINTS) {
            Category::Delivery
        } else if contains_any(EXCHANGE_HINTS) {
            Category::Exchange
        } else {
            Category::FALLBACK
        }
    }

    /// Labels of every category, for embedding in prompts.
    pub fn labels() -> Vec<&'static str> {
        Category::ALL.iter().map(|c| c.label()).collect()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
